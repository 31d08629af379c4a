//! Session lifecycle: the bulk sweep at start and the shadow sync at stop.

use std::fs;

use crate::config::{self, Config};
use crate::engine::Engine;
use crate::error::Result;
use crate::lease::Lease;
use crate::mapping::Mapping;
use crate::sync::{EligibleFiles, SyncReport, is_binary, sync_dir};

/// Counts from a session-start sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Text files read.
    pub scanned: usize,
    /// Values that received a new placeholder.
    pub discovered: usize,
    /// Files rewritten in place.
    pub sanitized: usize,
    /// Files that could not be read or written.
    pub failed: usize,
}

impl<L: Lease> Engine<L> {
    /// Sanitize the whole project before the assistant sees it.
    ///
    /// Bootstraps the config if it is missing. All files are scanned before
    /// any is rewritten, so a value appearing in several files gets the same
    /// placeholder everywhere. The first file to mention a value wins.
    ///
    /// # Errors
    ///
    /// Fails on config bootstrap, pattern or store errors. Per-file errors
    /// are counted, not returned.
    pub fn session_start(&mut self) -> Result<SessionReport> {
        self.bootstrap_config()?;

        let options = self.walk_options()?.skip_empty(true);
        let files: Vec<_> = EligibleFiles::new(&self.project_root, options)
            .filter(|entry| !is_binary(&entry.path))
            .collect();

        let mut report = SessionReport::default();
        let mut found = Mapping::new();
        for entry in &files {
            let Ok(text) = fs::read_to_string(&entry.path) else {
                report.failed += 1;
                continue;
            };
            report.scanned += 1;
            let known = self.mappings.with_discovered(&found);
            for (real, placeholder) in self.discoverer.discover(&text, &known)? {
                found.entry(real).or_insert(placeholder);
            }
        }

        if !found.is_empty() {
            report.discovered = found.len();
            let recorded = self.store.record(&found, self.discoverer.generator())?;
            self.replace_mappings(recorded);
        }

        let substitution = self.substitution()?.clone();
        for entry in &files {
            let Ok(original) = fs::read_to_string(&entry.path) else {
                continue;
            };
            let sanitized = substitution.apply(&original);
            if sanitized == original.as_str() {
                continue;
            }
            match fs::write(&entry.path, sanitized.as_bytes()) {
                Ok(()) => report.sanitized += 1,
                Err(e) => {
                    tracing::warn!(file = %entry.relative, error = %e, "could not sanitize file");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            discovered = report.discovered,
            sanitized = report.sanitized,
            "session start sweep complete"
        );
        Ok(report)
    }

    /// Mirror the project into the shadow tree with real values restored.
    ///
    /// # Errors
    ///
    /// Fails if the shadow root cannot be resolved or created.
    pub fn session_stop(&self) -> Result<SyncReport> {
        self.sync_to_shadow()
    }

    /// Full project → shadow sync through the reverse mapping.
    ///
    /// # Errors
    ///
    /// See [`Self::session_stop`].
    pub fn sync_to_shadow(&self) -> Result<SyncReport> {
        let shadow = self.shadow_root()?;
        let restoration = self.restoration()?;
        sync_dir(&self.project_root, &shadow, &self.walk_options()?, |text| {
            restoration.apply(text)
        })
    }

    fn bootstrap_config(&mut self) -> Result<()> {
        let path = self.store.path().to_path_buf();
        if !config::initialize_if_needed(&path)? {
            return Ok(());
        }
        let config = Config::load_from(&path)?;
        self.discoverer = config.discoverer()?;
        self.replace_mappings(config.mappings.clone());
        self.config = config;
        Ok(())
    }
}
