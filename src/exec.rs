//! Real execution of a rerouted shell command.
//!
//! `sanitizer exec '<command>'` is what the engine substitutes for commands
//! that need real infrastructure values. It refreshes the shadow tree, runs
//! the command there with placeholders restored, and hands back output that
//! has been sanitized again.

use std::process::{Command, Stdio};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::lease::Lease;

/// Exit code reported when the child was killed by a signal.
pub const SIGNALED_EXIT_CODE: i32 = 128;

/// Result of a wrapped run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Combined stdout then stderr, sanitized.
    pub output: String,
    pub exit_code: i32,
}

impl<L: Lease> Engine<L> {
    /// Run `command` against the shadow tree with real values.
    ///
    /// Steps: sync project → shadow with restoration, restore the command,
    /// run it through the configured shell inside the shadow root, then
    /// sanitize the combined output including the IPv4 fallback.
    ///
    /// # Errors
    ///
    /// Fails if the shadow tree cannot be prepared, the shell cannot be
    /// spawned, or a substitution table cannot be compiled. A non-zero exit
    /// of the command itself is not an error.
    pub fn exec(&mut self, command: &str) -> Result<ExecOutcome> {
        let report = self.sync_to_shadow()?;
        tracing::debug!(files = report.total(), "shadow tree refreshed");

        let restored = self.restoration()?.apply(command).into_owned();
        let shadow = self.shadow_root()?;
        let shell = self.config.exec_shell();
        let (program, args) = shell
            .split_first()
            .ok_or_else(|| Error::Spawn {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty execShell"),
            })?;

        tracing::info!(shell = %program, cwd = %shadow.display(), "running command with real values");
        let output = Command::new(program)
            .args(args)
            .arg(&restored)
            .current_dir(&shadow)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let sanitized = self.substitution()?.apply_with_fallback(&combined).into_owned();

        let exit_code = output.status.code().unwrap_or(SIGNALED_EXIT_CODE);
        self.log(
            crate::logging::LogEntry::new(crate::logging::LogEvent::Exec)
                .subject(command)
                .detail(format!("exit {exit_code}")),
        );
        Ok(ExecOutcome {
            output: sanitized,
            exit_code,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::lease::MemoryLease;
    use crate::mapping::{Mapping, MappingSet};
    use crate::rules::HookRules;
    use crate::store::MappingStore;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn engine(home: &Path, project: &Path) -> Engine<MemoryLease> {
        let manual: Mapping = [("10.50.0.1".to_string(), "111.50.50.50".to_string())]
            .into_iter()
            .collect();
        let config = Config {
            mappings: MappingSet::new(manual, Mapping::new()),
            unsanitized_path: format!("{}/{{project}}", home.join("shadow").display()),
            ..Config::default()
        };
        let store = MappingStore::with_lease(home.join("sanitizer.json"), MemoryLease::new("exec"));
        Engine::new(config, store, HookRules::empty(), project).unwrap()
    }

    #[test]
    fn runs_in_shadow_with_real_values_and_sanitizes_output() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("target.txt"), "host 111.50.50.50\n").unwrap();

        let mut engine = engine(home.path(), project.path());
        let outcome = engine
            .exec("cat target.txt; echo 111.50.50.50; echo 198.51.100.7; pwd")
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.output.contains("10.50.0.1"));
        assert!(outcome.output.contains("host 111.50.50.50"));
        assert!(!outcome.output.contains("198.51.100.7"));
        let shadow = home.path().join("shadow").join(config::project_name(project.path()));
        assert!(outcome.output.contains(&shadow.display().to_string()));
        assert_eq!(
            fs::read_to_string(shadow.join("target.txt")).unwrap(),
            "host 10.50.0.1\n"
        );
    }

    #[test]
    fn child_exit_code_is_propagated() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let mut engine = engine(home.path(), project.path());
        let outcome = engine.exec("echo failing >&2; exit 7").unwrap();
        assert_eq!(outcome.exit_code, 7);
        assert_eq!(outcome.output, "failing\n");
    }
}
