//! Diagnostics and the decision log.
//!
//! Two separate channels:
//!
//! - `tracing` diagnostics, installed by [`init_tracing`], always written to
//!   stderr so hook stdout carries nothing but the response envelope.
//! - An optional append-only decision log (`log` section of the config) with
//!   one line per non-trivial decision, in text or JSON.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::config::expand_tilde;

/// Environment variable holding the `tracing` filter directive.
pub const ENV_LOG_FILTER: &str = "SANITIZER_LOG";

// ============================================================================
// Configuration Types
// ============================================================================

/// Decision log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether the decision log is written at all.
    pub enabled: bool,
    /// Path to the log file. Supports ~ expansion.
    pub file: Option<String>,
    /// Output format: "text" or "json".
    pub format: LogFormat,
    /// Which decision kinds to record.
    pub events: LogEventFilter,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter for which decisions to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEventFilter {
    pub deny: bool,
    pub rewrite: bool,
    pub session: bool,
}

impl Default for LogEventFilter {
    fn default() -> Self {
        Self {
            deny: true,
            rewrite: true,
            session: true,
        }
    }
}

// ============================================================================
// Log Entry
// ============================================================================

/// What kind of decision an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogEvent {
    /// An operation was blocked.
    Deny,
    /// A tool input was rewritten (sanitized content or wrapped command).
    UpdateInput,
    /// A tool output was sanitized.
    ReplaceOutput,
    /// Session start finished its sweep.
    SessionStart,
    /// Session stop finished its sync.
    SessionStop,
    /// A wrapped command ran against the shadow tree.
    Exec,
}

impl LogEvent {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::UpdateInput => "update-input",
            Self::ReplaceOutput => "replace-output",
            Self::SessionStart => "session-start",
            Self::SessionStop => "session-stop",
            Self::Exec => "exec",
        }
    }
}

/// A single decision log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub event: LogEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(event: LogEvent) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            event,
            tool: None,
            subject: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// The path or command the decision was about.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Format as text log line.
    #[must_use]
    pub fn format_text(&self) -> String {
        let mut parts = Vec::with_capacity(5);
        parts.push(format!("[{}]", self.timestamp));
        parts.push(self.event.label().to_uppercase());
        if let Some(ref tool) = self.tool {
            parts.push(tool.clone());
        }
        if let Some(ref subject) = self.subject {
            parts.push(format!("\"{subject}\""));
        }
        if let Some(ref detail) = self.detail {
            parts.push(format!("-- {detail}"));
        }
        parts.join(" ")
    }

    /// Format as JSON line.
    #[must_use]
    pub fn format_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// Logger
// ============================================================================

/// Appends decision entries to the configured file.
pub struct DecisionLogger {
    config: LoggingConfig,
    writer: Mutex<BufWriter<File>>,
}

impl DecisionLogger {
    /// Open the logger. `None` when disabled, when no file is configured, or
    /// when the file cannot be opened (logged at warn).
    #[must_use]
    pub fn new(config: &LoggingConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let path = expand_tilde(config.file.as_deref()?).ok()?;
        match open_log_file(&path) {
            Ok(file) => Some(Self {
                config: config.clone(),
                writer: Mutex::new(BufWriter::new(file)),
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "decision log unavailable");
                None
            }
        }
    }

    /// Append `entry` if its event kind is enabled.
    pub fn log(&self, entry: &LogEntry) {
        if !self.should_log(entry.event) {
            return;
        }
        let line = match self.config.format {
            LogFormat::Text => entry.format_text(),
            LogFormat::Json => entry.format_json(),
        };
        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    const fn should_log(&self, event: LogEvent) -> bool {
        match event {
            LogEvent::Deny => self.config.events.deny,
            LogEvent::UpdateInput | LogEvent::ReplaceOutput | LogEvent::Exec => {
                self.config.events.rewrite
            }
            LogEvent::SessionStart | LogEvent::SessionStop => self.config.events.session,
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Install the stderr `tracing` subscriber.
///
/// With `verbose == 0` the filter comes from `SANITIZER_LOG` (default
/// `warn`); each `-v` raises it one level. Installing twice is a no-op.
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_env(ENV_LOG_FILTER).unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}
