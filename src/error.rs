//! Error type shared by every component.
//!
//! Hook entry points never surface these to the host: `run_hook` in
//! `cli.rs` logs them and allows the operation unchanged. Direct
//! invocations (`sanitize-ips`, `exec`, `init`) print them and exit non-zero.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the sanitizer core.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write a file.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config document exists but is not valid JSON for our schema.
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The config document is valid JSON but not an object.
    #[error("config {path} is not a JSON object")]
    ConfigShape { path: PathBuf },

    /// A rule or hostname pattern did not compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The substitution automaton could not be built.
    #[error("failed to build substitution table: {0}")]
    Substitution(#[from] aho_corasick::BuildError),

    /// The lease could not be taken even after clearing a stale holder.
    #[error("could not acquire lease {name}: {reason}")]
    Lease { name: String, reason: String },

    /// Every candidate placeholder was already taken.
    #[error("placeholder space exhausted after {attempts} attempts for {value:?}")]
    PlaceholderExhausted { value: String, attempts: u32 },

    /// The home directory could not be determined.
    #[error("could not determine home directory")]
    NoHomeDirectory,

    /// Spawning or waiting on the wrapped command failed.
    #[error("failed to run {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The hook envelope on stdin could not be read or parsed.
    #[error(transparent)]
    HookInput(#[from] crate::hook::HookReadError),

    /// Generic I/O error without a useful path.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Generic JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
