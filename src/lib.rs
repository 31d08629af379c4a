#![forbid(unsafe_code)]
//! Infrastructure sanitizer library.
//!
//! Keeps real IP addresses and internal hostnames out of an AI coding
//! assistant's context. Values are swapped for stable placeholders on the way
//! in (file reads, edits, tool output) and swapped back on the way out, when
//! a command needs to run against real infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Hook envelope (stdin JSON)                     │
//! │        hook::HookInput  →  hook::OperationEvent                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Decision engine                           │
//! │  rules (protected / blocked / real-exec)  →  engine::Engine      │
//! │  session (start sweep, stop sync)   exec (shadow-tree run)       │
//! └─────────────────────────────────────────────────────────────────┘
//!                │                                  │
//!                ▼                                  ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────────┐
//! │     Discovery + mapping       │  │        Persistence           │
//! │  discover → placeholder       │  │  store::MappingStore         │
//! │  substitute (Aho-Corasick)    │  │  lease (file / memory)       │
//! └──────────────────────────────┘  └──────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             sync: project tree ↔ unsanitized shadow              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use infra_sanitizer::{Engine, HookInput};
//!
//! let input: HookInput = serde_json::from_str(envelope)?;
//! let mut engine = Engine::from_env(&project_root)?;
//! let decision = engine.decide(&input.event(), input.tool_input.as_ref())?;
//! infra_sanitizer::hook::write_decision(decision)?;
//! ```

pub mod cli;
pub mod config;
pub mod discover;
pub mod engine;
pub mod error;
pub mod exec;
pub mod hook;
pub mod ip;
pub mod lease;
pub mod logging;
pub mod mapping;
pub mod placeholder;
pub mod rules;
pub mod session;
pub mod store;
pub mod substitute;
pub mod sync;

pub use config::Config;
pub use discover::Discoverer;
pub use engine::Engine;
pub use error::{Error, Result};
pub use exec::ExecOutcome;
pub use hook::{Decision, HookInput, HookOutput, HookSpecificOutput, OperationEvent};
pub use lease::{FileLease, Lease, LeaseGuard, MemoryLease};
pub use mapping::{Mapping, MappingSet};
pub use placeholder::{PlaceholderGenerator, PlaceholderPolicy, ValueKind};
pub use rules::HookRules;
pub use session::SessionReport;
pub use store::MappingStore;
pub use substitute::{Substitution, apply, apply_with_fallback, reverse_apply, scrub_ips};
pub use sync::{EligibleFiles, Exclusions, SyncReport, WalkOptions, sync_dir};
