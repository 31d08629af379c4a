//! CLI argument parsing and command handling.
//!
//! Two families of subcommands share one binary:
//!
//! - **Hook commands** read a Claude Code envelope from stdin and answer on
//!   stdout. They fail open: any error is logged and the operation proceeds
//!   unchanged with exit code 0.
//! - **Direct commands** (`sanitize-ips`, `scrub-ips`, `exec`, `init`) are run
//!   by people or by rewritten commands. They fail closed.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::env;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::config;
use crate::engine::Engine;
use crate::error::Result;
use crate::hook::{self, Decision, DEFAULT_MAX_INPUT_BYTES, HookInput, OperationEvent};
use crate::substitute;

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_TIMESTAMP: Option<&str> = option_env!("VERGEN_BUILD_TIMESTAMP");
const RUSTC_SEMVER: Option<&str> = option_env!("VERGEN_RUSTC_SEMVER");
const CARGO_TARGET: Option<&str> = option_env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Keeps real IPs and hostnames away from an AI coding assistant.
///
/// Files, edits and tool output are rewritten to stable placeholders before
/// the assistant sees them. Commands that need real infrastructure are
/// rerouted through `sanitizer exec`, which runs them against an unsanitized
/// shadow copy of the project.
#[derive(Parser, Debug)]
#[command(name = "sanitizer")]
#[command(version, about, long_about = None)]
#[command(after_help = "Run 'sanitizer init' to create the config file.")]
pub struct Cli {
    /// Increase diagnostic output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sanitize stdin to stdout, learning and persisting new values
    #[command(name = "sanitize-ips")]
    SanitizeIps,

    /// Replace every IPv4 address on stdin with its deterministic placeholder
    #[command(name = "scrub-ips")]
    ScrubIps,

    /// Handle any hook event, dispatching on `hook_event_name`
    #[command(name = "hook")]
    Hook,

    /// PreToolUse hook for Read, Write, Edit, MultiEdit and NotebookEdit
    #[command(name = "hook-file-access")]
    HookFileAccess,

    /// PreToolUse hook for Bash
    #[command(name = "hook-bash")]
    HookBash,

    /// PostToolUse hook that sanitizes tool output
    #[command(name = "hook-post")]
    HookPost,

    /// SessionStart hook that sanitizes the whole project
    #[command(name = "hook-session-start")]
    HookSessionStart,

    /// Stop hook that refreshes the unsanitized shadow copy
    #[command(name = "hook-session-stop")]
    HookSessionStop,

    /// Run a command against the shadow copy with real values
    #[command(name = "exec")]
    Exec {
        /// Command line, passed to the configured shell as one argument
        command: String,
    },

    /// Create the config file if missing and print its path
    #[command(name = "init")]
    Init,

    /// Show version and build information
    #[command(name = "version")]
    Version,
}

/// Which events a hook subcommand is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookScope {
    Any,
    FileAccess,
    Bash,
    Post,
    SessionStart,
    SessionStop,
}

impl HookScope {
    /// Whether this hook handles `event`. Others are allowed untouched, so a
    /// hook registered under the wrong matcher does nothing.
    #[must_use]
    pub const fn accepts(self, event: &OperationEvent) -> bool {
        match self {
            Self::Any => true,
            Self::FileAccess => matches!(
                event,
                OperationEvent::FileRead { .. }
                    | OperationEvent::FileWrite { .. }
                    | OperationEvent::FileEdit { .. }
            ),
            Self::Bash => matches!(event, OperationEvent::ShellCommand { .. }),
            Self::Post => matches!(event, OperationEvent::ToolOutput { .. }),
            Self::SessionStart => matches!(event, OperationEvent::SessionStart),
            Self::SessionStop => matches!(event, OperationEvent::SessionStop),
        }
    }
}

impl Command {
    const fn hook_scope(&self) -> Option<HookScope> {
        match self {
            Self::Hook => Some(HookScope::Any),
            Self::HookFileAccess => Some(HookScope::FileAccess),
            Self::HookBash => Some(HookScope::Bash),
            Self::HookPost => Some(HookScope::Post),
            Self::HookSessionStart => Some(HookScope::SessionStart),
            Self::HookSessionStop => Some(HookScope::SessionStop),
            _ => None,
        }
    }
}

/// Run the parsed command and return the process exit code.
///
/// # Errors
///
/// Only direct commands return errors; hook commands swallow theirs.
pub fn run(cli: Cli) -> Result<i32> {
    if let Some(scope) = cli.command.hook_scope() {
        run_hook(scope);
        return Ok(0);
    }
    match cli.command {
        Command::SanitizeIps => sanitize_stdin(),
        Command::ScrubIps => scrub_stdin(),
        Command::Exec { command } => exec(&command),
        Command::Init => init(),
        Command::Version => {
            print_version();
            Ok(0)
        }
        Command::Hook
        | Command::HookFileAccess
        | Command::HookBash
        | Command::HookPost
        | Command::HookSessionStart
        | Command::HookSessionStop => Ok(0),
    }
}

/// Fail-open hook adapter.
fn run_hook(scope: HookScope) {
    match handle_hook(scope) {
        Ok(decision) => {
            if let Err(e) = hook::write_decision(decision) {
                tracing::warn!(error = %e, "failed to write hook response");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "sanitizer hook failed; allowing operation unchanged");
        }
    }
}

fn handle_hook(scope: HookScope) -> Result<Decision> {
    let input = hook::read_hook_input(DEFAULT_MAX_INPUT_BYTES)?;
    let event = input.event();
    if !scope.accepts(&event) || event == OperationEvent::Ignored {
        tracing::debug!(event = event.label(), ?scope, "event outside hook scope");
        return Ok(Decision::Allow);
    }

    let project_root = project_root(&input)?;
    let mut engine = Engine::from_env(&project_root)?;
    let decision = engine.decide(&event, input.tool_input.as_ref())?;
    if let Decision::Deny { reason } = &decision {
        hook::print_deny_notice(&deny_subject(&event), reason);
    }
    Ok(decision)
}

fn project_root(input: &HookInput) -> Result<PathBuf> {
    match &input.cwd {
        Some(cwd) if !cwd.as_os_str().is_empty() => Ok(cwd.clone()),
        _ => Ok(env::current_dir()?),
    }
}

fn deny_subject(event: &OperationEvent) -> String {
    match event {
        OperationEvent::FileRead { path }
        | OperationEvent::FileWrite { path, .. }
        | OperationEvent::FileEdit { path, .. } => path.clone(),
        OperationEvent::ShellCommand { command } => command.clone(),
        other => other.label().to_string(),
    }
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    io::stdin().read_to_string(&mut text)?;
    Ok(text)
}

fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn sanitize_stdin() -> Result<i32> {
    let text = read_stdin()?;
    let mut engine = Engine::from_env(&env::current_dir()?)?;
    write_stdout(&engine.sanitize_text(&text)?)?;
    Ok(0)
}

fn scrub_stdin() -> Result<i32> {
    let text = read_stdin()?;
    write_stdout(&substitute::scrub_ips(&text))?;
    Ok(0)
}

fn exec(command: &str) -> Result<i32> {
    let mut engine = Engine::from_env(&env::current_dir()?)?;
    let outcome = engine.exec(command)?;
    write_stdout(&outcome.output)?;
    Ok(outcome.exit_code)
}

fn init() -> Result<i32> {
    let path = config::config_path()?;
    if config::initialize_if_needed(&path)? {
        eprintln!("{} {}", "Created".green().bold(), path.display());
    } else {
        eprintln!("{} {}", "Exists".bright_black(), path.display());
    }
    println!("{}", path.display());
    Ok(0)
}

/// Print version and build information to stderr.
fn print_version() {
    eprintln!("{} {}", "sanitizer".cyan().bold(), PKG_VERSION);
    if let Some(ts) = BUILD_TIMESTAMP {
        let date = ts.split('T').next().unwrap_or(ts);
        eprintln!("  {} {}", "Built:".bright_black(), date);
    }
    if let Some(rustc) = RUSTC_SEMVER {
        eprintln!("  {} {}", "Rustc:".bright_black(), rustc);
    }
    if let Some(target) = CARGO_TARGET {
        eprintln!("  {} {}", "Target:".bright_black(), target);
    }
}
