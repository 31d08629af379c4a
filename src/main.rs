#![forbid(unsafe_code)]
//! Infrastructure sanitizer for Claude Code.
//!
//! Exit behavior:
//!   - Hook subcommands always exit 0. Allow writes nothing; every other
//!     decision writes one JSON response envelope to stdout.
//!   - `exec` exits with the wrapped command's exit code.
//!   - Other direct commands exit 1 after printing `Error: ...` to stderr.

use clap::Parser;
use colored::Colorize;
use infra_sanitizer::cli::{self, Cli};
use infra_sanitizer::hook;
use infra_sanitizer::logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    hook::configure_colors();
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match cli::run(cli) {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("{} {e}", "Error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
