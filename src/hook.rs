//! Claude Code hook protocol handling.
//!
//! Decodes the JSON envelope on stdin into a typed [`OperationEvent`] and
//! renders a [`Decision`] back into the response envelope on stdout. Nothing
//! here looks at mappings or files; that is the engine's job.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Default cap on hook input size.
pub const DEFAULT_MAX_INPUT_BYTES: usize = 16 * 1024 * 1024;

/// Input envelope sent by Claude Code on stdin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    /// `PreToolUse`, `PostToolUse`, `SessionStart`, `Stop`, ...
    #[serde(default)]
    pub hook_event_name: Option<String>,

    /// The tool being invoked (e.g. "Bash", "Read", "Write").
    #[serde(default)]
    pub tool_name: Option<String>,

    /// Tool-specific parameters, kept raw so rewrites can preserve fields
    /// this crate does not know about.
    #[serde(default)]
    pub tool_input: Option<Value>,

    /// Tool result (`PostToolUse` only).
    #[serde(default, alias = "tool_output")]
    pub tool_response: Option<Value>,

    /// Working directory of the assistant session.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// A decoded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationEvent {
    FileRead { path: String },
    FileWrite { path: String, content: String },
    /// `Edit`, `MultiEdit` and `NotebookEdit`; `new_string` holds every
    /// replacement text joined by newlines.
    FileEdit { path: String, new_string: String },
    ShellCommand { command: String },
    ToolOutput { tool_name: String, output: Value },
    SessionStart,
    SessionStop,
    Ignored,
}

impl OperationEvent {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::FileRead { .. } => "file-read",
            Self::FileWrite { .. } => "file-write",
            Self::FileEdit { .. } => "file-edit",
            Self::ShellCommand { .. } => "shell-command",
            Self::ToolOutput { .. } => "tool-output",
            Self::SessionStart => "session-start",
            Self::SessionStop => "session-stop",
            Self::Ignored => "ignored",
        }
    }
}

impl HookInput {
    fn input_str(&self, key: &str) -> Option<&str> {
        self.tool_input
            .as_ref()?
            .get(key)?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    /// Decode the envelope. Anything unrecognized is [`OperationEvent::Ignored`].
    #[must_use]
    pub fn event(&self) -> OperationEvent {
        match self.hook_event_name.as_deref() {
            Some("PreToolUse") => self.pre_tool_event(),
            Some("PostToolUse") => self.post_tool_event(),
            Some("SessionStart") => OperationEvent::SessionStart,
            Some("Stop" | "SessionEnd") => OperationEvent::SessionStop,
            _ => OperationEvent::Ignored,
        }
    }

    fn pre_tool_event(&self) -> OperationEvent {
        let tool = self.tool_name.as_deref().unwrap_or_default();
        let file_path = || self.input_str("file_path").map(str::to_string);

        let event = match tool {
            "Bash" => self.input_str("command").map(|command| OperationEvent::ShellCommand {
                command: command.to_string(),
            }),
            "Read" => file_path().map(|path| OperationEvent::FileRead { path }),
            "Write" => file_path().map(|path| OperationEvent::FileWrite {
                path,
                content: self.input_str("content").unwrap_or_default().to_string(),
            }),
            "Edit" | "MultiEdit" => file_path().map(|path| OperationEvent::FileEdit {
                path,
                new_string: self.edit_texts().join("\n"),
            }),
            "NotebookEdit" => self
                .input_str("notebook_path")
                .map(|path| OperationEvent::FileEdit {
                    path: path.to_string(),
                    new_string: self.input_str("new_source").unwrap_or_default().to_string(),
                }),
            _ => None,
        };
        event.unwrap_or(OperationEvent::Ignored)
    }

    fn edit_texts(&self) -> Vec<&str> {
        let mut texts: Vec<&str> = self.input_str("new_string").into_iter().collect();
        if let Some(edits) = self
            .tool_input
            .as_ref()
            .and_then(|input| input.get("edits"))
            .and_then(Value::as_array)
        {
            texts.extend(
                edits
                    .iter()
                    .filter_map(|edit| edit.get("new_string").and_then(Value::as_str)),
            );
        }
        texts
    }

    fn post_tool_event(&self) -> OperationEvent {
        match &self.tool_response {
            Some(output) if !output.is_null() => OperationEvent::ToolOutput {
                tool_name: self.tool_name.clone().unwrap_or_default(),
                output: output.clone(),
            },
            _ => OperationEvent::Ignored,
        }
    }
}

/// The engine's verdict on one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Proceed unchanged; nothing is written to stdout.
    Allow,
    /// Block the tool call.
    Deny { reason: String },
    /// Proceed with this full replacement `tool_input`.
    UpdateInput { tool_input: Value },
    /// Show the assistant this output instead.
    ReplaceOutput { output: Value },
}

impl Decision {
    /// Response envelope, or `None` for [`Decision::Allow`].
    #[must_use]
    pub fn into_output(self) -> Option<HookOutput> {
        let specific = match self {
            Self::Allow => return None,
            Self::Deny { reason } => HookSpecificOutput {
                permission_decision: Some("deny"),
                permission_decision_reason: Some(format_denial_message(&reason)),
                ..HookSpecificOutput::new(PRE_TOOL_USE)
            },
            Self::UpdateInput { tool_input } => HookSpecificOutput {
                permission_decision: Some("allow"),
                updated_input: Some(tool_input),
                ..HookSpecificOutput::new(PRE_TOOL_USE)
            },
            Self::ReplaceOutput { output } => HookSpecificOutput {
                updated_output: Some(output),
                ..HookSpecificOutput::new(POST_TOOL_USE)
            },
        };
        Some(HookOutput {
            hook_specific_output: specific,
        })
    }
}

const PRE_TOOL_USE: &str = "PreToolUse";
const POST_TOOL_USE: &str = "PostToolUse";

/// Response envelope written to stdout.
#[derive(Debug, Serialize)]
pub struct HookOutput {
    #[serde(rename = "hookSpecificOutput")]
    pub hook_specific_output: HookSpecificOutput,
}

/// Body of the response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_output: Option<Value>,
}

impl HookSpecificOutput {
    const fn new(hook_event_name: &'static str) -> Self {
        Self {
            hook_event_name,
            permission_decision: None,
            permission_decision_reason: None,
            updated_input: None,
            updated_output: None,
        }
    }
}

/// Error type for reading and parsing hook input.
#[derive(Debug, Error)]
pub enum HookReadError {
    #[error("failed to read hook input: {0}")]
    Io(#[from] io::Error),
    #[error("hook input exceeds {0} bytes")]
    InputTooLarge(usize),
    #[error("invalid hook JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read and parse hook input from stdin.
///
/// # Errors
///
/// Returns [`HookReadError::Io`] if stdin cannot be read, [`HookReadError::Json`]
/// if the input is not valid hook JSON, or [`HookReadError::InputTooLarge`] if
/// the input exceeds `max_bytes`.
pub fn read_hook_input(max_bytes: usize) -> Result<HookInput, HookReadError> {
    let input = read_stdin(max_bytes)?;
    parse_hook_input(&input)
}

/// Parse a hook envelope. Blank input is an empty envelope.
///
/// # Errors
///
/// Returns [`HookReadError::Json`] for malformed JSON.
pub fn parse_hook_input(input: &str) -> Result<HookInput, HookReadError> {
    if input.trim().is_empty() {
        return Ok(HookInput::default());
    }
    Ok(serde_json::from_str(input)?)
}

fn read_stdin(max_bytes: usize) -> Result<String, HookReadError> {
    let mut input = String::with_capacity(256);
    {
        let stdin = io::stdin();
        // Read up to limit + 1 to detect overflow
        let mut handle = stdin.lock().take(max_bytes as u64 + 1);
        handle.read_to_string(&mut input)?;
    }
    if input.len() > max_bytes {
        return Err(HookReadError::InputTooLarge(input.len()));
    }
    Ok(input)
}

/// Write the response for `decision` to stdout. Allow writes nothing.
///
/// # Errors
///
/// Returns an error if stdout cannot be written.
pub fn write_decision(decision: Decision) -> io::Result<()> {
    let Some(output) = decision.into_output() else {
        return Ok(());
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer(&mut handle, &output)?;
    writeln!(handle)?;
    handle.flush()
}

/// Configure colored output based on TTY detection.
pub fn configure_colors() {
    if !io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
}

/// Reason text sent to the assistant with a denial.
#[must_use]
pub fn format_denial_message(reason: &str) -> String {
    format!(
        "BLOCKED by sanitizer\n\n\
         Reason: {reason}\n\n\
         Sanitizer internals and unsanitized copies are off limits. \
         Work with the sanitized project tree instead."
    )
}

/// Print a short colored deny notice to stderr for the human operator.
pub fn print_deny_notice(subject: &str, reason: &str) {
    let stderr = io::stderr();
    let mut handle = stderr.lock();
    let _ = writeln!(
        handle,
        "{} {} {}",
        "sanitizer".red().bold(),
        "blocked:".red(),
        truncate_for_display(subject, 80).yellow()
    );
    let _ = writeln!(handle, "  {} {}", "reason:".bright_black(), reason);
}

/// Truncate a string for display, appending "..." if truncated.
fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        // Find a safe UTF-8 boundary for truncation
        let target = max_len.saturating_sub(3);
        let boundary = s
            .char_indices()
            .take_while(|(i, _)| *i < target)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}...", &s[..boundary])
    }
}
