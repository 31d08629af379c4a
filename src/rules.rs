//! Rule sets consulted by the decision engine.
//!
//! Three families:
//!
//! - **Protected paths**: file-tool targets that are always denied (the
//!   config file, its lock file, anything inside the shadow base).
//! - **Blocked commands**: shell commands that mention those locations.
//! - **Real-execution commands**: shell commands that must see real values
//!   and are rerouted through `exec`.
//!
//! Rules are built once from config and handed to the engine, so tests can
//! inject their own.

use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::lease::lock_path;

/// Real-execution patterns that are always active.
pub const DEFAULT_REAL_EXEC_PATTERNS: &[(&str, &str)] = &[
    ("powershell", r"(?i)^\s*powershell"),
    ("pwsh", r"(?i)^\s*pwsh"),
    ("ps1-script", r#"(?i)\.ps1(\s|$|")"#),
    ("call-operator", r"^\s*&\s"),
    ("ansible", r"(?i)^\s*ansible\b"),
    ("awx", r"(?i)^\s*awx\b"),
];

/// A named regex rule.
#[derive(Debug, Clone)]
pub struct CommandRule {
    pub name: String,
    pub regex: Regex,
    pub reason: String,
}

impl CommandRule {
    /// Compile a rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if `pattern` is not a valid regex.
    pub fn new(name: impl Into<String>, pattern: &str, reason: impl Into<String>) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            regex,
            reason: reason.into(),
        })
    }

    #[must_use]
    pub fn is_match(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

/// Paths the assistant's file tools may not touch.
#[derive(Debug, Clone)]
enum Protected {
    /// Exactly this file.
    File(PathBuf),
    /// Anything strictly inside this directory.
    Interior(PathBuf),
}

/// Every rule the engine consults.
#[derive(Debug, Clone, Default)]
pub struct HookRules {
    protected: Vec<Protected>,
    blocked_commands: Vec<CommandRule>,
    real_exec: Vec<CommandRule>,
}

impl HookRules {
    /// No rules at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Standard rules for a deployment.
    ///
    /// Protects `config_path`, its lock file, the interior of `shadow_root`
    /// and the interior of `shadow_base`; blocks commands mentioning any of
    /// them; reroutes the default real-execution patterns plus
    /// `extra_real_exec`.
    ///
    /// `shadow_root` is this project's concrete shadow tree and is always
    /// protected. `shadow_base` covers every project's tree and is skipped
    /// when it resolves to the home or root directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if an extra pattern does not compile.
    pub fn new(
        config_path: &Path,
        shadow_base: &Path,
        shadow_root: &Path,
        extra_real_exec: &[String],
    ) -> Result<Self> {
        let mut rules = Self::empty()
            .protect_file(config_path)
            .protect_file(&lock_path(config_path));

        if let Some(name) = config_path.file_name() {
            let pattern = regex::escape(&name.to_string_lossy());
            rules = rules.block_command(
                "config-file",
                &pattern,
                "command references the sanitizer configuration",
            )?;
        }

        rules = rules.protect_interior(shadow_root).block_command(
            "shadow-root",
            &exact_location_pattern(shadow_root),
            "command references the unsanitized shadow tree",
        )?;

        if is_too_broad(shadow_base) {
            tracing::warn!(
                base = %shadow_base.display(),
                "shadow base is the home or root directory; protecting only this project's shadow tree"
            );
        } else {
            rules = rules.protect_interior(shadow_base).block_command(
                "shadow-tree",
                &location_pattern(shadow_base),
                "command references the unsanitized shadow tree",
            )?;
        }

        for (name, pattern) in DEFAULT_REAL_EXEC_PATTERNS {
            rules = rules.real_exec(name, pattern)?;
        }
        for (i, pattern) in extra_real_exec.iter().enumerate() {
            rules = rules.real_exec(&format!("custom-{i}"), pattern)?;
        }
        Ok(rules)
    }

    #[must_use]
    pub fn protect_file(mut self, path: &Path) -> Self {
        self.protected.push(Protected::File(normalize_path(path)));
        self
    }

    #[must_use]
    pub fn protect_interior(mut self, dir: &Path) -> Self {
        self.protected.push(Protected::Interior(normalize_path(dir)));
        self
    }

    /// Add a blocked-command rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if `pattern` does not compile.
    pub fn block_command(mut self, name: &str, pattern: &str, reason: &str) -> Result<Self> {
        self.blocked_commands.push(CommandRule::new(name, pattern, reason)?);
        Ok(self)
    }

    /// Add a real-execution rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if `pattern` does not compile.
    pub fn real_exec(mut self, name: &str, pattern: &str) -> Result<Self> {
        self.real_exec.push(CommandRule::new(
            name,
            pattern,
            "command needs real infrastructure values",
        )?);
        Ok(self)
    }

    /// Whether `path` is protected. Relative paths resolve against `base`.
    #[must_use]
    pub fn is_protected_path(&self, path: &Path, base: &Path) -> bool {
        let resolved = if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&base.join(path))
        };
        self.protected.iter().any(|rule| match rule {
            Protected::File(file) => same_path(&resolved, file),
            Protected::Interior(dir) => {
                resolved.starts_with(dir) && !same_path(&resolved, dir)
            }
        })
    }

    /// First blocked-command rule matching `command`.
    ///
    /// Backslashes are treated as `/` so Windows-style paths match too.
    #[must_use]
    pub fn blocked_command(&self, command: &str) -> Option<&CommandRule> {
        let normalized = command.replace('\\', "/");
        self.blocked_commands
            .iter()
            .find(|rule| rule.is_match(&normalized))
    }

    /// First real-execution rule matching `command`.
    #[must_use]
    pub fn real_exec_rule(&self, command: &str) -> Option<&CommandRule> {
        self.real_exec.iter().find(|rule| rule.is_match(command))
    }
}

/// Lexical normalization: drops `.` and resolves `..` without touching the
/// filesystem, since targets may not exist yet.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn same_path(a: &Path, b: &Path) -> bool {
    if cfg!(windows) {
        a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
    } else {
        a == b
    }
}

fn is_too_broad(dir: &Path) -> bool {
    let dir = normalize_path(dir);
    dir.parent().is_none() || dirs::home_dir().is_some_and(|home| same_path(&dir, &home))
}

/// Regex for mentions of `dir` in a command: its last two components joined
/// by either separator, so absolute, `~` and `$HOME` spellings all match.
fn location_pattern(dir: &Path) -> String {
    let parts: Vec<String> = dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(regex::escape(&part.to_string_lossy())),
            _ => None,
        })
        .collect();
    let tail = &parts[parts.len().saturating_sub(2)..];
    format!(r"(?i){}([/\\]|$|\s|'|\x22)", tail.join(r"[/\\]"))
}

/// Regex for mentions of exactly `dir`: its full path, plus `~`, `$HOME`
/// and `${HOME}` spellings when it lives under the home directory.
fn exact_location_pattern(dir: &Path) -> String {
    let dir = normalize_path(dir);
    let mut spellings = vec![separated(&dir)];
    let home_relative = dirs::home_dir()
        .and_then(|home| dir.strip_prefix(home).ok().map(Path::to_path_buf))
        .filter(|rest| rest.components().next().is_some());
    if let Some(rest) = home_relative {
        spellings.push(format!(r"(~|\$HOME|\$\{{HOME\}})[/\\]{}", separated(&rest)));
    }
    format!(r"(?i)({})([/\\]|$|\s|'|\x22)", spellings.join("|"))
}

/// Escaped path components joined by either separator.
fn separated(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(regex::escape(&part.to_string_lossy())),
            _ => None,
        })
        .collect();
    let joined = parts.join(r"[/\\]");
    if path.has_root() {
        format!(r"[/\\]{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> HookRules {
        HookRules::new(
            Path::new("/home/dev/.claude/sanitizer/sanitizer.json"),
            Path::new("/home/dev/.claude/unsanitized"),
            Path::new("/home/dev/.claude/unsanitized/app"),
            &[r"(?i)^\s*terraform\s+apply".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn config_file_and_lock_are_protected() {
        let rules = rules();
        let cwd = Path::new("/work/app");
        assert!(rules.is_protected_path(
            Path::new("/home/dev/.claude/sanitizer/sanitizer.json"),
            cwd
        ));
        assert!(rules.is_protected_path(
            Path::new("/home/dev/.claude/sanitizer/sanitizer.json.lock"),
            cwd
        ));
        assert!(!rules.is_protected_path(Path::new("/home/dev/.claude/sanitizer/notes.md"), cwd));
    }

    #[test]
    fn shadow_interior_is_protected_after_normalization() {
        let rules = rules();
        let cwd = Path::new("/home/dev/.claude/sanitizer");
        assert!(rules.is_protected_path(Path::new("../unsanitized/app/hosts.ini"), cwd));
        assert!(rules.is_protected_path(
            Path::new("/home/dev/.claude/./unsanitized/app/x"),
            Path::new("/")
        ));
        assert!(!rules.is_protected_path(Path::new("/home/dev/.claude/unsanitized"), cwd));
        assert!(!rules.is_protected_path(Path::new("/work/app/src/main.rs"), cwd));
    }

    #[test]
    fn commands_touching_internals_are_blocked() {
        let rules = rules();
        for command in [
            "cat ~/.claude/sanitizer/sanitizer.json",
            "type C:\\Users\\dev\\.claude\\sanitizer\\sanitizer.json",
            "ls ~/.claude/unsanitized/app",
            "grep -r 10.0 \"$HOME/.claude/unsanitized\"",
            "cp sanitizer.json.lock /tmp",
        ] {
            assert!(rules.blocked_command(command).is_some(), "{command}");
        }
        assert!(rules.blocked_command("ls ~/.claude/unsanitized-notes").is_none());
        assert!(rules.blocked_command("cargo build").is_none());
    }

    #[test]
    fn real_exec_detection() {
        let rules = rules();
        for command in [
            "powershell -File deploy.ps1",
            "  PWSH -c Get-Item",
            "./scripts/setup.ps1 -Force",
            "& ./run.ps1",
            "ansible-playbook -i hosts site.yml",
            "awx job_templates launch 7",
            "terraform apply -auto-approve",
        ] {
            assert!(rules.real_exec_rule(command).is_some(), "{command}");
        }
        for command in ["ls -la", "echo powershell", "cat notes.ps1x", "awxcli"] {
            assert!(rules.real_exec_rule(command).is_none(), "{command}");
        }
    }

    #[test]
    fn invalid_custom_pattern_is_an_error() {
        let err = HookRules::new(
            Path::new("/cfg/sanitizer.json"),
            Path::new("/srv/shadow"),
            Path::new("/srv/shadow/app"),
            &["(unclosed".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Pattern { .. }));
    }

    #[test]
    fn root_shadow_base_still_protects_the_project_tree() {
        let rules = HookRules::new(
            Path::new("/cfg/sanitizer.json"),
            Path::new("/"),
            Path::new("/app.real"),
            &[],
        )
        .unwrap();
        assert!(!rules.is_protected_path(Path::new("/etc/hosts"), Path::new("/")));
        assert!(rules.blocked_command("cat /etc/hosts").is_none());
        assert!(rules.is_protected_path(Path::new("/app.real/hosts.ini"), Path::new("/")));
        assert!(rules.blocked_command("cat /app.real/hosts.ini").is_some());
        assert!(rules.blocked_command("ls /app.realistic").is_none());
    }

    #[test]
    fn mid_component_template_protects_the_concrete_tree() {
        // `/srv/shadow-{project}`: the base `/srv/shadow-` is not a directory
        // of its own, so the concrete root carries the protection.
        let rules = HookRules::new(
            Path::new("/cfg/sanitizer.json"),
            Path::new("/srv/shadow-"),
            Path::new("/srv/shadow-webapp"),
            &[],
        )
        .unwrap();
        let cwd = Path::new("/work/webapp");
        assert!(rules.is_protected_path(Path::new("/srv/shadow-webapp/hosts.ini"), cwd));
        assert!(rules.is_protected_path(Path::new("../../srv/shadow-webapp/a/b"), cwd));
        assert!(!rules.is_protected_path(Path::new("/srv/shadow-webapp2/x"), cwd));
        for command in [
            "cat /srv/shadow-webapp/hosts.ini",
            "ls /srv/shadow-webapp",
            "grep -r db \"/srv/shadow-webapp\"",
            "type C:\\srv\\shadow-webapp\\hosts.ini",
        ] {
            assert!(rules.blocked_command(command).is_some(), "{command}");
        }
        assert!(rules.blocked_command("cat /srv/shadow-webapp2/x").is_none());
    }

    #[test]
    fn home_relative_spellings_of_the_tree_are_blocked() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        if home.parent().is_none() {
            return;
        }
        let root = home.join("unsanitized-webapp");
        let rules =
            HookRules::new(Path::new("/cfg/sanitizer.json"), &home, &root, &[]).unwrap();
        for command in [
            "cat ~/unsanitized-webapp/hosts.ini",
            "ls $HOME/unsanitized-webapp",
            "ls ${HOME}/unsanitized-webapp/",
        ] {
            assert!(rules.blocked_command(command).is_some(), "{command}");
        }
        assert!(rules.blocked_command("ls ~/projects").is_none());
    }

    #[test]
    fn normalize_resolves_parent_components() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
