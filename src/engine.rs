//! The hook decision engine.
//!
//! One [`Engine`] is built per hook invocation. It owns the loaded config,
//! the live mapping set, the store and the rules, and turns an
//! [`OperationEvent`] into a [`Decision`]:
//!
//! ```text
//! FileRead / FileEdit   protected? -> Deny, else sanitize on disk (+ rewrite edit text)
//! FileWrite             protected? -> Deny, else rewrite content
//! ShellCommand          blocked?   -> Deny, real-exec? -> wrap in `exec`, else Allow
//! ToolOutput            sanitize every string -> ReplaceOutput when changed
//! SessionStart / Stop   sweep / sync, then Allow
//! ```
//!
//! Every method returns `Result`; turning an error into "allow unchanged" is
//! the caller's decision, not the engine's.

use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{self, Config};
use crate::discover::Discoverer;
use crate::error::{Error, Result};
use crate::hook::{Decision, OperationEvent};
use crate::lease::{FileLease, Lease};
use crate::logging::{DecisionLogger, LogEntry, LogEvent};
use crate::mapping::MappingSet;
use crate::rules::{HookRules, normalize_path};
use crate::store::MappingStore;
use crate::substitute::Substitution;
use crate::sync::{Exclusions, MAX_FILE_SIZE, WalkOptions, is_binary};

/// Directory always left alone inside a project (assistant settings).
pub const ASSISTANT_DIR: &str = ".claude";

/// Binary name used in wrapped commands when the real path is unknown.
pub const BIN_NAME: &str = "sanitizer";

/// Tool input fields that carry text headed for disk.
const CONTENT_FIELDS: &[&str] = &["content", "new_string", "old_string", "new_source"];

/// Decides what happens to intercepted operations.
pub struct Engine<L: Lease = FileLease> {
    pub(crate) config: Config,
    pub(crate) store: MappingStore<L>,
    pub(crate) rules: HookRules,
    pub(crate) project_root: PathBuf,
    pub(crate) mappings: MappingSet,
    pub(crate) discoverer: Discoverer,
    exec_program: PathBuf,
    logger: Option<DecisionLogger>,
    substitution: Option<Substitution>,
}

impl Engine<FileLease> {
    /// Engine for `project_root` using the default config location.
    ///
    /// # Errors
    ///
    /// Fails if the config cannot be loaded, a pattern does not compile, or
    /// the home directory is needed and unknown.
    pub fn from_env(project_root: &Path) -> Result<Self> {
        let config_path = config::config_path()?;
        let config = Config::load_from(&config_path)?;
        let store = MappingStore::open(&config_path);
        let rules = HookRules::new(
            &config_path,
            &config.shadow_base()?,
            &config.shadow_root(project_root)?,
            &config.real_exec_patterns,
        )?;
        let engine = Self::new(config, store, rules, project_root)?;
        Ok(engine.with_exec_program(env::current_exe()?))
    }
}

impl<L: Lease> Engine<L> {
    /// Assemble an engine from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if a configured hostname suffix does not
    /// compile.
    pub fn new(
        config: Config,
        store: MappingStore<L>,
        rules: HookRules,
        project_root: &Path,
    ) -> Result<Self> {
        let discoverer = config.discoverer()?;
        let logger = DecisionLogger::new(&config.log);
        Ok(Self {
            mappings: config.mappings.clone(),
            config,
            store,
            rules,
            project_root: normalize_path(project_root),
            discoverer,
            exec_program: PathBuf::from(BIN_NAME),
            logger,
            substitution: None,
        })
    }

    /// Program named in wrapped commands.
    #[must_use]
    pub fn with_exec_program(mut self, program: PathBuf) -> Self {
        self.exec_program = program;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn mappings(&self) -> &MappingSet {
        &self.mappings
    }

    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Shadow tree for this project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHomeDirectory`] if the template needs it.
    pub fn shadow_root(&self) -> Result<PathBuf> {
        self.config.shadow_root(&self.project_root)
    }

    /// Decide on one event. `tool_input` is the raw input for rewrites.
    ///
    /// # Errors
    ///
    /// Propagates store, I/O and pattern errors.
    pub fn decide(&mut self, event: &OperationEvent, tool_input: Option<&Value>) -> Result<Decision> {
        tracing::debug!(event = event.label(), "deciding");
        let decision = match event {
            OperationEvent::FileRead { path } => self.file_read(path)?,
            OperationEvent::FileWrite { path, content } => {
                self.file_write(path, content, tool_input)?
            }
            OperationEvent::FileEdit { path, new_string } => {
                self.file_edit(path, new_string, tool_input)?
            }
            OperationEvent::ShellCommand { command } => self.shell_command(command, tool_input),
            OperationEvent::ToolOutput { tool_name, output } => {
                self.tool_output(tool_name, output)?
            }
            OperationEvent::SessionStart => {
                let report = self.session_start()?;
                self.log(
                    LogEntry::new(LogEvent::SessionStart).detail(format!(
                        "scanned {} files, {} new values, {} sanitized",
                        report.scanned, report.discovered, report.sanitized
                    )),
                );
                Decision::Allow
            }
            OperationEvent::SessionStop => {
                let report = self.session_stop()?;
                self.log(
                    LogEntry::new(LogEvent::SessionStop)
                        .detail(format!("synced {} files", report.total())),
                );
                Decision::Allow
            }
            OperationEvent::Ignored => Decision::Allow,
        };
        Ok(decision)
    }

    fn file_read(&mut self, path: &str) -> Result<Decision> {
        if let Some(deny) = self.deny_protected("Read", path) {
            return Ok(deny);
        }
        self.sanitize_file_in_place(Path::new(path))?;
        Ok(Decision::Allow)
    }

    fn file_write(
        &mut self,
        path: &str,
        content: &str,
        tool_input: Option<&Value>,
    ) -> Result<Decision> {
        if let Some(deny) = self.deny_protected("Write", path) {
            return Ok(deny);
        }
        self.learn(content)?;
        self.rewrite_input("Write", path, tool_input)
    }

    fn file_edit(
        &mut self,
        path: &str,
        new_string: &str,
        tool_input: Option<&Value>,
    ) -> Result<Decision> {
        if let Some(deny) = self.deny_protected("Edit", path) {
            return Ok(deny);
        }
        // The assistant matches `old_string` against what it saw, which is
        // the sanitized file.
        self.sanitize_file_in_place(Path::new(path))?;
        self.learn(new_string)?;
        self.rewrite_input("Edit", path, tool_input)
    }

    fn deny_protected(&self, tool: &str, path: &str) -> Option<Decision> {
        if !self.rules.is_protected_path(Path::new(path), &self.project_root) {
            return None;
        }
        let reason = "access to sanitizer internals is blocked".to_string();
        self.log(
            LogEntry::new(LogEvent::Deny)
                .tool(tool)
                .subject(path)
                .detail(&reason),
        );
        Some(Decision::Deny { reason })
    }

    fn rewrite_input(
        &mut self,
        tool: &str,
        path: &str,
        tool_input: Option<&Value>,
    ) -> Result<Decision> {
        let Some(tool_input) = tool_input else {
            return Ok(Decision::Allow);
        };
        let substitution = self.substitution()?;
        let Some(rewritten) = rewrite_content_fields(tool_input, substitution) else {
            return Ok(Decision::Allow);
        };
        self.log(LogEntry::new(LogEvent::UpdateInput).tool(tool).subject(path));
        Ok(Decision::UpdateInput {
            tool_input: rewritten,
        })
    }

    fn shell_command(&self, command: &str, tool_input: Option<&Value>) -> Decision {
        if let Some(rule) = self.rules.blocked_command(command) {
            tracing::info!(rule = %rule.name, "blocked shell command");
            self.log(
                LogEntry::new(LogEvent::Deny)
                    .tool("Bash")
                    .subject(command)
                    .detail(&rule.reason),
            );
            return Decision::Deny {
                reason: rule.reason.clone(),
            };
        }

        let Some(rule) = self.rules.real_exec_rule(command) else {
            return Decision::Allow;
        };
        tracing::info!(rule = %rule.name, "rerouting command through exec");
        let wrapped = self.wrap_command(command);
        let mut tool_input = tool_input
            .cloned()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        tool_input["command"] = Value::String(wrapped);
        self.log(
            LogEntry::new(LogEvent::UpdateInput)
                .tool("Bash")
                .subject(command)
                .detail(format!("real execution ({})", rule.name)),
        );
        Decision::UpdateInput { tool_input }
    }

    /// `'<program>' exec '<command>'`, single quotes escaped for POSIX shells.
    #[must_use]
    pub fn wrap_command(&self, command: &str) -> String {
        format!(
            "{} exec {}",
            shell_quote(&self.exec_program.to_string_lossy()),
            shell_quote(command)
        )
    }

    fn tool_output(&mut self, tool_name: &str, output: &Value) -> Result<Decision> {
        let mut text = String::new();
        collect_strings(output, &mut text);
        if text.is_empty() {
            return Ok(Decision::Allow);
        }
        self.learn(&text)?;
        let substitution = self.substitution()?;
        let Some(sanitized) = map_strings(output, substitution) else {
            return Ok(Decision::Allow);
        };
        self.log(LogEntry::new(LogEvent::ReplaceOutput).tool(tool_name));
        Ok(Decision::ReplaceOutput { output: sanitized })
    }

    /// Discover new values in `text` and persist them.
    ///
    /// # Errors
    ///
    /// Propagates discovery and store failures.
    pub fn learn(&mut self, text: &str) -> Result<usize> {
        let discovered = self.discoverer.discover(text, &self.mappings)?;
        if discovered.is_empty() {
            return Ok(0);
        }
        let count = discovered.len();
        let recorded = self.store.record(&discovered, self.discoverer.generator())?;
        self.replace_mappings(recorded);
        Ok(count)
    }

    pub(crate) fn replace_mappings(&mut self, mappings: MappingSet) {
        self.mappings = mappings;
        self.substitution = None;
    }

    /// Learn from `text` and return it sanitized.
    ///
    /// # Errors
    ///
    /// See [`Self::learn`].
    pub fn sanitize_text(&mut self, text: &str) -> Result<String> {
        self.learn(text)?;
        Ok(self.substitution()?.apply(text).into_owned())
    }

    /// Real → placeholder substitution for the current mappings.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be compiled.
    pub fn substitution(&mut self) -> Result<&Substitution> {
        let substitution = match self.substitution.take() {
            Some(cached) => cached,
            None => Substitution::new(&self.mappings.all())?,
        };
        Ok(self.substitution.insert(substitution))
    }

    /// Placeholder → real substitution for the current mappings.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be compiled.
    pub fn restoration(&self) -> Result<Substitution> {
        Substitution::new(&self.mappings.reverse())
    }

    /// Exclusions and skip roots used for project walks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHomeDirectory`] if the shadow template needs it.
    pub fn walk_options(&self) -> Result<WalkOptions> {
        let exclusions = Exclusions::new(&self.config.skip_paths).with(ASSISTANT_DIR);
        Ok(WalkOptions::new(exclusions).skip_root(self.shadow_root()?))
    }

    /// Sanitize one project file on disk, saving the pristine original into
    /// the shadow tree. Idempotent.
    ///
    /// Files outside the project, excluded, binary, oversized or not UTF-8
    /// are left alone. Returns whether the file changed.
    ///
    /// # Errors
    ///
    /// Propagates read, write and store failures.
    pub fn sanitize_file_in_place(&mut self, path: &Path) -> Result<bool> {
        let resolved = if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.project_root.join(path))
        };
        let Ok(relative) = resolved.strip_prefix(&self.project_root) else {
            tracing::debug!(path = %resolved.display(), "outside project; not sanitizing");
            return Ok(false);
        };
        let relative = relative.to_path_buf();
        let options = self.walk_options()?;
        if options.exclusions.matches(&relative.to_string_lossy())
            || options.skip_roots.iter().any(|root| resolved.starts_with(root))
        {
            return Ok(false);
        }

        let Ok(meta) = fs::symlink_metadata(&resolved) else {
            return Ok(false);
        };
        if !meta.is_file() || meta.len() > MAX_FILE_SIZE || is_binary(&resolved) {
            return Ok(false);
        }
        let bytes = fs::read(&resolved).map_err(|e| Error::read(&resolved, e))?;
        let Ok(original) = String::from_utf8(bytes) else {
            return Ok(false);
        };

        let sanitized = self.sanitize_text(&original)?;
        if sanitized == original {
            return Ok(false);
        }

        // The original must exist in the shadow tree before the project copy
        // loses it.
        let backup = self.shadow_root()?.join(&relative);
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
        }
        fs::write(&backup, &original).map_err(|e| Error::write(&backup, e))?;
        fs::set_permissions(&backup, meta.permissions()).map_err(|e| Error::write(&backup, e))?;
        fs::write(&resolved, &sanitized).map_err(|e| Error::write(&resolved, e))?;
        tracing::info!(file = %relative.display(), "sanitized in place");
        Ok(true)
    }

    pub(crate) fn log(&self, entry: LogEntry) {
        if let Some(logger) = &self.logger {
            logger.log(&entry);
        }
    }
}

/// Quote `s` as one POSIX shell word.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Apply `substitution` to the content-bearing fields of a tool input,
/// including each entry of a `MultiEdit` `edits` array. `None` when nothing
/// changed.
fn rewrite_content_fields(tool_input: &Value, substitution: &Substitution) -> Option<Value> {
    let mut rewritten = tool_input.clone();
    let mut changed = rewrite_object_fields(&mut rewritten, substitution);
    if let Some(edits) = rewritten.get_mut("edits").and_then(Value::as_array_mut) {
        for edit in edits {
            changed |= rewrite_object_fields(edit, substitution);
        }
    }
    changed.then_some(rewritten)
}

fn rewrite_object_fields(object: &mut Value, substitution: &Substitution) -> bool {
    let mut changed = false;
    for field in CONTENT_FIELDS {
        if let Some(Value::String(text)) = object.get_mut(*field) {
            if let std::borrow::Cow::Owned(sanitized) = substitution.apply(text) {
                *text = sanitized;
                changed = true;
            }
        }
    }
    changed
}

/// Every string in `value`, newline separated, appended to `out`.
fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// Copy of `value` with every string sanitized; `None` when nothing changed.
fn map_strings(value: &Value, substitution: &Substitution) -> Option<Value> {
    match value {
        Value::String(s) => match substitution.apply(s) {
            std::borrow::Cow::Owned(sanitized) => Some(Value::String(sanitized)),
            std::borrow::Cow::Borrowed(_) => None,
        },
        Value::Array(items) => {
            let mapped: Vec<_> = items.iter().map(|i| map_strings(i, substitution)).collect();
            if mapped.iter().all(Option::is_none) {
                return None;
            }
            Some(Value::Array(
                mapped
                    .into_iter()
                    .zip(items)
                    .map(|(new, old)| new.unwrap_or_else(|| old.clone()))
                    .collect(),
            ))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            let mut changed = false;
            for (key, item) in map {
                match map_strings(item, substitution) {
                    Some(new) => {
                        changed = true;
                        out.insert(key.clone(), new);
                    }
                    None => {
                        out.insert(key.clone(), item.clone());
                    }
                }
            }
            changed.then_some(Value::Object(out))
        }
        _ => None,
    }
}
