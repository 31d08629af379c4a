//! Configuration document for the sanitizer.
//!
//! A single JSON file (default `~/.claude/sanitizer/sanitizer.json`, override
//! with `SANITIZER_CONFIG`) holds both the mapping tables and the settings.
//! A missing file means defaults; a leading UTF-8 byte-order mark is ignored.
//! The automatic table is rewritten in place by [`crate::store`], which keeps
//! every other field untouched.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::discover::Discoverer;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::mapping::MappingSet;
use crate::placeholder::{PlaceholderGenerator, PlaceholderPolicy};

/// Environment override for the config file location.
pub const ENV_CONFIG_PATH: &str = "SANITIZER_CONFIG";

/// Config file name inside the sanitizer directory.
pub const CONFIG_FILE_NAME: &str = "sanitizer.json";

/// Default shadow-tree template.
pub const DEFAULT_UNSANITIZED_PATH: &str = "~/.claude/unsanitized/{project}";

/// Token in the shadow template replaced with the project directory name.
pub const PROJECT_TOKEN: &str = "{project}";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Paths skipped by default during walks and syncs.
#[must_use]
pub fn default_skip_paths() -> Vec<String> {
    [".git", "node_modules", ".venv", "__pycache__"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// The sanitizer configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Manual and automatic mapping tables.
    #[serde(flatten)]
    pub mappings: MappingSet,

    /// Relative paths excluded from sanitizing and syncing.
    #[serde(alias = "excludePaths")]
    pub skip_paths: Vec<String>,

    /// Literal hostname suffixes to discover (e.g. `.corp.local`).
    pub hostname_patterns: Vec<String>,

    /// Shadow-tree template; supports `~` and `{project}`.
    pub unsanitized_path: String,

    /// How placeholders are generated.
    pub placeholder_policy: PlaceholderPolicy,

    /// Whether IPv4 addresses are discovered automatically.
    #[serde(rename = "discoverIpv4")]
    pub discover_ipv4: bool,

    /// Extra regexes marking shell commands that need real values.
    pub real_exec_patterns: Vec<String>,

    /// Shell used by `exec`, e.g. `["sh", "-c"]`. Platform default if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_shell: Option<Vec<String>>,

    /// Decision log settings.
    pub log: LoggingConfig,
}

/// Older documents nest discovery settings under `patterns`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyPatterns {
    ipv4: Option<bool>,
    hostnames: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mappings: MappingSet::default(),
            skip_paths: default_skip_paths(),
            hostname_patterns: Vec::new(),
            unsanitized_path: DEFAULT_UNSANITIZED_PATH.to_string(),
            placeholder_policy: PlaceholderPolicy::default(),
            discover_ipv4: true,
            real_exec_patterns: Vec::new(),
            exec_shell: None,
            log: LoggingConfig::default(),
        }
    }
}

/// Directory holding the config file by default.
///
/// # Errors
///
/// Returns [`Error::NoHomeDirectory`] if the home directory is unknown.
pub fn sanitizer_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(".claude").join("sanitizer"))
}

/// Resolve the config path (env override first).
///
/// # Errors
///
/// Returns [`Error::NoHomeDirectory`] if no override is set and the home
/// directory is unknown.
pub fn config_path() -> Result<PathBuf> {
    if let Some(value) = env::var_os(ENV_CONFIG_PATH).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    Ok(sanitizer_dir()?.join(CONFIG_FILE_NAME))
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(Error::NoHomeDirectory)
}

/// Expand a leading `~` to the home directory.
///
/// # Errors
///
/// Returns [`Error::NoHomeDirectory`] if the path starts with `~` and the
/// home directory is unknown.
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return home_dir();
    }
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        return Ok(home_dir()?.join(rest));
    }
    Ok(PathBuf::from(path))
}

/// Drop a leading UTF-8 byte-order mark.
#[must_use]
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

/// Name used for `{project}`: the last component of the project root.
#[must_use]
pub fn project_name(project_root: &Path) -> String {
    project_root
        .file_name()
        .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned())
}

impl Config {
    /// Load from the default location.
    ///
    /// # Errors
    ///
    /// See [`Self::load_from`].
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load from `path`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::read(path, e)),
        };
        Self::parse(strip_bom(&data), path)
    }

    fn parse(data: &[u8], path: &Path) -> Result<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let parse_error = |source: serde_json::Error| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        };
        let mut document: serde_json::Value = serde_json::from_slice(data).map_err(parse_error)?;
        let (legacy, explicit_ipv4) = match document.as_object_mut() {
            Some(object) => (object.remove("patterns"), object.contains_key("discoverIpv4")),
            None => (None, false),
        };
        let mut config: Self = serde_json::from_value(document).map_err(parse_error)?;
        if let Some(legacy) = legacy {
            let legacy: LegacyPatterns = serde_json::from_value(legacy).map_err(parse_error)?;
            config.fold_legacy_patterns(legacy, explicit_ipv4);
        }
        Ok(config)
    }

    fn fold_legacy_patterns(&mut self, legacy: LegacyPatterns, explicit_ipv4: bool) {
        if let Some(ipv4) = legacy.ipv4.filter(|_| !explicit_ipv4) {
            self.discover_ipv4 = ipv4;
        }
        for suffix in legacy.hostnames {
            if !self.hostname_patterns.contains(&suffix) {
                self.hostname_patterns.push(suffix);
            }
        }
    }

    /// Shadow-tree root for `project_root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHomeDirectory`] if the template needs it.
    pub fn shadow_root(&self, project_root: &Path) -> Result<PathBuf> {
        let template = self.template();
        let expanded = template.replacen(PROJECT_TOKEN, &project_name(project_root), 1);
        expand_tilde(&expanded)
    }

    /// Directory that contains every shadow tree: the template up to
    /// `{project}`, or the whole template when it has no token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHomeDirectory`] if the template needs it.
    pub fn shadow_base(&self) -> Result<PathBuf> {
        let template = self.template();
        let base = template
            .split_once(PROJECT_TOKEN)
            .map_or(template, |(before, _)| before)
            .trim_end_matches(['/', '\\']);
        expand_tilde(base)
    }

    fn template(&self) -> &str {
        if self.unsanitized_path.trim().is_empty() {
            DEFAULT_UNSANITIZED_PATH
        } else {
            self.unsanitized_path.as_str()
        }
    }

    #[must_use]
    pub const fn generator(&self) -> PlaceholderGenerator {
        PlaceholderGenerator::new(self.placeholder_policy)
    }

    /// Compile the discovery patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] for a suffix that does not compile.
    pub fn discoverer(&self) -> Result<Discoverer> {
        Discoverer::new(self.discover_ipv4, &self.hostname_patterns, self.generator())
    }

    /// Shell used to run real-execution commands.
    #[must_use]
    pub fn exec_shell(&self) -> Vec<String> {
        match &self.exec_shell {
            Some(shell) if !shell.is_empty() => shell.clone(),
            _ => default_exec_shell(),
        }
    }

    /// Sample document written on first run.
    #[must_use]
    pub fn sample() -> serde_json::Value {
        serde_json::json!({
            "mappingsManual": {
                "server.domain.local": "server.example.test",
                "secretproject": "projectname"
            },
            "mappingsAuto": {},
            "hostnamePatterns": [".domain.local"],
            "skipPaths": default_skip_paths(),
            "unsanitizedPath": DEFAULT_UNSANITIZED_PATH,
            "placeholderPolicy": "deterministic",
            "discoverIpv4": true
        })
    }
}

fn default_exec_shell() -> Vec<String> {
    let shell: &[&str] = if cfg!(windows) {
        &["powershell.exe", "-NoProfile", "-Command"]
    } else {
        &["sh", "-c"]
    };
    shell.iter().map(|s| (*s).to_string()).collect()
}

/// Write the sample config at `path` if nothing exists there yet.
///
/// Returns `true` when a new file was written.
///
/// # Errors
///
/// Returns an error if directories or the file cannot be created.
pub fn initialize_if_needed(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
    }
    let body = serde_json::to_string_pretty(&Config::sample())?;
    fs::write(path, body).map_err(|e| Error::write(path, e))?;
    tracing::info!(path = %path.display(), "wrote sample sanitizer config");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert!(cfg.mappings.is_empty());
        assert_eq!(cfg.skip_paths, default_skip_paths());
        assert_eq!(cfg.unsanitized_path, DEFAULT_UNSANITIZED_PATH);
        assert!(cfg.discover_ipv4);
    }

    #[test]
    fn bom_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(br#"{"mappingsManual": {"10.0.0.1": "111.1.1.1"}}"#);
        fs::write(&path, bytes).unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.mappings.manual["10.0.0.1"], "111.1.1.1");
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.skip_paths, default_skip_paths());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn legacy_names_are_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(
            &path,
            r#"{"mappings": {"a": "b"}, "autoMappings": {"c": "d"}, "excludePaths": ["dist"]}"#,
        )
        .unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.mappings.manual["a"], "b");
        assert_eq!(cfg.mappings.auto["c"], "d");
        assert_eq!(cfg.skip_paths, vec!["dist".to_string()]);
    }

    #[test]
    fn legacy_patterns_block_is_folded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(
            &path,
            r#"{"hostnamePatterns": [".lan"], "patterns": {"ipv4": false, "hostnames": [".corp.local", ".lan"]}}"#,
        )
        .unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert!(!cfg.discover_ipv4);
        assert_eq!(cfg.hostname_patterns, vec![".lan".to_string(), ".corp.local".to_string()]);

        fs::write(&path, r#"{"discoverIpv4": true, "patterns": {"ipv4": false}}"#).unwrap();
        assert!(Config::load_from(&path).unwrap().discover_ipv4);

        fs::write(&path, r#"{"patterns": {"hostnames": [".internal"]}}"#).unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert!(cfg.discover_ipv4);
        assert_eq!(cfg.hostname_patterns, vec![".internal".to_string()]);
    }

    #[test]
    fn shadow_root_expands_project_token() {
        let cfg = Config {
            unsanitized_path: "/srv/shadow/{project}/tree".to_string(),
            ..Config::default()
        };
        let root = cfg.shadow_root(Path::new("/work/infra-repo")).unwrap();
        assert_eq!(root, PathBuf::from("/srv/shadow/infra-repo/tree"));
        assert_eq!(cfg.shadow_base().unwrap(), PathBuf::from("/srv/shadow"));
    }

    #[test]
    fn shadow_root_expands_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let cfg = Config::default();
        let root = cfg.shadow_root(Path::new("/work/app")).unwrap();
        assert_eq!(root, home.join(".claude/unsanitized/app"));
    }

    #[test]
    fn initialize_writes_sample_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        assert!(initialize_if_needed(&path).unwrap());
        assert!(!initialize_if_needed(&path).unwrap());
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.hostname_patterns, vec![".domain.local".to_string()]);
    }
}
