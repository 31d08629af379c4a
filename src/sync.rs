//! Directory walking and mirroring.
//!
//! [`EligibleFiles`] is the single definition of "a file this crate may
//! touch": a regular file, not a symlink, not above the size ceiling, not
//! under an excluded path. Session start sanitizes what it yields in place;
//! [`sync_dir`] mirrors it into another tree through a text transform.
//!
//! Mirroring is best effort. A file that cannot be processed is logged and
//! counted, never fatal.

use memchr::memchr;
use std::borrow::Cow;
use std::fs::{self, File, Permissions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Files larger than this are never read.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Bytes inspected when deciding whether a file is binary.
pub const BINARY_PROBE_LEN: usize = 8 * 1024;

/// Relative paths excluded from walks.
///
/// A pattern excludes a path when it equals it, is a leading directory of
/// it, or appears as a whole directory somewhere inside it. Separators are
/// normalized to `/` on both sides.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    patterns: Vec<String>,
}

impl Exclusions {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    /// Copy with `pattern` added.
    #[must_use]
    pub fn with(mut self, pattern: &str) -> Self {
        let pattern = normalize(pattern);
        if !pattern.is_empty() && !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        self
    }

    /// Whether `relative` is excluded.
    #[must_use]
    pub fn matches(&self, relative: &str) -> bool {
        let relative = normalize_separators(relative);
        self.patterns.iter().any(|pattern| {
            relative == *pattern
                || relative
                    .strip_prefix(pattern.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
                || relative.contains(&format!("/{pattern}/"))
        })
    }

    fn matches_dir(&self, relative: &str) -> bool {
        self.matches(&format!("{relative}/"))
    }
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn normalize(pattern: &str) -> String {
    let pattern = normalize_separators(pattern.trim());
    let pattern = pattern.strip_prefix("./").unwrap_or(&pattern);
    pattern.trim_matches('/').to_string()
}

/// Walk settings.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub exclusions: Exclusions,
    /// Skip zero-length files.
    pub skip_empty: bool,
    pub max_file_size: u64,
    /// Absolute directories never entered (e.g. a mirror living inside the
    /// tree being walked).
    pub skip_roots: Vec<PathBuf>,
}

impl WalkOptions {
    #[must_use]
    pub fn new(exclusions: Exclusions) -> Self {
        Self {
            exclusions,
            skip_empty: false,
            max_file_size: MAX_FILE_SIZE,
            skip_roots: Vec::new(),
        }
    }

    #[must_use]
    pub const fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    #[must_use]
    pub fn skip_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.skip_roots.push(root.into());
        self
    }
}

/// A file yielded by [`EligibleFiles`].
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
    pub size: u64,
    pub permissions: Permissions,
}

/// Lazy iterator over the files under a root that pass [`WalkOptions`].
///
/// Traversal order is sorted by file name so repeated walks agree.
pub struct EligibleFiles {
    root: PathBuf,
    walker: walkdir::IntoIter,
    options: WalkOptions,
}

impl EligibleFiles {
    #[must_use]
    pub fn new(root: &Path, options: WalkOptions) -> Self {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Self {
            root: root.to_path_buf(),
            walker,
            options,
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    fn is_skipped_root(&self, path: &Path) -> bool {
        self.options.skip_roots.iter().any(|root| path.starts_with(root))
    }
}

impl Iterator for EligibleFiles {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let Some(relative) = self.relative(entry.path()) else {
                continue;
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if self.options.exclusions.matches_dir(&relative)
                    || self.is_skipped_root(entry.path())
                {
                    self.walker.skip_current_dir();
                }
                continue;
            }
            if entry.path_is_symlink() || !file_type.is_file() {
                continue;
            }
            if self.options.exclusions.matches(&relative) {
                continue;
            }

            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let size = meta.len();
            if size > self.options.max_file_size || (self.options.skip_empty && size == 0) {
                continue;
            }

            return Some(FileEntry {
                path: entry.into_path(),
                relative,
                size,
                permissions: meta.permissions(),
            });
        }
    }
}

/// Whether `path` looks binary: a NUL byte within the first
/// [`BINARY_PROBE_LEN`] bytes. Unreadable files count as binary.
#[must_use]
pub fn is_binary(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return true;
    };
    let mut buf = [0u8; BINARY_PROBE_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return true,
        }
    }
    memchr(0, &buf[..filled]).is_some()
}

/// Outcome counts of a [`sync_dir`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Text files written through the transform.
    pub transformed: usize,
    /// Binary or non-UTF-8 files copied byte for byte.
    pub copied: usize,
    /// Files that could not be mirrored.
    pub failed: usize,
}

impl SyncReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.transformed + self.copied
    }
}

/// Mirror every eligible file under `src` into `dst`.
///
/// Text files pass through `transform` and keep their permission bits;
/// binary files are copied verbatim. If `dst` lies inside `src` it is not
/// walked. A missing `src` is an empty sync.
///
/// # Errors
///
/// Returns an error only if `dst` itself cannot be created. Per-file
/// failures are counted in the report.
pub fn sync_dir<F>(src: &Path, dst: &Path, options: &WalkOptions, transform: F) -> Result<SyncReport>
where
    F: Fn(&str) -> Cow<'_, str>,
{
    let mut report = SyncReport::default();
    if !src.is_dir() {
        tracing::debug!(src = %src.display(), "sync source missing; nothing to do");
        return Ok(report);
    }
    fs::create_dir_all(dst).map_err(|e| Error::write(dst, e))?;

    let mut options = options.clone();
    if dst.starts_with(src) {
        options.skip_roots.push(dst.to_path_buf());
    }

    for entry in EligibleFiles::new(src, options) {
        let target = dst.join(&entry.relative);
        match mirror_file(&entry, &target, &transform) {
            Ok(Mirrored::Transformed) => report.transformed += 1,
            Ok(Mirrored::Copied) => report.copied += 1,
            Err(e) => {
                tracing::warn!(file = %entry.relative, error = %e, "sync skipped file");
                report.failed += 1;
            }
        }
    }

    tracing::debug!(
        src = %src.display(),
        dst = %dst.display(),
        transformed = report.transformed,
        copied = report.copied,
        failed = report.failed,
        "sync complete"
    );
    Ok(report)
}

#[derive(Debug)]
enum Mirrored {
    Transformed,
    Copied,
}

fn mirror_file<F>(entry: &FileEntry, target: &Path, transform: &F) -> Result<Mirrored>
where
    F: Fn(&str) -> Cow<'_, str>,
{
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
    }

    if is_binary(&entry.path) {
        fs::copy(&entry.path, target).map_err(|e| Error::write(target, e))?;
        return Ok(Mirrored::Copied);
    }

    let bytes = match fs::read(&entry.path) {
        Ok(bytes) => bytes,
        Err(e) => return copy_unread(&entry.path, target, e),
    };
    let outcome = match String::from_utf8(bytes) {
        Ok(text) => {
            fs::write(target, transform(&text).as_bytes()).map_err(|e| Error::write(target, e))?;
            Mirrored::Transformed
        }
        Err(e) => {
            fs::write(target, e.as_bytes()).map_err(|e| Error::write(target, e))?;
            Mirrored::Copied
        }
    };
    fs::set_permissions(target, entry.permissions.clone()).map_err(|e| Error::write(target, e))?;
    Ok(outcome)
}

/// Byte copy for a file whose contents could not be read as a whole.
/// The copy carries the source permissions.
fn copy_unread(source: &Path, target: &Path, read_error: io::Error) -> Result<Mirrored> {
    tracing::debug!(path = %source.display(), error = %read_error, "read failed; copying bytes");
    match fs::copy(source, target) {
        Ok(_) => Ok(Mirrored::Copied),
        Err(_) => Err(Error::read(source, read_error)),
    }
}
