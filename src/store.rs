//! JSON-backed persistence of the automatic mapping table.
//!
//! The store is the config document itself. Only `mappingsAuto` is ever
//! written; every other field, including ones this crate does not know about,
//! is carried through untouched. Writes happen under a [`Lease`] as a
//! read-modify-write against the on-disk state, so two hook processes that
//! discovered values concurrently both land their entries.

use serde_json::{Map, Value};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::config::{Config, strip_bom};
use crate::error::{Error, Result};
use crate::lease::{FileLease, Lease};
use crate::mapping::{Mapping, MappingSet};
use crate::placeholder::{PlaceholderGenerator, ValueKind};

const AUTO_KEY: &str = "mappingsAuto";
const LEGACY_AUTO_KEY: &str = "autoMappings";

/// Mapping persistence for one config file.
#[derive(Debug)]
pub struct MappingStore<L: Lease = FileLease> {
    path: PathBuf,
    lease: L,
}

impl MappingStore<FileLease> {
    /// Store at `path`, guarded by `<path>.lock`.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lease = FileLease::for_file(&path);
        Self { path, lease }
    }
}

impl<L: Lease> MappingStore<L> {
    #[must_use]
    pub fn with_lease(path: impl Into<PathBuf>, lease: L) -> Self {
        Self {
            path: path.into(),
            lease,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full config. Absent file means defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Config> {
        Config::load_from(&self.path)
    }

    /// Replace the stored automatic table with `auto`.
    ///
    /// # Errors
    ///
    /// Fails without writing if the existing document does not parse, and
    /// on lease or I/O failure.
    pub fn persist(&self, auto: &Mapping) -> Result<()> {
        let _guard = self.lease.acquire()?;
        let mut document = self.read_document()?;
        self.write_document(&mut document, auto)
    }

    /// Merge `discovered` into the on-disk automatic table and return the
    /// resulting mapping set.
    ///
    /// Runs entirely under the lease: the document is re-read, entries whose
    /// real value is already stored (by any writer) are dropped, and a
    /// discovered placeholder that collides with one now on disk is
    /// regenerated with `generator`. Nothing is written when no entry
    /// survives.
    ///
    /// # Errors
    ///
    /// Fails without writing if the existing document does not parse, and
    /// on lease, I/O or placeholder-exhaustion failure.
    pub fn record(
        &self,
        discovered: &Mapping,
        generator: &PlaceholderGenerator,
    ) -> Result<MappingSet> {
        let _guard = self.lease.acquire()?;
        let mut document = self.read_document()?;
        let on_disk: MappingSet = serde_json::from_value(Value::Object(document.clone()))
            .map_err(|source| Error::ConfigParse {
                path: self.path.clone(),
                source,
            })?;

        let mut used = on_disk.used_placeholders();
        let mut auto = on_disk.auto.clone();
        let mut added = 0usize;
        for (real, placeholder) in discovered {
            if on_disk.contains(real) {
                continue;
            }
            let placeholder = if used.contains(placeholder) {
                let fresh = generator.generate(kind_of(real), real, &used)?;
                tracing::debug!(%real, %fresh, "placeholder collided with stored entry; regenerated");
                fresh
            } else {
                placeholder.clone()
            };
            used.insert(placeholder.clone());
            auto.insert(real.clone(), placeholder);
            added += 1;
        }

        if added > 0 {
            self.write_document(&mut document, &auto)?;
            tracing::info!(added, path = %self.path.display(), "persisted automatic mappings");
        }
        Ok(MappingSet::new(on_disk.manual, auto))
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(Error::read(&self.path, e)),
        };
        let data = strip_bom(&data);
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        let value: Value = serde_json::from_slice(data).map_err(|source| Error::ConfigParse {
            path: self.path.clone(),
            source,
        })?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(Error::ConfigShape {
                path: self.path.clone(),
            }),
        }
    }

    fn write_document(&self, document: &mut Map<String, Value>, auto: &Mapping) -> Result<()> {
        document.remove(LEGACY_AUTO_KEY);
        document.insert(AUTO_KEY.to_string(), serde_json::to_value(auto)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
        }
        let body = serde_json::to_string_pretty(document)?;

        // A symlinked config is updated at its target, keeping the link.
        let target = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let existing = fs::metadata(&target).ok().map(|meta| meta.permissions());

        // Readers do not take the lease; never expose a half-written file.
        let mut staging = target.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        fs::write(&staging, body).map_err(|e| Error::write(&staging, e))?;
        if let Some(permissions) = existing {
            fs::set_permissions(&staging, permissions).map_err(|e| Error::write(&staging, e))?;
        }
        fs::rename(&staging, &target).map_err(|e| Error::write(&target, e))
    }
}

fn kind_of(real: &str) -> ValueKind {
    if real.parse::<Ipv4Addr>().is_ok() {
        ValueKind::Ip
    } else {
        ValueKind::Hostname
    }
}
