//! Named mutual-exclusion leases.
//!
//! Persisting automatic mappings is a read-modify-write of a file that many
//! short-lived hook processes share, so it runs under a [`Lease`]. Acquisition
//! retries for a bounded period; once that runs out the holder is presumed
//! crashed, the lease is cleared and taken anyway. A stuck lock must never
//! freeze the assistant.
//!
//! [`FileLease`] is the cross-process implementation (a lock file created
//! with `create_new`). [`MemoryLease`] gives the same contract inside one
//! process.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Default total wait before a lease is considered stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

/// Default delay between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Lock file that guards `target`: `<target>.lock`.
#[must_use]
pub fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// A named lease that can be acquired and released.
pub trait Lease {
    /// Human-readable name, used in errors and logs.
    fn name(&self) -> String;

    /// Try once to take the lease. `Ok(false)` means someone else holds it.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than contention.
    fn try_acquire(&self) -> Result<bool>;

    /// Forcibly clear a lease left behind by a crashed holder.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease could not be cleared.
    fn break_stale(&self) -> Result<()>;

    /// Give the lease back.
    fn release(&self);

    /// Total time to keep retrying before breaking the lease.
    fn stale_after(&self) -> Duration {
        DEFAULT_STALE_AFTER
    }

    /// Delay between attempts.
    fn retry_interval(&self) -> Duration {
        DEFAULT_RETRY_INTERVAL
    }

    /// Acquire, waiting up to [`Self::stale_after`] and then overriding.
    ///
    /// The returned guard releases on drop, including on error paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lease`] if the lease is still unavailable after the
    /// staleness override.
    fn acquire(&self) -> Result<LeaseGuard<'_, Self>>
    where
        Self: Sized,
    {
        let deadline = Instant::now() + self.stale_after();
        loop {
            if self.try_acquire()? {
                return Ok(LeaseGuard { lease: self });
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.retry_interval());
        }

        tracing::warn!(lease = %self.name(), "lease held too long; assuming crashed holder");
        self.break_stale()?;
        if self.try_acquire()? {
            return Ok(LeaseGuard { lease: self });
        }
        Err(Error::Lease {
            name: self.name(),
            reason: "still held after clearing stale lease".to_string(),
        })
    }
}

/// Releases its lease when dropped.
#[must_use = "the lease is released as soon as the guard is dropped"]
pub struct LeaseGuard<'a, L: Lease> {
    lease: &'a L,
}

impl<L: Lease> Drop for LeaseGuard<'_, L> {
    fn drop(&mut self) {
        self.lease.release();
    }
}

/// Cross-process lease backed by a lock file.
#[derive(Debug, Clone)]
pub struct FileLease {
    path: PathBuf,
    stale_after: Duration,
    retry_interval: Duration,
}

impl FileLease {
    /// Lease guarding `target`, using `<target>.lock` as the lock file.
    #[must_use]
    pub fn for_file(target: &Path) -> Self {
        Self::new(lock_path(target))
    }

    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path,
            stale_after: DEFAULT_STALE_AFTER,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_timing(mut self, stale_after: Duration, retry_interval: Duration) -> Self {
        self.stale_after = stale_after;
        self.retry_interval = retry_interval;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Lease for FileLease {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn try_acquire(&self) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                // Holder pid, for humans inspecting a stuck lock.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
                }
                Ok(false)
            }
            Err(e) => Err(Error::write(&self.path, e)),
        }
    }

    fn break_stale(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(Error::write(&self.path, e)),
            _ => Ok(()),
        }
    }

    fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!(lease = %self.path.display(), error = %e, "lock file already gone");
        }
    }

    fn stale_after(&self) -> Duration {
        self.stale_after
    }

    fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

/// In-process lease with the same staleness contract.
#[derive(Debug)]
pub struct MemoryLease {
    name: String,
    held: Mutex<bool>,
    freed: Condvar,
    stale_after: Duration,
}

impl MemoryLease {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            held: Mutex::new(false),
            freed: Condvar::new(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Whether someone currently holds the lease.
    #[must_use]
    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Lease for MemoryLease {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn try_acquire(&self) -> Result<bool> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if *held {
            // Wait for a release instead of polling blindly.
            let (guard, _) = self
                .freed
                .wait_timeout(held, self.retry_interval())
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
            if *held {
                return Ok(false);
            }
        }
        *held = true;
        Ok(true)
    }

    fn break_stale(&self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn release(&self) {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.freed.notify_one();
    }

    fn stale_after(&self) -> Duration {
        self.stale_after
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_lease_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let lease = FileLease::for_file(&dir.path().join("store.json"));
        {
            let _guard = lease.acquire().unwrap();
            assert!(lease.path().exists());
            assert!(!lease.try_acquire().unwrap());
        }
        assert!(!lease.path().exists());
    }

    #[test]
    fn file_lease_breaks_stale_lock() {
        let dir = TempDir::new().unwrap();
        let lease = FileLease::for_file(&dir.path().join("store.json"))
            .with_timing(Duration::from_millis(50), Duration::from_millis(10));
        fs::write(lease.path(), "12345\n").unwrap();

        let started = Instant::now();
        let guard = lease.acquire().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        drop(guard);
        assert!(!lease.path().exists());
    }

    #[test]
    fn file_lease_creates_missing_parent() {
        let dir = TempDir::new().unwrap();
        let lease = FileLease::for_file(&dir.path().join("deep").join("store.json"))
            .with_timing(Duration::from_millis(50), Duration::from_millis(5));
        let _guard = lease.acquire().unwrap();
        assert!(lease.path().exists());
    }

    #[test]
    fn memory_lease_released_on_error_path() {
        let lease = MemoryLease::new("test");
        let failing = || -> Result<()> {
            let _guard = lease.acquire()?;
            Err(Error::NoHomeDirectory)
        };
        assert!(failing().is_err());
        assert!(!lease.is_held());
    }

    #[test]
    fn memory_lease_overrides_stuck_holder() {
        let lease = MemoryLease::new("stuck").with_stale_after(Duration::from_millis(30));
        assert!(lease.try_acquire().unwrap());
        let guard = lease.acquire().unwrap();
        assert!(lease.is_held());
        drop(guard);
        assert!(!lease.is_held());
    }

    #[test]
    fn memory_lease_serializes_threads() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let lease = Arc::new(MemoryLease::new("counter"));
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lease = Arc::clone(&lease);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = lease.acquire().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
