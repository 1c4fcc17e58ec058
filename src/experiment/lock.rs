//! Cross-process mutual exclusion for a ledger persisted on shared storage
//!
//! The lock is a file created with `O_EXCL` semantics next to the ledger
//! files. It holds a small JSON payload (pid, acquisition time) for
//! diagnosis and is removed when the guard is dropped. A process that dies
//! while holding the lock leaves the file behind; delete it by hand.

use super::ExperimentData;
use crate::objects::StoreRegistry;
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How to wait for a contended lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Sleep between acquisition attempts
    pub retry_interval: Duration,
    /// Give up with `LockTimeout` after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    acquired_at: String,
}

/// Exclusive lock file; released on drop.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
}

impl LedgerLock {
    /// Try to create the lock file once.
    ///
    /// Returns `Ok(None)` if another holder owns it.
    ///
    /// # Errors
    ///
    /// Returns error for IO failures other than contention
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                let payload = LockPayload {
                    pid: std::process::id(),
                    acquired_at: Utc::now().to_rfc3339(),
                };
                // the payload is informational only
                let _ = serde_json::to_writer(&mut file, &payload);
                let _ = file.flush();
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Block until the lock file can be created.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if `options.timeout` elapses first, or an IO
    /// error
    pub fn acquire(path: &Path, options: &LockOptions) -> Result<Self> {
        let started = Instant::now();
        let mut contended = false;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                if contended {
                    debug!(
                        path = %path.display(),
                        waited_ms = started.elapsed().as_millis(),
                        "Acquired contended ledger lock"
                    );
                }
                return Ok(lock);
            }
            if !contended {
                warn!(path = %path.display(), "Ledger lock is held, waiting");
                contended = true;
            }
            if options.timeout.is_some_and(|t| started.elapsed() >= t) {
                return Err(Error::LockTimeout(path.to_path_buf()));
            }
            std::thread::sleep(options.retry_interval);
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Handle to a ledger on disk that serializes read-modify-write cycles
/// across processes.
#[derive(Debug, Clone)]
pub struct SharedLedger {
    base: PathBuf,
    registry: StoreRegistry,
    options: LockOptions,
}

impl SharedLedger {
    /// Handle for the ledger stored under `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            registry: StoreRegistry::default(),
            options: LockOptions::default(),
        }
    }

    /// Use `registry` for objects committed through this handle.
    #[must_use]
    pub fn with_registry(mut self, registry: StoreRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the lock waiting policy.
    #[must_use]
    pub const fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    /// Base path of the ledger files.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Path of the lock file (`<base>.lock`).
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        super::io::LedgerPaths::new(&self.base).lock
    }

    /// Acquire the lock, reload the ledger, apply `f`, write the ledger back
    /// and release the lock.
    ///
    /// If `f` fails, nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout`, any load/store error, or the error of `f`
    pub fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ExperimentData) -> Result<T>,
    {
        let _lock = LedgerLock::acquire(&self.lock_path(), &self.options)?;
        let mut data = ExperimentData::from_file(&self.base)?;
        data.set_registry(self.registry.clone());
        let value = f(&mut data)?;
        data.store()?;
        Ok(value)
    }

    /// Read a consistent snapshot under the lock.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or any load error
    pub fn snapshot(&self) -> Result<ExperimentData> {
        let _lock = LedgerLock::acquire(&self.lock_path(), &self.options)?;
        let mut data = ExperimentData::from_file(&self.base)?;
        data.set_registry(self.registry.clone());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.lock");

        let first = LedgerLock::try_acquire(&path).unwrap().unwrap();
        assert!(LedgerLock::try_acquire(&path).unwrap().is_none());

        let payload: LockPayload =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(payload.pid, std::process::id());

        drop(first);
        assert!(!path.exists());
        assert!(LedgerLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.lock");
        let _held = LedgerLock::try_acquire(&path).unwrap().unwrap();

        let options = LockOptions {
            retry_interval: Duration::from_millis(5),
            timeout: Some(Duration::from_millis(30)),
        };
        let result = LedgerLock::acquire(&path, &options);

        assert!(matches!(result, Err(Error::LockTimeout(p)) if p == path));
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.lock");
        let held = LedgerLock::try_acquire(&path).unwrap().unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(held);
        });
        let options = LockOptions {
            retry_interval: Duration::from_millis(5),
            timeout: Some(Duration::from_secs(10)),
        };
        let lock = LedgerLock::acquire(&path, &options).unwrap();
        releaser.join().unwrap();
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn test_lock_options_from_json() {
        let options: LockOptions =
            serde_json::from_str(r#"{"timeout": {"secs": 2, "nanos": 0}}"#).unwrap();
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.retry_interval, Duration::from_millis(100));
    }
}
