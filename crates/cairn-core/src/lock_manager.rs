//! Process-wide filesystem lock.
//!
//! A single advisory file lock serializes every operation that touches the
//! repositories or the anchor state DB. Acquisition is bounded: callers wait
//! up to the requested duration and then fail with `LockTimeout`. The guard
//! releases on drop so the lock is returned on every exit path.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{CairnError, Result};

/// Lock filename inside the store root.
pub const LOCK_FILENAME: &str = ".lock";

/// Maximum time an operation may wait for the lock. 15 seconds is roughly
/// three times the cost of an anchor drop without network delays.
pub const LOCK_DURATION: Duration = Duration::from_secs(15);

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to the store's lock file.
pub struct LockManager {
    path: PathBuf,
}

/// Exclusive hold on the lock; released on drop.
pub struct LockGuard {
    file: File,
}

impl LockManager {
    /// Create a manager for the lock file at `path`. The file itself is
    /// created lazily on first acquisition.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Acquire the lock, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if another holder keeps the lock for the whole
    /// wait, or an IO error if the lock file cannot be opened.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?;

        let started = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(LockGuard { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= timeout {
                        return Err(CairnError::LockTimeout {
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::error!("unlock error: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lm = LockManager::new(dir.path().join(LOCK_FILENAME));

        let guard = lm.acquire(Duration::from_secs(1)).unwrap();
        drop(guard);

        // Reacquire after release.
        let _guard = lm.acquire(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_contended_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILENAME);
        let lm = Arc::new(LockManager::new(&path));

        let _guard = lm.acquire(Duration::from_secs(1)).unwrap();

        let lm2 = lm.clone();
        let timed_out = thread::spawn(move || {
            matches!(
                lm2.acquire(Duration::from_millis(150)),
                Err(CairnError::LockTimeout { .. })
            )
        })
        .join()
        .unwrap();

        assert!(timed_out, "second holder should have timed out");
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILENAME);
        let lm = Arc::new(LockManager::new(&path));

        let guard = lm.acquire(Duration::from_secs(1)).unwrap();

        let lm2 = lm.clone();
        let handle = thread::spawn(move || lm2.acquire(Duration::from_secs(5)).is_ok());

        thread::sleep(Duration::from_millis(100));
        drop(guard);

        assert!(handle.join().unwrap());
    }
}
