//! Cross-process mutual exclusion via a lock file
//!
//! Multiple worker processes and ad-hoc CLI invocations share one
//! on-disk store, so every transaction is serialized through a
//! well-known lock file sibling to the data file. The file records its
//! holder's pid and acquisition time; holders that crashed self-evict
//! once the stale horizon passes, and a process never deletes a lock
//! it does not own.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{Error, Result};
use crate::jobs::job::STALE_LOCK_HORIZON_SECS;

/// Pause between acquisition attempts
const ACQUIRE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Default bound on the total acquisition wait
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Contents of the lock file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    /// Acquisition time, milliseconds since the Unix epoch
    timestamp: i64,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn is_stale(&self) -> bool {
        let age_ms = Utc::now().timestamp_millis() - self.timestamp;
        age_ms > STALE_LOCK_HORIZON_SECS * 1000
    }
}

/// Advisory lock guarding the job store's data file
#[derive(Debug, Clone)]
pub struct StoreLock {
    path: PathBuf,
    timeout: Duration,
}

impl StoreLock {
    /// Create a lock for the given lock-file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Override the acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Acquire the lock, blocking up to the configured timeout.
    ///
    /// Stale and unparseable lock files left by crashed holders are
    /// evicted and the attempt retried.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let started = Instant::now();

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .await
            {
                Ok(mut file) => {
                    let info = LockInfo::current();
                    file.write_all(&serde_json::to_vec(&info)?).await?;
                    file.flush().await?;
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        pid: info.pid,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.try_evict().await? {
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() >= self.timeout {
                return Err(Error::LockTimeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(ACQUIRE_RETRY_DELAY).await;
        }
    }

    /// Remove the lock file if its holder is stale or its contents are
    /// unreadable. Returns true when an eviction happened.
    async fn try_evict(&self) -> Result<bool> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // The holder released between our create attempt and the
            // read; just retry.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<LockInfo>(&bytes) {
            Ok(info) if info.is_stale() => {
                warn!(
                    pid = info.pid,
                    path = %self.path.display(),
                    "evicting stale store lock"
                );
            }
            Ok(_) => return Ok(false),
            Err(_) => {
                warn!(path = %self.path.display(), "evicting unparseable store lock");
            }
        }

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

/// Held lock. Release explicitly with [`LockGuard::release`]; dropping
/// the guard removes the file as a best effort fallback.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl LockGuard {
    /// Release the lock, deleting the lock file only if this process
    /// is still the recorded holder.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                if let Ok(info) = serde_json::from_slice::<LockInfo>(&bytes) {
                    if info.pid != self.pid {
                        // Someone evicted us and took over; the lock is
                        // no longer ours to delete.
                        return Ok(());
                    }
                }
                tokio::fs::remove_file(&self.path).await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(bytes) = std::fs::read(&self.path) {
            match serde_json::from_slice::<LockInfo>(&bytes) {
                Ok(info) if info.pid != self.pid => {}
                _ => {
                    let _ = std::fs::remove_file(&self.path);
                }
            }
        }
    }
}

/// Lock-file path for a given data file
pub fn lock_path_for(data_dir: &Path) -> PathBuf {
    data_dir.join(".lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_in(dir: &tempfile::TempDir) -> StoreLock {
        StoreLock::new(lock_path_for(dir.path()))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);

        let guard = lock.acquire().await.unwrap();
        assert!(lock_path_for(dir.path()).exists());
        guard.release().await.unwrap();
        assert!(!lock_path_for(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_contention_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir).with_timeout(Duration::from_millis(100));

        let _held = lock.acquire().await.unwrap();
        let second = lock.acquire().await;
        assert!(matches!(second, Err(Error::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_stale_lock_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path_for(dir.path());

        let stale = LockInfo {
            pid: 999_999,
            timestamp: Utc::now().timestamp_millis() - (STALE_LOCK_HORIZON_SECS + 1) * 1000,
        };
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let lock = lock_in(&dir);
        let guard = lock.acquire().await.unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unparseable_lock_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path_for(dir.path());
        std::fs::write(&path, b"not json at all").unwrap();

        let lock = lock_in(&dir);
        let guard = lock.acquire().await.unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_spares_foreign_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path_for(dir.path());

        let lock = lock_in(&dir);
        let guard = lock.acquire().await.unwrap();

        // Simulate another process evicting us and taking over.
        let foreign = LockInfo {
            pid: std::process::id().wrapping_add(1),
            timestamp: Utc::now().timestamp_millis(),
        };
        std::fs::write(&path, serde_json::to_vec(&foreign).unwrap()).unwrap();

        guard.release().await.unwrap();
        assert!(path.exists(), "foreign holder's lock must survive release");
    }
}
