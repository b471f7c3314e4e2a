//! File-based store lock for cross-process coordination
//!
//! Mutations against a `FileCounterStore` directory are serialized through a
//! single lock file acquired with `create_new`. The holder is stamped with a
//! TTL so a lock left behind by a crashed process is broken instead of
//! wedging the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::error::{StoreError, StoreResult};

/// How long a holder may keep the lock before waiters treat it as stale
const LOCK_TTL: Duration = Duration::from_secs(30);
/// How long an acquirer polls a live holder before giving up
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Contents of the lock file: enough to identify and age the holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct StoreLock {
    pub holder: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl StoreLock {
    fn new(ttl: Duration) -> Self {
        Self {
            holder: Uuid::new_v4().to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
            ttl,
        }
    }

    pub(super) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        now - self.acquired_at > ttl
    }
}

/// Holds the store lock; releases it on drop
pub(super) struct FileLockGuard {
    path: PathBuf,
}

impl FileLockGuard {
    /// Acquire the lock at `path`, breaking a stale holder and polling a
    /// live one up to the acquire timeout.
    pub(super) async fn acquire(path: &Path) -> StoreResult<Self> {
        let deadline = tokio::time::Instant::now() + ACQUIRE_TIMEOUT;
        loop {
            let lock = StoreLock::new(LOCK_TTL);
            let bytes = serde_json::to_vec(&lock)?;
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&bytes).await?;
                    file.flush().await?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::holder_is_stale(path).await {
                        // Racing breakers are fine: create_new above picks
                        // the single winner on the next pass.
                        let _ = fs::remove_file(path).await;
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(StoreError::unavailable(format!(
                            "store lock {} held past acquire timeout",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// An expired holder is stale; so is an unparseable lock file, which
    /// means a holder died between `create_new` and writing its stamp.
    async fn holder_is_stale(path: &Path) -> bool {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice::<StoreLock>(&bytes)
                .map(|lock| lock.is_expired(Utc::now()))
                .unwrap_or(true),
            // Vanished between create_new and here; retry the acquisition
            Err(_) => false,
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
