//! Distributed lock contract (spec §4.5): `acquire(key, ttl)` / `release(key)`,
//! used to serialize reconciliation for a given `(user, vault)` pair across
//! server processes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::error::{VaultError, VaultResult};

/// How long a lock is held before it expires on its own, even if the holder
/// never calls `release`.
pub const LOCK_TTL: Duration = Duration::from_secs(60 * 60);

/// The ceiling an acquirer will wait, polling once a second, before giving up.
pub const LOCK_WAIT_CEILING: Duration = Duration::from_secs(30 * 60);

/// An acquired lock; dropping or explicitly releasing it frees the key.
pub struct LockGuard {
    key: String,
    lock: Arc<dyn DistributedLock>,
    released: bool,
}

impl LockGuard {
    pub async fn release(mut self) {
        self.lock.release(&self.key).await;
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let lock = self.lock.clone();
            let key = std::mem::take(&mut self.key);
            tokio::spawn(async move {
                lock.release(&key).await;
            });
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync + 'static {
    /// Attempt to atomically acquire `key`, held for at most `ttl`. Returns
    /// `true` if acquired, `false` if already held by someone else.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool;

    async fn release(&self, key: &str);
}

/// Block, polling once a second, until `key` is acquired on `lock` or
/// `LOCK_WAIT_CEILING` elapses.
pub async fn acquire(
    lock: Arc<dyn DistributedLock>,
    key: &str,
    ttl: Duration,
) -> VaultResult<LockGuard> {
    let deadline = Instant::now() + LOCK_WAIT_CEILING;
    loop {
        if lock.try_acquire(key, ttl).await {
            return Ok(LockGuard {
                key: key.to_string(),
                lock,
                released: false,
            });
        }
        if Instant::now() >= deadline {
            return Err(VaultError::LockCeilingExceeded {
                key: key.to_string(),
            });
        }
        debug!(key, "lock held by another holder, retrying in 1s");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

struct Entry {
    expires_at: Instant,
}

/// In-process lock table. Sufficient for a single server instance or for
/// tests; a production multi-node deployment swaps this for a backend that
/// implements the same trait.
#[derive(Clone)]
pub struct InMemoryLock {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(existing) = entries.get(key) {
            if existing.expires_at > now {
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                expires_at: now + ttl,
            },
        );
        true
    }

    async fn release(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

/// Per-item lock key, as decided for the per-path granularity open question.
pub fn item_lock_key(user: &str, vault: &str, server_path: &str) -> String {
    format!("item:{user}:{vault}:{server_path}")
}

// Kept for callers that only need vault-level serialization (e.g. the
// reconciliation pass as a whole).
pub fn vault_lock_key(user: &str, vault: &str) -> String {
    format!("vault:{user}:{vault}")
}
