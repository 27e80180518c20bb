//! Serialization wrappers around a `SyncStrategy` (spec §4.4): the server
//! acquires the per-`(user, vault)` distributed lock around each operation,
//! the client serializes with a plain in-process mutex since it only ever
//! runs one reconciliation round at a time against its own vault.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::coordination::lock::{acquire, vault_lock_key, DistributedLock, LOCK_TTL};
use crate::error::VaultResult;
use crate::item::Item;
use crate::storage::QueueKind;

use super::{FetchOutcome, SyncStrategy};

/// Wraps a strategy so every operation is serialized across the process
/// fleet by the distributed lock for `(user, vault)`.
pub struct ServerLockWrapper {
    inner: Arc<dyn SyncStrategy>,
    lock: Arc<dyn DistributedLock>,
    owner: String,
    vault_name: String,
}

impl ServerLockWrapper {
    pub fn new(
        inner: Arc<dyn SyncStrategy>,
        lock: Arc<dyn DistributedLock>,
        owner: String,
        vault_name: String,
    ) -> Self {
        Self {
            inner,
            lock,
            owner,
            vault_name,
        }
    }

    async fn with_lock<F, Fut, T>(&self, op: F) -> VaultResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = VaultResult<T>>,
    {
        let key = vault_lock_key(&self.owner, &self.vault_name);
        let guard = acquire(self.lock.clone(), &key, LOCK_TTL).await?;
        let result = op().await;
        guard.release().await;
        result
    }
}

#[async_trait]
impl SyncStrategy for ServerLockWrapper {
    async fn send_single(&self, item: Item) -> VaultResult<Item> {
        self.with_lock(|| self.inner.send_single(item)).await
    }

    async fn fetch_single(&self, item: &Item, queue: QueueKind) -> VaultResult<FetchOutcome> {
        self.with_lock(|| self.inner.fetch_single(item, queue)).await
    }

    async fn fetch_normal(&self) -> VaultResult<Vec<(Item, FetchOutcome)>> {
        self.with_lock(|| self.inner.fetch_normal()).await
    }

    async fn fetch_conflicts(&self) -> VaultResult<Vec<(Item, FetchOutcome)>> {
        self.with_lock(|| self.inner.fetch_conflicts()).await
    }
}

/// Client-side wrapper: a plain in-process mutex, since the client drives
/// exactly one session against its own vault.
pub struct ClientLockWrapper {
    inner: Arc<dyn SyncStrategy>,
    guard: AsyncMutex<()>,
}

impl ClientLockWrapper {
    pub fn new(inner: Arc<dyn SyncStrategy>) -> Self {
        Self {
            inner,
            guard: AsyncMutex::new(()),
        }
    }
}

#[async_trait]
impl SyncStrategy for ClientLockWrapper {
    async fn send_single(&self, item: Item) -> VaultResult<Item> {
        let _permit = self.guard.lock().await;
        self.inner.send_single(item).await
    }

    async fn fetch_single(&self, item: &Item, queue: QueueKind) -> VaultResult<FetchOutcome> {
        let _permit = self.guard.lock().await;
        self.inner.fetch_single(item, queue).await
    }

    async fn fetch_normal(&self) -> VaultResult<Vec<(Item, FetchOutcome)>> {
        let _permit = self.guard.lock().await;
        self.inner.fetch_normal().await
    }

    async fn fetch_conflicts(&self) -> VaultResult<Vec<(Item, FetchOutcome)>> {
        let _permit = self.guard.lock().await;
        self.inner.fetch_conflicts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::lock::InMemoryLock;
    use crate::storage::LocalStorageDriver;
    use crate::strategy::LastModifiedStrategy;
    use tempfile::tempdir;

    #[tokio::test]
    async fn server_wrapper_releases_lock_after_each_call() {
        let root = tempdir().unwrap();
        let driver: Arc<dyn crate::storage::StorageDriver> =
            Arc::new(LocalStorageDriver::open(root.path(), "v1").await.unwrap());
        let inner: Arc<dyn SyncStrategy> = Arc::new(LastModifiedStrategy::new(driver));
        let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryLock::new());
        let wrapper = ServerLockWrapper::new(inner, lock.clone(), "alice".into(), "v1".into());

        wrapper.fetch_normal().await.unwrap();
        // If the lock weren't released, a second acquire would fail.
        assert!(
            lock.try_acquire(&vault_lock_key("alice", "v1"), LOCK_TTL)
                .await
        );
    }
}
