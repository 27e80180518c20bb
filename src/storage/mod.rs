//! Storage Driver contract (spec §4.3): maps items to on-disk files under a
//! vault root, computes digests, maintains the normal/conflict queues that
//! reconciliation drains, and watches for local changes.

pub mod local;
pub mod watcher;

pub use local::LocalStorageDriver;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::VaultResult;
use crate::item::Item;

/// Which of the two pending-item queues an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Normal,
    Conflict,
}

/// A writable body destination; dropping without `commit` leaves no trace
/// in the vault (writes land in a sibling temp file until then).
#[async_trait]
pub trait ItemWriter: AsyncWrite + Unpin + Send {
    /// Atomically publish the written bytes at the item's final path.
    async fn commit(self: Box<Self>) -> VaultResult<()>;
}

#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Partition `items` into the normal/conflict queues per the rules in
    /// spec §4.3.
    async fn enqueue(&self, items: Vec<Item>) -> VaultResult<()>;

    async fn has_items(&self, queue: QueueKind) -> bool;

    /// Pop and return the next pending item from `queue`, if any.
    async fn next(&self, queue: QueueKind) -> Option<Item>;

    async fn get_all(&self, queue: QueueKind) -> Vec<Item>;

    /// Walk the vault tree and enqueue every file whose mtime is at or past
    /// `last_sync` as a normal-queue item.
    async fn enqueue_changed_since(&self, last_sync: i64) -> VaultResult<()>;

    async fn get_reader(&self, item: &Item) -> VaultResult<Box<dyn AsyncRead + Unpin + Send>>;

    async fn get_writer(&self, item: &Item) -> VaultResult<Box<dyn ItemWriter>>;

    async fn exists(&self, item: &Item) -> bool;

    /// Set the local file's mtime to `item.server_mtime`.
    async fn touch(&self, item: &Item) -> VaultResult<()>;

    async fn calculate_sha256(&self, item: &Item) -> VaultResult<String>;

    async fn get_mtime(&self, item: &Item) -> VaultResult<i64>;
}
