//! Sync Strategy: the policy seam above the Storage Driver (spec §4.4).

pub mod last_modified;
pub mod lock_wrapper;

pub use last_modified::LastModifiedStrategy;
pub use lock_wrapper::{ClientLockWrapper, ServerLockWrapper};

use async_trait::async_trait;

use crate::error::VaultResult;
use crate::item::Item;
use crate::storage::QueueKind;

/// Outcome of fetching one item, reported back to the Protocol Processor so
/// it knows whether to expect a body transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Caller should emit `item_fetch` and read a body.
    Fetch,
    /// Digest already matched; only the mtime was touched.
    TouchOnly,
    /// Conflict policy applied: local copy wins, nothing happens now.
    Skipped,
}

#[async_trait]
pub trait SyncStrategy: Send + Sync {
    /// Deliver one local item's body to the peer. Returns the item so the
    /// caller can build the `item_save` frame.
    async fn send_single(&self, item: Item) -> VaultResult<Item>;

    /// Decide and, where applicable, perform the fetch for one remote item.
    async fn fetch_single(&self, item: &Item, queue: QueueKind) -> VaultResult<FetchOutcome>;

    /// Resolve a decision for every item in `items`, the queue they came
    /// from.
    async fn fetch_multi(
        &self,
        items: Vec<Item>,
        queue: QueueKind,
    ) -> VaultResult<Vec<(Item, FetchOutcome)>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let outcome = self.fetch_single(&item, queue).await?;
            results.push((item, outcome));
        }
        Ok(results)
    }

    async fn fetch_normal(&self) -> VaultResult<Vec<(Item, FetchOutcome)>>;

    async fn fetch_conflicts(&self) -> VaultResult<Vec<(Item, FetchOutcome)>>;
}
