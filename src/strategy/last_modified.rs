//! The sole shipped strategy (tag = 1): last-writer-wins by mtime.
//!
//! The actual body transfer is driven by the Protocol Processor, which owns
//! the wire; this strategy only decides, per item, whether a transfer is
//! needed, and performs the touch-only case itself since that requires no
//! network round-trip.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::VaultResult;
use crate::item::Item;
use crate::storage::{QueueKind, StorageDriver};

use super::{FetchOutcome, SyncStrategy};

pub const STRATEGY_TAG: u8 = 1;

pub struct LastModifiedStrategy {
    driver: Arc<dyn StorageDriver>,
}

impl LastModifiedStrategy {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl SyncStrategy for LastModifiedStrategy {
    async fn send_single(&self, item: Item) -> VaultResult<Item> {
        // The caller streams the body itself via `driver.get_reader`; this
        // strategy's role is limited to confirming the item still exists.
        if !self.driver.exists(&item).await {
            debug!(path = %item.server_path, "send_single: item vanished locally before send");
        }
        Ok(item)
    }

    async fn fetch_single(&self, item: &Item, queue: QueueKind) -> VaultResult<FetchOutcome> {
        if queue == QueueKind::Conflict {
            // Local mtime was strictly newer than the peer's at enqueue time
            // and content differs: keep the local copy, push it next round.
            debug!(path = %item.server_path, "conflict skip: local copy preserved");
            return Ok(FetchOutcome::Skipped);
        }

        if self.driver.exists(item).await {
            let local_digest = self.driver.calculate_sha256(item).await?;
            if local_digest == item.sha256 {
                self.driver.touch(item).await?;
                return Ok(FetchOutcome::TouchOnly);
            }
        }

        Ok(FetchOutcome::Fetch)
    }

    async fn fetch_normal(&self) -> VaultResult<Vec<(Item, FetchOutcome)>> {
        let items = self.driver.get_all(QueueKind::Normal).await;
        self.fetch_multi(items, QueueKind::Normal).await
    }

    async fn fetch_conflicts(&self) -> VaultResult<Vec<(Item, FetchOutcome)>> {
        let items = self.driver.get_all(QueueKind::Conflict).await;
        self.fetch_multi(items, QueueKind::Conflict).await
    }
}
