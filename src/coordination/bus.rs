//! Cross-peer pub/sub bus (spec §4.5): one channel per `{user}:{vault}`,
//! used to notify other server processes that an item changed so their
//! watchers can fold it into the next reconciliation pass.
//!
//! Grounded in the teacher's `CoordinationManager` use of
//! `tokio::sync::broadcast` for fan-out, narrowed from a single
//! coordination-wide event enum to one channel per topic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::item::Item;

/// Published when an item changes, addressed to a `{user}:{vault}` topic.
/// `origin` identifies the publishing session so it can filter its own
/// publication back out of its subscription instead of re-forwarding it.
#[derive(Debug, Clone)]
pub struct ItemChanged {
    pub topic: String,
    pub item: Item,
    pub origin: Uuid,
}

#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    async fn publish(&self, topic: &str, item: Item, origin: Uuid);

    /// Subscribe to a topic; the returned receiver only observes messages
    /// published after this call.
    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<ItemChanged>;
}

const CHANNEL_CAPACITY: usize = 256;

/// In-process broadcast-per-topic bus. A real multi-node deployment swaps
/// this for a backend (e.g. Redis pub/sub) behind the same trait.
#[derive(Clone)]
pub struct InMemoryPubSub {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<ItemChanged>>>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<ItemChanged> {
        if let Some(tx) = self.topics.read().await.get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, topic: &str, item: Item, origin: Uuid) {
        let tx = self.sender_for(topic).await;
        // No subscribers is not an error: the watcher that would have cared
        // may simply not be running on this process right now.
        let _ = tx.send(ItemChanged {
            topic: topic.to_string(),
            item,
            origin,
        });
        debug!(topic, "published item change");
    }

    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<ItemChanged> {
        self.sender_for(topic).await.subscribe()
    }
}

/// The channel name for a given owner/vault pair.
pub fn topic_for(user: &str, vault: &str) -> String {
    format!("{user}:{vault}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> Item {
        Item {
            owner: "alice".into(),
            vault_name: "v1".into(),
            server_path: "a.txt".into(),
            server_mtime: 1,
            size: 3,
            sha256: "0".repeat(64),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_item() {
        let bus = InMemoryPubSub::new();
        let topic = topic_for("alice", "v1");
        let mut rx = bus.subscribe(&topic).await;
        bus.publish(&topic, sample_item(), Uuid::new_v4()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, topic);
        assert_eq!(received.item.server_path, "a.txt");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = InMemoryPubSub::new();
        bus.publish("nobody:listening", sample_item(), Uuid::new_v4())
            .await;
    }
}
