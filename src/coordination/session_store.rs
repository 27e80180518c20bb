//! Session record persistence (spec §3, §4.5): who's connected to which
//! vault, with a TTL so a crashed server's sessions eventually age out of
//! anyone's view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Time a session record is retained after its last heartbeat.
pub const SESSION_RECORD_TTL: chrono::Duration = chrono::Duration::days(7);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub owner: String,
    pub vault_name: String,
    pub sync_strategy: u8,
    pub connected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(owner: String, vault_name: String, sync_strategy: u8) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            owner,
            vault_name,
            sync_strategy,
            connected_at: now,
            last_seen_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_seen_at > SESSION_RECORD_TTL
    }
}

#[async_trait]
pub trait SessionRecordStore: Send + Sync + 'static {
    async fn put(&self, record: SessionRecord);
    async fn get(&self, session_id: Uuid) -> Option<SessionRecord>;
    async fn touch(&self, session_id: Uuid);
    async fn remove(&self, session_id: Uuid);
    /// All records for a given owner/vault, expired entries excluded.
    async fn list_for_vault(&self, owner: &str, vault_name: &str) -> Vec<SessionRecord>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<RwLock<HashMap<Uuid, SessionRecord>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRecordStore for InMemorySessionStore {
    async fn put(&self, record: SessionRecord) {
        self.records.write().await.insert(record.session_id, record);
    }

    async fn get(&self, session_id: Uuid) -> Option<SessionRecord> {
        self.records.read().await.get(&session_id).cloned()
    }

    async fn touch(&self, session_id: Uuid) {
        if let Some(record) = self.records.write().await.get_mut(&session_id) {
            record.last_seen_at = Utc::now();
        }
    }

    async fn remove(&self, session_id: Uuid) {
        self.records.write().await.remove(&session_id);
    }

    async fn list_for_vault(&self, owner: &str, vault_name: &str) -> Vec<SessionRecord> {
        let now = Utc::now();
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.owner == owner && r.vault_name == vault_name && !r.is_expired(now))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("alice".into(), "v1".into(), 1);
        let id = record.session_id;
        store.put(record).await;
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.owner, "alice");
    }

    #[tokio::test]
    async fn list_for_vault_filters_by_owner_and_vault() {
        let store = InMemorySessionStore::new();
        store
            .put(SessionRecord::new("alice".into(), "v1".into(), 1))
            .await;
        store
            .put(SessionRecord::new("bob".into(), "v1".into(), 1))
            .await;
        let listed = store.list_for_vault("alice", "v1").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner, "alice");
    }

    #[tokio::test]
    async fn remove_deletes_the_record() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("alice".into(), "v1".into(), 1);
        let id = record.session_id;
        store.put(record).await;
        store.remove(id).await;
        assert!(store.get(id).await.is_none());
    }
}
