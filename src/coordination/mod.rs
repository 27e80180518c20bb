//! Cross-peer coordination: a distributed lock, a pub/sub bus, and session
//! record persistence (spec §4.5).
//!
//! Follows the teacher's `CoordinationManager` shape — `Arc<RwLock<...>>`
//! state handles shared via a cheap `Clone`, a `broadcast` channel for
//! fan-out — generalized from peer discovery/file replication to the
//! narrower lock/pubsub/session contracts this engine needs. The in-memory
//! implementations here stand in for a real backend (Redis, etcd, ...); the
//! traits are the actual contract callers depend on.

pub mod bus;
pub mod lock;
pub mod session_store;

pub use bus::{InMemoryPubSub, PubSub};
pub use lock::{DistributedLock, InMemoryLock, LockGuard};
pub use session_store::{InMemorySessionStore, SessionRecord, SessionRecordStore};
