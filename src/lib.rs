//! Commy Sync — a versioned, multi-user, multi-vault file synchronization
//! engine.
//!
//! A client replicates a local directory ("vault") against an authoritative
//! server and against peer clients subscribed to the same vault. This crate
//! is the synchronization engine: the stateful, versioned protocol over a
//! persistent bidirectional session that reconciles the file set between
//! two endpoints, resolves conflicts by last-writer-wins-by-mtime, streams
//! file bodies, and propagates post-reconciliation changes through a
//! cross-peer fan-out bus.
//!
//! The HTTP upgrade path, credential enforcement at the edge, and the item
//! metadata store are out of scope for this crate; they're consumed as the
//! [`FrameTransport`](session::transport::FrameTransport),
//! [`auth::CredentialVerifier`], and the Storage Driver's enqueue contracts
//! respectively.

pub mod auth;
pub mod config;
pub mod coordination;
pub mod error;
pub mod item;
pub mod local_store;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod strategy;

pub use config::{ClientConfig, ServerConfig};
pub use error::{VaultError, VaultResult};
pub use item::Item;
pub use session::{SessionController, SessionState};
