//! Session lifecycle: the connection-scoped state machine that sits between
//! the wire transport and the reconciliation protocol (spec §3, §4).

pub mod controller;
pub mod transport;

pub use controller::SessionController;
pub use transport::FrameTransport;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase of a session's lifecycle, driving which frame kinds are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, version handshake not yet complete.
    Init,
    /// Version negotiated, vault/auth/sync-strategy exchange underway.
    Handshake,
    /// Draining the normal and conflict queues before going live.
    Reconcile,
    /// Live: pushes and fetches flow in either direction.
    Steady,
    Closed,
}

/// The in-memory half of a session's identity (the durable half is
/// `coordination::session_store::SessionRecord`).
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub owner: String,
    pub vault_name: String,
    pub sync_strategy: u8,
}

/// Top-level envelope every frame is wrapped in, regardless of version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(version: u32, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            version,
            kind: kind.into(),
            payload,
        }
    }
}
