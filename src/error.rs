//! Unified error handling for the synchronization engine.
//!
//! One `thiserror`-based enum covers every fatal condition the protocol can
//! hit (transport, framing, protocol, storage, coordination, configuration),
//! mirroring the grouped-variant style used across the rest of this crate's
//! subsystems.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    // Transport errors: surfaced by terminating the connection.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("peer closed the connection")]
    PeerClosed,

    // Framing errors: malformed wire data.
    #[error("malformed JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("body size overrun: expected {expected} bytes, received {received}")]
    SizeOverrun { expected: u64, received: u64 },

    #[error("unexpected frame kind while receiving a body")]
    UnexpectedFrameDuringBody,

    #[error("body read deadline elapsed")]
    BodyReadTimeout,

    // Protocol errors: state machine / message-grammar violations.
    #[error("unknown protocol version: {0}")]
    UnknownVersion(u32),

    #[error("unknown message type {message_type} for version {version}")]
    UnknownMessageType { version: u32, message_type: String },

    #[error("message received before handshake completed: {0}")]
    HandshakeNotComplete(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    // Storage / resource errors.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: Option<PathBuf>,
    },

    #[error("path escapes vault root: {0}")]
    PathEscape(String),

    #[error("writer failed to rename into place: {0}")]
    RenameFailed(String),

    // Coordination errors.
    #[error("lock acquisition exceeded the ceiling for {key}")]
    LockCeilingExceeded { key: String },

    #[error("coordination backend error: {0}")]
    Coordination(String),

    // Configuration errors.
    #[error("missing required configuration: {0}")]
    MissingConfiguration(String),

    #[error("invalid configuration: {field} = {value}")]
    InvalidConfiguration { field: String, value: String },

    // Credential errors (consumed by the embedding HTTP layer, but surfaced
    // here because the engine's CredentialVerifier trait lives in this crate).
    #[error("authentication failed for user {0}")]
    Authentication(String),
}

impl VaultError {
    pub fn io(source: io::Error, path: impl Into<Option<PathBuf>>) -> Self {
        VaultError::Io {
            source,
            path: path.into(),
        }
    }

    /// Broad category, used for metrics/log grouping.
    pub fn category(&self) -> &'static str {
        match self {
            VaultError::Transport(_) | VaultError::PeerClosed => "transport",
            VaultError::MalformedJson(_)
            | VaultError::SizeOverrun { .. }
            | VaultError::UnexpectedFrameDuringBody
            | VaultError::BodyReadTimeout => "framing",
            VaultError::UnknownVersion(_)
            | VaultError::UnknownMessageType { .. }
            | VaultError::HandshakeNotComplete(_)
            | VaultError::Protocol(_) => "protocol",
            VaultError::Io { .. } | VaultError::PathEscape(_) | VaultError::RenameFailed(_) => {
                "resource"
            }
            VaultError::LockCeilingExceeded { .. } | VaultError::Coordination(_) => "coordination",
            VaultError::MissingConfiguration(_) | VaultError::InvalidConfiguration { .. } => {
                "configuration"
            }
            VaultError::Authentication(_) => "security",
        }
    }

    /// Whether a client-side reconnect loop should treat this as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::Transport(_) | VaultError::PeerClosed | VaultError::BodyReadTimeout
        )
    }

    /// Render as the diagnostic string carried by a `close` frame's payload.
    pub fn as_close_reason(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_framing_errors() {
        let err = VaultError::SizeOverrun {
            expected: 5,
            received: 6,
        };
        assert_eq!(err.category(), "framing");
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(VaultError::PeerClosed.is_retryable());
    }
}
