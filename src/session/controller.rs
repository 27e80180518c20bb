//! Session Controller (spec §4.1): owns one transport connection, parses
//! the outermost `{version, type, payload}` envelope, and dispatches to the
//! versioned Processor.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::error::{VaultError, VaultResult};
use crate::protocol::SUPPORTED_VERSION;

use super::transport::{Frame, FrameTransport};
use super::{Envelope, SessionState};

/// Drives one connection's frame grammar at the version-agnostic layer.
/// Sends are serialized through a mutex so a frame write is atomic even
/// when the reader task, a watcher task, and a fan-out task all want to
/// write concurrently (spec §5).
pub struct SessionController {
    transport: Mutex<Box<dyn FrameTransport>>,
    closed: AtomicBool,
}

impl SessionController {
    pub fn new(transport: Box<dyn FrameTransport>) -> Self {
        Self {
            transport: Mutex::new(transport),
            closed: AtomicBool::new(false),
        }
    }

    /// Serialize and send one frame. Fails if the connection is already
    /// closed.
    pub async fn send(&self, frame: Frame) -> VaultResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VaultError::PeerClosed);
        }
        self.transport.lock().await.send(frame).await
    }

    /// Stream `reader` as a sequence of binary frames of at most 1024 bytes.
    pub async fn send_body<R>(&self, mut reader: R) -> VaultResult<()>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| VaultError::io(e, None::<std::path::PathBuf>))?;
            if n == 0 {
                break;
            }
            self.send(Frame::Binary(buf[..n].to_vec())).await?;
        }
        Ok(())
    }

    /// Close at most once, writing a normal-closure frame carrying `reason`.
    pub async fn close(&self, reason: impl Into<String>) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self
                .transport
                .lock()
                .await
                .send(Frame::Close(Some(reason.into())))
                .await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Read the version-negotiation frame that must open every connection.
    /// Returns the terminating cause if the peer sends anything else or
    /// closes before negotiating.
    #[instrument(skip(self))]
    pub async fn negotiate_version(&self) -> VaultResult<u32> {
        let frame = {
            let mut transport = self.transport.lock().await;
            transport.recv().await?
        };

        let envelope = match frame {
            Some(Frame::Text(text)) => {
                serde_json::from_str::<Envelope>(&text).map_err(VaultError::MalformedJson)?
            }
            Some(Frame::Close(reason)) => {
                return Err(VaultError::Protocol(format!(
                    "peer closed before negotiating a version: {reason:?}"
                )))
            }
            Some(_) => {
                return Err(VaultError::HandshakeNotComplete(
                    "must negotiate version first".to_string(),
                ))
            }
            None => return Err(VaultError::PeerClosed),
        };

        if envelope.version != 0 || envelope.kind != "version" {
            return Err(VaultError::HandshakeNotComplete(
                "must negotiate version first".to_string(),
            ));
        }

        let version = envelope
            .payload
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| VaultError::Protocol("version frame missing `version`".to_string()))?
            as u32;

        if version != SUPPORTED_VERSION {
            return Err(VaultError::UnknownVersion(version));
        }

        info!(version, "negotiated protocol version");
        Ok(version)
    }

    /// Send the v0 `version` frame (client role: announce the version we
    /// intend to speak before the server does the same check).
    pub async fn send_version(&self, version: u32) -> VaultResult<()> {
        let envelope = Envelope::new(0, "version", serde_json::json!({ "version": version }));
        let text = serde_json::to_string(&envelope).map_err(VaultError::MalformedJson)?;
        self.send(Frame::Text(text)).await
    }

    /// Borrow the underlying transport for the versioned Processor to drive
    /// directly once the handshake is complete.
    pub fn transport(&self) -> &Mutex<Box<dyn FrameTransport>> {
        &self.transport
    }
}

/// Placeholder state accessor kept alongside the controller for callers
/// that want to log the high-level phase; the authoritative state machine
/// lives in the v1 Processor once negotiation completes.
pub fn describe_state(state: SessionState) -> &'static str {
    match state {
        SessionState::Init => "init",
        SessionState::Handshake => "handshake",
        SessionState::Reconcile => "reconcile",
        SessionState::Steady => "steady",
        SessionState::Closed => "closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::ChannelTransport;

    #[tokio::test]
    async fn negotiate_version_accepts_supported_version() {
        let (mut client, server) = ChannelTransport::pair();
        let controller = SessionController::new(Box::new(server));

        let envelope = Envelope::new(0, "version", serde_json::json!({ "version": 1 }));
        client
            .send(Frame::Text(serde_json::to_string(&envelope).unwrap()))
            .await
            .unwrap();

        let version = controller.negotiate_version().await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn negotiate_version_rejects_unknown_version() {
        let (mut client, server) = ChannelTransport::pair();
        let controller = SessionController::new(Box::new(server));

        let envelope = Envelope::new(0, "version", serde_json::json!({ "version": 99 }));
        client
            .send(Frame::Text(serde_json::to_string(&envelope).unwrap()))
            .await
            .unwrap();

        let err = controller.negotiate_version().await.unwrap_err();
        assert!(matches!(err, VaultError::UnknownVersion(99)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_client, server) = ChannelTransport::pair();
        let controller = SessionController::new(Box::new(server));
        controller.close("done").await;
        controller.close("done again").await;
        assert!(controller.is_closed());
    }
}
