//! Abstraction over the wire so the protocol state machine can run against
//! either a real WebSocket or an in-memory duplex stream in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::error::{VaultError, VaultResult};

/// One logical frame on the wire: either a text/JSON envelope or a raw
/// binary chunk (used while streaming an item body).
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<String>),
}

/// Transport-level send/receive, independent of whether the peer is reached
/// over a real socket or an in-process channel.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send(&mut self, frame: Frame) -> VaultResult<()>;
    async fn recv(&mut self) -> VaultResult<Option<Frame>>;
}

#[async_trait]
impl<S> FrameTransport for WebSocketStream<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Frame) -> VaultResult<()> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text),
            Frame::Binary(bytes) => WsMessage::Binary(bytes),
            Frame::Close(reason) => WsMessage::Close(reason.map(|r| {
                tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                    reason: r.into(),
                }
            })),
        };
        SinkExt::send(self, message)
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> VaultResult<Option<Frame>> {
        match self.next().await {
            None => Ok(None),
            Some(Ok(WsMessage::Text(text))) => Ok(Some(Frame::Text(text))),
            Some(Ok(WsMessage::Binary(bytes))) => Ok(Some(Frame::Binary(bytes))),
            Some(Ok(WsMessage::Close(frame))) => {
                Ok(Some(Frame::Close(frame.map(|f| f.reason.to_string()))))
            }
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                // Handled transparently by tungstenite; poll again.
                Box::pin(FrameTransport::recv(self)).await
            }
            Some(Ok(WsMessage::Frame(_))) => Box::pin(FrameTransport::recv(self)).await,
            Some(Err(e)) => Err(VaultError::Transport(e.to_string())),
        }
    }
}

/// In-memory transport over a pair of mpsc channels, used by integration
/// tests to drive both sides of a session without opening a real socket.
pub struct ChannelTransport {
    pub tx: tokio::sync::mpsc::Sender<Frame>,
    pub rx: tokio::sync::mpsc::Receiver<Frame>,
}

impl ChannelTransport {
    /// Build a connected pair: frames sent on one side arrive on the other.
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(64);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(64);
        (
            ChannelTransport { tx: tx_a, rx: rx_a },
            ChannelTransport { tx: tx_b, rx: rx_b },
        )
    }
}

#[async_trait]
impl FrameTransport for ChannelTransport {
    async fn send(&mut self, frame: Frame) -> VaultResult<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| VaultError::PeerClosed)
    }

    async fn recv(&mut self) -> VaultResult<Option<Frame>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_transport_round_trips_frames() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.send(Frame::Text("hello".to_string())).await.unwrap();
        match b.recv().await.unwrap() {
            Some(Frame::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn recv_returns_none_after_sender_dropped() {
        let (a, mut b) = ChannelTransport::pair();
        drop(a);
        assert!(b.recv().await.unwrap().is_none());
    }
}
