//! Protocol Processor v1 (spec §4.2): handshake, reconciliation, and
//! steady-state message handling.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::coordination::bus::{topic_for, ItemChanged, PubSub};
use crate::error::{VaultError, VaultResult};
use crate::item::Item;
use crate::session::transport::{Frame, FrameTransport};
use crate::session::Envelope;
use crate::storage::{QueueKind, StorageDriver};
use crate::strategy::{FetchOutcome, SyncStrategy};

/// Idle deadline for a single binary frame while a body transfer is
/// outstanding (spec §4.2).
const BODY_READ_DEADLINE: Duration = Duration::from_secs(30);

/// Maximum size of one outbound binary frame.
pub const MAX_FRAME_BYTES: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum V1Message {
    #[serde(rename = "vault_name")]
    VaultName { name: String },
    #[serde(rename = "sync_strategy")]
    SyncStrategy { sync_strategy: u8 },
    #[serde(rename = "sync")]
    Sync { last_sync: i64 },
    #[serde(rename = "initial_sync")]
    InitialSync { items: Vec<Item> },
    #[serde(rename = "initial_sync_done")]
    InitialSyncDone { last_sync: i64 },
    #[serde(rename = "item_fetch")]
    ItemFetch { item: Item },
    #[serde(rename = "item_save")]
    ItemSave { item: Item },
}

impl V1Message {
    pub fn kind(&self) -> &'static str {
        match self {
            V1Message::VaultName { .. } => "vault_name",
            V1Message::SyncStrategy { .. } => "sync_strategy",
            V1Message::Sync { .. } => "sync",
            V1Message::InitialSync { .. } => "initial_sync",
            V1Message::InitialSyncDone { .. } => "initial_sync_done",
            V1Message::ItemFetch { .. } => "item_fetch",
            V1Message::ItemSave { .. } => "item_save",
        }
    }

    pub fn into_envelope(self) -> VaultResult<Envelope> {
        let payload = serde_json::to_value(&self)?;
        // `#[serde(tag = "type")]` folds the discriminant into the payload
        // object; lift it back out into the envelope's own `type` field.
        let mut payload = payload;
        let kind = self.kind().to_string();
        if let serde_json::Value::Object(map) = &mut payload {
            map.remove("type");
        }
        Ok(Envelope::new(1, kind, payload))
    }

    pub fn from_envelope(envelope: &Envelope) -> VaultResult<Self> {
        let mut tagged = envelope.payload.clone();
        if let serde_json::Value::Object(map) = &mut tagged {
            map.insert(
                "type".to_string(),
                serde_json::Value::String(envelope.kind.clone()),
            );
        }
        serde_json::from_value(tagged).map_err(VaultError::MalformedJson)
    }
}

pub async fn send_message(transport: &mut dyn FrameTransport, message: V1Message) -> VaultResult<()> {
    let envelope = message.into_envelope()?;
    let text = serde_json::to_string(&envelope)?;
    transport.send(Frame::Text(text)).await
}

pub async fn recv_message(transport: &mut dyn FrameTransport) -> VaultResult<Option<V1Message>> {
    loop {
        match transport.recv().await? {
            None => return Ok(None),
            Some(Frame::Close(reason)) => {
                info!(?reason, "peer sent close during v1 processing");
                return Ok(None);
            }
            Some(Frame::Binary(_)) => {
                return Err(VaultError::UnexpectedFrameDuringBody);
            }
            Some(Frame::Text(text)) => {
                let envelope: Envelope = serde_json::from_str(&text)?;
                if envelope.version == 0 {
                    // A v0 frame (e.g. a stray close) interleaved with v1
                    // traffic; treat as connection termination.
                    return Ok(None);
                }
                return Ok(Some(V1Message::from_envelope(&envelope)?));
            }
        }
    }
}

/// Receive exactly `item.size` bytes of body as binary frames, writing them
/// through `driver`'s writer, then commit atomically. Any non-binary frame
/// or a frame that would overrun `size` is fatal.
#[instrument(skip(transport, driver))]
async fn receive_body(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    item: &Item,
) -> VaultResult<()> {
    let mut writer = driver.get_writer(item).await?;
    let mut received: u64 = 0;

    while received < item.size {
        let frame = timeout(BODY_READ_DEADLINE, transport.recv())
            .await
            .map_err(|_| VaultError::BodyReadTimeout)??;

        match frame {
            None => return Err(VaultError::PeerClosed),
            Some(Frame::Binary(bytes)) => {
                let new_total = received + bytes.len() as u64;
                if new_total > item.size {
                    return Err(VaultError::SizeOverrun {
                        expected: item.size,
                        received: new_total,
                    });
                }
                writer
                    .write_all(&bytes)
                    .await
                    .map_err(|e| VaultError::io(e, None::<std::path::PathBuf>))?;
                received = new_total;
            }
            Some(Frame::Text(_)) => return Err(VaultError::UnexpectedFrameDuringBody),
            Some(Frame::Close(_)) => return Err(VaultError::PeerClosed),
        }
    }

    writer.commit().await
}

/// Send `item`'s body as a sequence of binary frames of at most
/// `MAX_FRAME_BYTES` each (spec §4.1 `send_body`).
async fn send_body(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    item: &Item,
) -> VaultResult<()> {
    use tokio::io::AsyncReadExt;

    let mut reader = driver.get_reader(item).await?;
    let mut buf = vec![0u8; MAX_FRAME_BYTES];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| VaultError::io(e, None::<std::path::PathBuf>))?;
        if n == 0 {
            break;
        }
        transport.send(Frame::Binary(buf[..n].to_vec())).await?;
    }
    Ok(())
}

/// Drain one queue, applying the strategy's decision to each item in turn.
/// The caller role determines who performs the wire fetch when the
/// decision is `Fetch`: the initiator of reconciliation always fetches.
async fn drain_queue(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    strategy: &dyn SyncStrategy,
    queue: QueueKind,
) -> VaultResult<()> {
    while let Some(item) = driver.next(queue).await {
        let outcome = strategy.fetch_single(&item, queue).await?;
        match outcome {
            FetchOutcome::TouchOnly | FetchOutcome::Skipped => {}
            FetchOutcome::Fetch => {
                send_message(transport, V1Message::ItemFetch { item: item.clone() }).await?;
                receive_body(transport, driver, &item).await?;
            }
        }
    }
    Ok(())
}

/// Send the `vault_name` handshake frame (client role).
pub async fn send_vault_name(transport: &mut dyn FrameTransport, name: &str) -> VaultResult<()> {
    send_message(
        transport,
        V1Message::VaultName {
            name: name.to_string(),
        },
    )
    .await
}

/// Send the `sync_strategy` handshake frame (client role).
pub async fn send_sync_strategy(
    transport: &mut dyn FrameTransport,
    sync_strategy: u8,
) -> VaultResult<()> {
    send_message(transport, V1Message::SyncStrategy { sync_strategy }).await
}

/// Receive the `vault_name` handshake frame (server role).
pub async fn recv_vault_name(transport: &mut dyn FrameTransport) -> VaultResult<String> {
    match recv_message(transport).await? {
        Some(V1Message::VaultName { name }) => Ok(name),
        Some(other) => Err(VaultError::HandshakeNotComplete(format!(
            "expected vault_name, got {}",
            other.kind()
        ))),
        None => Err(VaultError::PeerClosed),
    }
}

/// Receive the `sync_strategy` handshake frame (server role).
pub async fn recv_sync_strategy(transport: &mut dyn FrameTransport) -> VaultResult<u8> {
    match recv_message(transport).await? {
        Some(V1Message::SyncStrategy { sync_strategy }) => Ok(sync_strategy),
        Some(other) => Err(VaultError::HandshakeNotComplete(format!(
            "expected sync_strategy, got {}",
            other.kind()
        ))),
        None => Err(VaultError::PeerClosed),
    }
}

/// Run the initiator side of one reconciliation round: send `sync`, receive
/// `initial_sync`, enqueue, drain both queues, then announce
/// `initial_sync_done`. Returns the new watermark.
#[instrument(skip_all)]
pub async fn run_initiator_sync(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    strategy: &dyn SyncStrategy,
    last_sync: i64,
) -> VaultResult<i64> {
    send_message(transport, V1Message::Sync { last_sync }).await?;

    let items = match recv_message(transport).await? {
        Some(V1Message::InitialSync { items }) => items,
        Some(other) => {
            return Err(VaultError::Protocol(format!(
                "expected initial_sync, got {}",
                other.kind()
            )))
        }
        None => return Err(VaultError::PeerClosed),
    };

    driver.enqueue(items).await?;
    drain_queue(transport, driver, strategy, QueueKind::Normal).await?;
    drain_queue(transport, driver, strategy, QueueKind::Conflict).await?;

    let new_watermark = chrono::Utc::now().timestamp();
    send_message(
        transport,
        V1Message::InitialSyncDone {
            last_sync: new_watermark,
        },
    )
    .await?;

    Ok(new_watermark)
}

/// Run the responder side: receive `sync`, enumerate items changed since
/// that watermark, answer with `initial_sync`, then wait for the peer's
/// `initial_sync_done`.
#[instrument(skip_all)]
pub async fn run_responder_sync(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    owner: &str,
    vault_name: &str,
) -> VaultResult<i64> {
    let last_sync = match recv_message(transport).await? {
        Some(V1Message::Sync { last_sync }) => last_sync,
        Some(other) => {
            return Err(VaultError::Protocol(format!(
                "expected sync, got {}",
                other.kind()
            )))
        }
        None => return Err(VaultError::PeerClosed),
    };

    driver.enqueue_changed_since(last_sync).await?;
    let mut items = driver.get_all(QueueKind::Normal).await;
    for item in items.iter_mut() {
        item.owner = owner.to_string();
        item.vault_name = vault_name.to_string();
    }
    // Drain the driver's queue now that we've copied it out; the responder
    // does not itself fetch bodies during this round.
    while driver.next(QueueKind::Normal).await.is_some() {}

    send_message(transport, V1Message::InitialSync { items }).await?;

    match recv_message(transport).await? {
        Some(V1Message::InitialSyncDone { last_sync }) => Ok(last_sync),
        Some(other) => Err(VaultError::Protocol(format!(
            "expected initial_sync_done, got {}",
            other.kind()
        ))),
        None => Err(VaultError::PeerClosed),
    }
}

/// Handle one inbound `item_save` during steady state (spec §4.2): touch on
/// digest match, otherwise pull the body. The conflict/mtime rule still
/// applies via the strategy.
pub async fn handle_item_save(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    strategy: &dyn SyncStrategy,
    item: Item,
) -> VaultResult<()> {
    let queue = if driver.exists(&item).await {
        let local_mtime = driver.get_mtime(&item).await.unwrap_or(i64::MIN);
        let local_digest = driver.calculate_sha256(&item).await.unwrap_or_default();
        if local_mtime > item.server_mtime && local_digest != item.sha256 {
            QueueKind::Conflict
        } else {
            QueueKind::Normal
        }
    } else {
        QueueKind::Normal
    };

    match strategy.fetch_single(&item, queue).await? {
        FetchOutcome::TouchOnly | FetchOutcome::Skipped => Ok(()),
        FetchOutcome::Fetch => {
            send_message(transport, V1Message::ItemFetch { item: item.clone() }).await?;
            receive_body(transport, driver, &item).await
        }
    }
}

/// Announce a local change to the peer and, if it requests the body, send
/// it (spec §4.2 steady-state propagation, receiver-initiated `item_fetch`).
pub async fn push_item_save(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    item: Item,
) -> VaultResult<()> {
    send_message(transport, V1Message::ItemSave { item: item.clone() }).await?;
    match recv_message(transport).await? {
        Some(V1Message::ItemFetch { item: requested }) => {
            send_body(transport, driver, &requested).await
        }
        Some(other) => Err(VaultError::Protocol(format!(
            "expected item_fetch after item_save, got {}",
            other.kind()
        ))),
        None => Err(VaultError::PeerClosed),
    }
}

/// Drive one pass of the steady-state event loop: wait for either a peer
/// frame, a local watcher event, or a fan-out bus event, and react.
///
/// `session_id` identifies this connection's own subscription so its own
/// publications can be filtered back out instead of being re-forwarded to
/// the peer, which would otherwise settle-loop forever (publish → own
/// subscriber wakes → forward to peer → peer republishes → ...).
#[allow(clippy::too_many_arguments)]
pub async fn steady_state_tick(
    transport: &mut dyn FrameTransport,
    driver: &dyn StorageDriver,
    strategy: &dyn SyncStrategy,
    watcher_rx: &mut tokio::sync::mpsc::Receiver<Item>,
    bus: &Arc<dyn PubSub>,
    bus_rx: &mut tokio::sync::broadcast::Receiver<ItemChanged>,
    owner: &str,
    vault_name: &str,
    session_id: Uuid,
) -> VaultResult<bool> {
    tokio::select! {
        frame = recv_message(transport) => {
            match frame? {
                None => Ok(false),
                Some(V1Message::ItemSave { item }) => {
                    handle_item_save(transport, driver, strategy, item.clone()).await?;
                    bus.publish(&topic_for(owner, vault_name), item, session_id).await;
                    Ok(true)
                }
                Some(other) => Err(VaultError::UnknownMessageType {
                    version: 1,
                    message_type: other.kind().to_string(),
                }),
            }
        }
        changed = watcher_rx.recv() => {
            match changed {
                Some(item) => {
                    push_item_save(transport, driver, item).await?;
                    Ok(true)
                }
                None => {
                    debug!("watcher channel closed");
                    Ok(true)
                }
            }
        }
        event = bus_rx.recv() => {
            match event {
                Ok(changed) if changed.origin == session_id => {
                    // Our own publish looping back through the broadcast
                    // channel; already applied locally, nothing to forward.
                    Ok(true)
                }
                Ok(changed) => {
                    push_item_save(transport, driver, changed.item).await?;
                    Ok(true)
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "fan-out subscriber lagged, dropping missed events");
                    Ok(true)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => Ok(true),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_item_save() {
        let item = Item {
            owner: "alice".into(),
            vault_name: "v1".into(),
            server_path: "a.txt".into(),
            server_mtime: 10,
            size: 3,
            sha256: "0".repeat(64),
        };
        let message = V1Message::ItemSave { item: item.clone() };
        let envelope = message.into_envelope().unwrap();
        assert_eq!(envelope.kind, "item_save");
        assert_eq!(envelope.version, 1);

        let decoded = V1Message::from_envelope(&envelope).unwrap();
        match decoded {
            V1Message::ItemSave { item: decoded_item } => assert_eq!(decoded_item, item),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn envelope_round_trips_sync() {
        let message = V1Message::Sync { last_sync: 42 };
        let envelope = message.into_envelope().unwrap();
        let decoded = V1Message::from_envelope(&envelope).unwrap();
        match decoded {
            V1Message::Sync { last_sync } => assert_eq!(last_sync, 42),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
