//! End-to-end reconciliation round-trips over an in-memory transport pair,
//! covering spec §8 scenarios 1 and 2.

use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;

use commy_sync::protocol::v1;
use commy_sync::session::transport::ChannelTransport;
use commy_sync::storage::{LocalStorageDriver, QueueKind, StorageDriver};
use commy_sync::strategy::{LastModifiedStrategy, SyncStrategy};
use commy_sync::Item;

#[tokio::test]
async fn empty_to_empty_round_trip_transfers_nothing() {
    let (mut client_transport, mut server_transport) = ChannelTransport::pair();

    let server_root = tempdir().unwrap();
    let client_root = tempdir().unwrap();
    let server_driver = Arc::new(
        LocalStorageDriver::open(server_root.path(), "v1")
            .await
            .unwrap(),
    );
    let client_driver: Arc<dyn StorageDriver> = Arc::new(
        LocalStorageDriver::open(client_root.path(), "v1")
            .await
            .unwrap(),
    );
    let client_strategy = LastModifiedStrategy::new(client_driver.clone());

    let server_task = tokio::spawn(async move {
        v1::run_responder_sync(&mut server_transport, server_driver.as_ref(), "alice", "v1")
            .await
            .unwrap()
    });

    let client_watermark = v1::run_initiator_sync(
        &mut client_transport,
        client_driver.as_ref(),
        &client_strategy,
        0,
    )
    .await
    .unwrap();

    let server_watermark = server_task.await.unwrap();
    assert!(client_watermark > 0);
    assert_eq!(server_watermark, client_watermark);
    assert!(!client_driver.has_items(QueueKind::Normal).await);
}

#[tokio::test]
async fn single_remote_file_is_fetched_with_matching_digest_and_size() {
    let (mut client_transport, mut server_transport) = ChannelTransport::pair();

    let server_root = tempdir().unwrap();
    let client_root = tempdir().unwrap();

    let server_driver = Arc::new(
        LocalStorageDriver::open(server_root.path(), "v1")
            .await
            .unwrap(),
    );
    let body = b"hello, vault";
    let mut hasher = sha2::Sha256::new();
    use sha2::Digest;
    hasher.update(body);
    let digest = hex::encode(hasher.finalize());

    let remote_item = Item {
        owner: "alice".into(),
        vault_name: "v1".into(),
        server_path: "a.txt".into(),
        server_mtime: 10,
        size: body.len() as u64,
        sha256: digest.clone(),
    };
    {
        let mut writer = server_driver.get_writer(&remote_item).await.unwrap();
        writer.write_all(body).await.unwrap();
        writer.commit().await.unwrap();
    }

    let client_driver: Arc<dyn StorageDriver> = Arc::new(
        LocalStorageDriver::open(client_root.path(), "v1")
            .await
            .unwrap(),
    );
    let client_strategy = LastModifiedStrategy::new(client_driver.clone());

    let server_task = tokio::spawn(async move {
        v1::run_responder_sync(&mut server_transport, server_driver.as_ref(), "alice", "v1")
            .await
            .unwrap()
    });

    v1::run_initiator_sync(&mut client_transport, client_driver.as_ref(), &client_strategy, 0)
        .await
        .unwrap();
    server_task.await.unwrap();

    assert!(client_driver.exists(&remote_item).await);
    assert_eq!(
        client_driver.calculate_sha256(&remote_item).await.unwrap(),
        digest
    );
}
