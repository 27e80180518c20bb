//! Conflict resolution properties (spec §8 scenarios 3 and 4): digest-match
//! touch-only, and skip-on-conflict preserving the locally newer copy.

use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;

use commy_sync::storage::{LocalStorageDriver, QueueKind, StorageDriver};
use commy_sync::strategy::{FetchOutcome, LastModifiedStrategy, SyncStrategy};
use commy_sync::Item;

fn digest_of(bytes: &[u8]) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[tokio::test]
async fn identical_content_with_newer_server_mtime_touches_only() {
    let root = tempdir().unwrap();
    let body = b"same on both sides";
    let digest = digest_of(body);

    let driver: Arc<dyn StorageDriver> =
        Arc::new(LocalStorageDriver::open(root.path(), "v1").await.unwrap());

    let local_item = Item {
        owner: "alice".into(),
        vault_name: "v1".into(),
        server_path: "a.txt".into(),
        server_mtime: 10,
        size: body.len() as u64,
        sha256: digest.clone(),
    };
    {
        let mut writer = driver.get_writer(&local_item).await.unwrap();
        writer.write_all(body).await.unwrap();
        writer.commit().await.unwrap();
    }
    driver.touch(&local_item).await.unwrap();

    let server_item = Item {
        server_mtime: 20,
        ..local_item.clone()
    };

    let strategy = LastModifiedStrategy::new(driver.clone());
    let outcome = strategy
        .fetch_single(&server_item, QueueKind::Normal)
        .await
        .unwrap();

    assert_eq!(outcome, FetchOutcome::TouchOnly);
    assert_eq!(driver.get_mtime(&server_item).await.unwrap(), 20);
}

#[tokio::test]
async fn differing_content_with_newer_local_mtime_is_skipped() {
    let root = tempdir().unwrap();
    let driver: Arc<dyn StorageDriver> =
        Arc::new(LocalStorageDriver::open(root.path(), "v1").await.unwrap());

    let local_item = Item {
        owner: "alice".into(),
        vault_name: "v1".into(),
        server_path: "a.txt".into(),
        server_mtime: 30,
        size: 5,
        sha256: digest_of(b"local"),
    };
    {
        let mut writer = driver.get_writer(&local_item).await.unwrap();
        writer.write_all(b"local").await.unwrap();
        writer.commit().await.unwrap();
    }
    driver.touch(&local_item).await.unwrap();

    // Server reports a different, older item for the same path.
    let server_item = Item {
        server_mtime: 20,
        sha256: digest_of(b"server"),
        size: 6,
        ..local_item.clone()
    };

    driver.enqueue(vec![server_item.clone()]).await.unwrap();
    assert!(driver.has_items(QueueKind::Conflict).await);
    assert!(!driver.has_items(QueueKind::Normal).await);

    let strategy = LastModifiedStrategy::new(driver.clone());
    let queued = driver.next(QueueKind::Conflict).await.unwrap();
    let outcome = strategy
        .fetch_single(&queued, QueueKind::Conflict)
        .await
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Skipped);
    // The local body must be untouched: fetching its digest still matches
    // the locally-written content, not the server's.
    assert_eq!(
        driver.calculate_sha256(&local_item).await.unwrap(),
        digest_of(b"local")
    );
}
