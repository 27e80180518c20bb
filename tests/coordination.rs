//! Coordination Layer properties (spec §4.5, §8 law "Lock mutual
//! exclusion" and scenario 6: concurrent clients on the same vault).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commy_sync::coordination::lock::{acquire, LOCK_TTL};
use commy_sync::coordination::{DistributedLock, InMemoryLock, InMemoryPubSub, PubSub};
use commy_sync::Item;
use uuid::Uuid;

#[tokio::test]
async fn concurrent_acquirers_never_overlap() {
    let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryLock::new());
    let key = "sync:alice:v1";
    let in_critical_section = Arc::new(AtomicUsize::new(0));
    let max_observed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lock = lock.clone();
        let in_critical_section = in_critical_section.clone();
        let max_observed = max_observed.clone();
        handles.push(tokio::spawn(async move {
            let guard = acquire(lock, key, Duration::from_secs(5)).await.unwrap();
            let current = in_critical_section.fetch_add(1, Ordering::SeqCst) + 1;
            max_observed.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            in_critical_section.fetch_sub(1, Ordering::SeqCst);
            guard.release().await;
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(max_observed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lock_ceiling_is_respected_by_try_acquire_directly() {
    let lock = InMemoryLock::new();
    assert!(lock.try_acquire("k", LOCK_TTL).await);
    assert!(!lock.try_acquire("k", LOCK_TTL).await);
}

#[tokio::test]
async fn bus_fans_out_to_multiple_subscribers() {
    let bus = InMemoryPubSub::new();
    let topic = "alice:v1";
    let mut sub_a = bus.subscribe(topic).await;
    let mut sub_b = bus.subscribe(topic).await;

    let item = Item {
        owner: "alice".into(),
        vault_name: "v1".into(),
        server_path: "a.txt".into(),
        server_mtime: 1,
        size: 1,
        sha256: "0".repeat(64),
    };
    bus.publish(topic, item.clone(), Uuid::new_v4()).await;

    let a = sub_a.recv().await.unwrap();
    let b = sub_b.recv().await.unwrap();
    assert_eq!(a.item.server_path, item.server_path);
    assert_eq!(b.item.server_path, item.server_path);
}
