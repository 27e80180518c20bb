//! `watch_vault` (spec §4.3): a recursive filesystem watcher that turns
//! write events into synthesized `Item`s pushed onto an output channel.
//! Delete events are intentionally dropped — deletion propagation is a
//! documented non-goal.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::item::Item;

/// Attach a recursive watcher to `vault_root` and forward every observed
/// write as an `Item` (owner/vault_name filled in by the caller) on the
/// returned channel. The watcher task runs until the channel is dropped.
pub fn watch_vault(
    vault_root: PathBuf,
    owner: String,
    vault_name: String,
) -> notify::Result<(mpsc::Receiver<Item>, RecommendedWatcher)> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
    let (item_tx, item_rx) = mpsc::channel::<Item>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = raw_tx.send(event);
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&vault_root, RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            for path in event.paths {
                if !path.is_file() {
                    continue;
                }
                let Some(server_path) = relative_slash_path(&vault_root, &path) else {
                    continue;
                };
                let Ok(item) = synthesize_item(&owner, &vault_name, &server_path, &path).await
                else {
                    continue;
                };
                debug!(server_path, "watcher observed write");
                if item_tx.send(item).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok((item_rx, watcher))
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
}

async fn synthesize_item(
    owner: &str,
    vault_name: &str,
    server_path: &str,
    path: &Path,
) -> std::io::Result<Item> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let meta = tokio::fs::metadata(path).await?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    Ok(Item {
        owner: owner.to_string(),
        vault_name: vault_name.to_string(),
        server_path: server_path.to_string(),
        server_mtime: mtime,
        size: bytes.len() as u64,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn watcher_observes_a_new_file() {
        let dir = tempdir().unwrap();
        let (mut rx, _watcher) =
            watch_vault(dir.path().to_path_buf(), "alice".into(), "v1".into()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::fs::write(dir.path().join("new.txt"), b"hi").await.unwrap();

        let item = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher should observe the write")
            .expect("channel should stay open");
        assert_eq!(item.server_path, "new.txt");
        assert_eq!(item.owner, "alice");
    }
}
