//! Filesystem realization of the `StorageDriver` contract (spec §4.3).

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::item::{safe_join, Item};

use super::{ItemWriter, QueueKind, StorageDriver};

#[cfg(unix)]
const VAULT_ROOT_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o666;
#[cfg(unix)]
const DIR_MODE: u32 = 0o777;

struct Queues {
    normal: VecDeque<Item>,
    conflict: VecDeque<Item>,
}

/// One driver instance per connection, scoped to one `(owner, vault)` vault
/// root. Not `Clone` — the queues are single-threaded across a reconciliation
/// round by design (spec §4.3 lifecycle invariant).
pub struct LocalStorageDriver {
    vault_root: PathBuf,
    queues: Mutex<Queues>,
}

impl LocalStorageDriver {
    /// Create the vault root (mode 0700) if absent and return a driver
    /// rooted there.
    pub async fn open(local_vaults_root: &Path, vault_name: &str) -> VaultResult<Self> {
        let vault_root = local_vaults_root.join(vault_name);
        fs::create_dir_all(&vault_root)
            .await
            .map_err(|e| VaultError::io(e, vault_root.clone()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(VAULT_ROOT_MODE);
            fs::set_permissions(&vault_root, perms)
                .await
                .map_err(|e| VaultError::io(e, vault_root.clone()))?;
        }

        Ok(Self {
            vault_root,
            queues: Mutex::new(Queues {
                normal: VecDeque::new(),
                conflict: VecDeque::new(),
            }),
        })
    }

    fn resolve(&self, item: &Item) -> VaultResult<PathBuf> {
        safe_join(&self.vault_root, &item.server_path)
    }

    async fn local_digest(path: &Path) -> VaultResult<Option<String>> {
        if !fs::try_exists(path)
            .await
            .map_err(|e| VaultError::io(e, path.to_path_buf()))?
        {
            return Ok(None);
        }
        let bytes = fs::read(path)
            .await
            .map_err(|e| VaultError::io(e, path.to_path_buf()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Some(hex::encode(hasher.finalize())))
    }

    async fn local_mtime(path: &Path) -> VaultResult<Option<i64>> {
        match fs::metadata(path).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map_err(|e| VaultError::io(e, path.to_path_buf()))?;
                let secs = modified
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                Ok(Some(secs))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::io(e, path.to_path_buf())),
        }
    }
}

#[async_trait]
impl StorageDriver for LocalStorageDriver {
    #[instrument(skip(self, items))]
    async fn enqueue(&self, items: Vec<Item>) -> VaultResult<()> {
        let mut queues = self.queues.lock().await;
        for item in items {
            let path = self.resolve(&item)?;
            let local_digest = Self::local_digest(&path).await?;
            let local_mtime = Self::local_mtime(&path).await?;

            match (local_digest, local_mtime) {
                (None, _) => queues.normal.push_back(item),
                (Some(digest), Some(mtime))
                    if mtime > item.server_mtime && digest != item.sha256 =>
                {
                    queues.conflict.push_back(item);
                }
                (Some(digest), _) if digest == item.sha256 => {
                    // Digest already matches; nothing to transfer, but the
                    // local mtime still needs to catch up to the server's
                    // so a later `enqueue` doesn't see a stale mtime and
                    // misclassify this path as a conflict.
                    set_mtime(&path, item.server_mtime).await?;
                }
                (Some(_), Some(mtime)) if mtime <= item.server_mtime => {
                    queues.normal.push_back(item);
                }
                _ => queues.normal.push_back(item),
            }
        }
        Ok(())
    }

    async fn has_items(&self, queue: QueueKind) -> bool {
        let queues = self.queues.lock().await;
        match queue {
            QueueKind::Normal => !queues.normal.is_empty(),
            QueueKind::Conflict => !queues.conflict.is_empty(),
        }
    }

    async fn next(&self, queue: QueueKind) -> Option<Item> {
        let mut queues = self.queues.lock().await;
        match queue {
            QueueKind::Normal => queues.normal.pop_front(),
            QueueKind::Conflict => queues.conflict.pop_front(),
        }
    }

    async fn get_all(&self, queue: QueueKind) -> Vec<Item> {
        let queues = self.queues.lock().await;
        match queue {
            QueueKind::Normal => queues.normal.iter().cloned().collect(),
            QueueKind::Conflict => queues.conflict.iter().cloned().collect(),
        }
    }

    #[instrument(skip(self))]
    async fn enqueue_changed_since(&self, last_sync: i64) -> VaultResult<()> {
        let mut stack = vec![self.vault_root.clone()];
        let mut found = Vec::new();

        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| VaultError::io(e, dir.clone()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| VaultError::io(e, dir.clone()))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| VaultError::io(e, path.clone()))?;
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let mtime = Self::local_mtime(&path).await?.unwrap_or(0);
                if mtime < last_sync {
                    continue;
                }
                let rel = path
                    .strip_prefix(&self.vault_root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                let digest = Self::local_digest(&path).await?.unwrap_or_default();
                let size = fs::metadata(&path)
                    .await
                    .map_err(|e| VaultError::io(e, path.clone()))?
                    .len();
                found.push(Item {
                    owner: String::new(),
                    vault_name: String::new(),
                    server_path: rel,
                    server_mtime: mtime,
                    size,
                    sha256: digest,
                });
            }
        }

        let mut queues = self.queues.lock().await;
        queues.normal.extend(found);
        Ok(())
    }

    async fn get_reader(&self, item: &Item) -> VaultResult<Box<dyn AsyncRead + Unpin + Send>> {
        let path = self.resolve(item)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| VaultError::io(e, path))?;
        Ok(Box::new(file))
    }

    async fn get_writer(&self, item: &Item) -> VaultResult<Box<dyn ItemWriter>> {
        let final_path = self.resolve(item)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::io(e, parent.to_path_buf()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(DIR_MODE);
                let _ = fs::set_permissions(parent, perms).await;
            }
        }

        let temp_path = final_path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let file = fs::File::create(&temp_path)
            .await
            .map_err(|e| VaultError::io(e, temp_path.clone()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(FILE_MODE);
            let _ = fs::set_permissions(&temp_path, perms).await;
        }

        Ok(Box::new(LocalItemWriter {
            file,
            temp_path,
            final_path,
        }))
    }

    async fn exists(&self, item: &Item) -> bool {
        let Ok(path) = self.resolve(item) else {
            return false;
        };
        fs::try_exists(&path).await.unwrap_or(false)
    }

    async fn touch(&self, item: &Item) -> VaultResult<()> {
        let path = self.resolve(item)?;
        set_mtime(&path, item.server_mtime).await
    }

    async fn calculate_sha256(&self, item: &Item) -> VaultResult<String> {
        let path = self.resolve(item)?;
        Self::local_digest(&path)
            .await?
            .ok_or_else(|| VaultError::io(std::io::Error::from(std::io::ErrorKind::NotFound), path))
    }

    async fn get_mtime(&self, item: &Item) -> VaultResult<i64> {
        let path = self.resolve(item)?;
        Self::local_mtime(&path)
            .await?
            .ok_or_else(|| VaultError::io(std::io::Error::from(std::io::ErrorKind::NotFound), path))
    }
}

struct LocalItemWriter {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl AsyncWrite for LocalItemWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        std::pin::Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::pin::Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::pin::Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

#[async_trait]
impl ItemWriter for LocalItemWriter {
    async fn commit(mut self: Box<Self>) -> VaultResult<()> {
        self.file
            .flush()
            .await
            .map_err(|e| VaultError::io(e, self.temp_path.clone()))?;
        drop(self.file);

        match fs::rename(&self.temp_path, &self.final_path).await {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                debug!("cross-device rename, falling back to copy+unlink");
                fs::copy(&self.temp_path, &self.final_path)
                    .await
                    .map_err(|e| VaultError::RenameFailed(e.to_string()))?;
                if let Err(e) = fs::remove_file(&self.temp_path).await {
                    warn!(error = %e, "failed to unlink temp file after cross-device copy");
                }
                Ok(())
            }
            Err(e) => Err(VaultError::RenameFailed(e.to_string())),
        }
    }
}

#[cfg(unix)]
fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc_exdev())
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux and most unix targets
}

#[cfg(not(unix))]
fn is_cross_device(_e: &std::io::Error) -> bool {
    false
}

async fn set_mtime(path: &Path, epoch_secs: i64) -> VaultResult<()> {
    let time = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(epoch_secs.max(0) as u64);
    let owned_path = path.to_path_buf();
    let task_path = owned_path.clone();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_mtime(&task_path, filetime::FileTime::from_system_time(time))
    })
    .await
    .map_err(|e| VaultError::Transport(e.to_string()))?
    .map_err(|e| VaultError::io(e, owned_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write_remote_item(driver: &LocalStorageDriver, item: &Item, body: &[u8]) {
        let mut writer = driver.get_writer(item).await.unwrap();
        writer.write_all(body).await.unwrap();
        writer.commit().await.unwrap();
    }

    fn item(path: &str, mtime: i64, size: u64, sha256: &str) -> Item {
        Item {
            owner: "alice".into(),
            vault_name: "v1".into(),
            server_path: path.into(),
            server_mtime: mtime,
            size,
            sha256: sha256.into(),
        }
    }

    #[tokio::test]
    async fn absent_local_file_goes_to_normal_queue() {
        let root = tempdir().unwrap();
        let driver = LocalStorageDriver::open(root.path(), "v1").await.unwrap();
        let i = item("a.txt", 10, 5, &"a".repeat(64));
        driver.enqueue(vec![i.clone()]).await.unwrap();
        assert!(driver.has_items(QueueKind::Normal).await);
        assert!(!driver.has_items(QueueKind::Conflict).await);
    }

    #[tokio::test]
    async fn writer_commit_makes_body_readable_with_matching_digest() {
        let root = tempdir().unwrap();
        let driver = LocalStorageDriver::open(root.path(), "v1").await.unwrap();
        let body = b"hello world";
        let mut hasher = Sha256::new();
        hasher.update(body);
        let digest = hex::encode(hasher.finalize());
        let i = item("nested/a.txt", 10, body.len() as u64, &digest);

        write_remote_item(&driver, &i, body).await;

        assert!(driver.exists(&i).await);
        assert_eq!(driver.calculate_sha256(&i).await.unwrap(), digest);
    }

    #[tokio::test]
    async fn newer_local_mtime_with_different_content_is_a_conflict() {
        let root = tempdir().unwrap();
        let driver = LocalStorageDriver::open(root.path(), "v1").await.unwrap();
        let local_item = item("a.txt", 5, 5, &"f".repeat(64));
        write_remote_item(&driver, &local_item, b"local").await;
        driver.touch(&local_item).await.unwrap();

        // pretend the local file's mtime is now newer than what the server reports
        let newer = item("a.txt", 100, 5, &"f".repeat(64));
        set_mtime(
            &safe_join(&driver.vault_root, "a.txt").unwrap(),
            newer.server_mtime,
        )
        .await
        .unwrap();

        let remote_item = item("a.txt", 20, 6, &"0".repeat(64));
        driver.enqueue(vec![remote_item]).await.unwrap();
        assert!(driver.has_items(QueueKind::Conflict).await);
    }

    #[tokio::test]
    async fn touch_sets_local_mtime_to_server_mtime() {
        let root = tempdir().unwrap();
        let driver = LocalStorageDriver::open(root.path(), "v1").await.unwrap();
        let i = item("a.txt", 12345, 4, &"0".repeat(64));
        write_remote_item(&driver, &i, b"body").await;
        driver.touch(&i).await.unwrap();
        assert_eq!(driver.get_mtime(&i).await.unwrap(), 12345);
    }

    #[tokio::test]
    async fn enqueue_touches_mtime_on_digest_match_without_queuing() {
        let root = tempdir().unwrap();
        let driver = LocalStorageDriver::open(root.path(), "v1").await.unwrap();
        let body = b"unchanged";
        let mut hasher = Sha256::new();
        hasher.update(body);
        let digest = hex::encode(hasher.finalize());

        let local_item = item("a.txt", 5, body.len() as u64, &digest);
        write_remote_item(&driver, &local_item, body).await;
        driver.touch(&local_item).await.unwrap();

        let server_item = item("a.txt", 20, body.len() as u64, &digest);
        driver.enqueue(vec![server_item.clone()]).await.unwrap();

        assert!(!driver.has_items(QueueKind::Normal).await);
        assert!(!driver.has_items(QueueKind::Conflict).await);
        assert_eq!(driver.get_mtime(&server_item).await.unwrap(), 20);
    }
}
