//! Client-side persisted settings (spec §6 on-disk layout), grounded in the
//! original client's settings store: `${vault_path}/${vault_name}/.gobi-sync/`
//! holding `settings.json` (strategy, version, vault name) and `sync.json`
//! (`last_sync`). Renamed from the original's `.gobi` directory name since
//! this crate doesn't carry that upstream project's name anywhere.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{VaultError, VaultResult};

const STORE_DIR_NAME: &str = ".gobi-sync";
const SETTINGS_FILE: &str = "settings.json";
const SYNC_FILE: &str = "sync.json";

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o640;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub sync_strategy: u8,
    pub websocket_version: u32,
    pub vault_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub last_sync: i64,
}

/// The client-side persisted store rooted at
/// `${vault_path}/${vault_name}/.gobi-sync/`.
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    fn store_dir(vault_path: &Path, vault_name: &str) -> PathBuf {
        vault_path.join(vault_name).join(STORE_DIR_NAME)
    }

    /// Open the store for `config`, creating and initializing it from the
    /// config's values if this is the first run, otherwise leaving existing
    /// files untouched.
    pub async fn open(config: &ClientConfig) -> VaultResult<Self> {
        let dir = Self::store_dir(&config.vault_path, &config.vault_name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| VaultError::io(e, dir.clone()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, std::fs::Permissions::from_mode(DIR_MODE))
                .await
                .map_err(|e| VaultError::io(e, dir.clone()))?;
        }

        let store = Self { dir };

        if !store.settings_path_exists().await {
            store
                .save_settings(&Settings {
                    sync_strategy: config.sync_strategy,
                    websocket_version: config.websocket_version,
                    vault_name: config.vault_name.clone(),
                })
                .await?;
        }
        if !store.sync_path_exists().await {
            store.save_sync_state(&SyncState { last_sync: 0 }).await?;
        }

        Ok(store)
    }

    async fn settings_path_exists(&self) -> bool {
        fs::try_exists(self.dir.join(SETTINGS_FILE))
            .await
            .unwrap_or(false)
    }

    async fn sync_path_exists(&self) -> bool {
        fs::try_exists(self.dir.join(SYNC_FILE)).await.unwrap_or(false)
    }

    pub async fn load_settings(&self) -> VaultResult<Settings> {
        self.load_json(SETTINGS_FILE).await
    }

    pub async fn save_settings(&self, settings: &Settings) -> VaultResult<()> {
        self.save_json(SETTINGS_FILE, settings).await
    }

    pub async fn load_sync_state(&self) -> VaultResult<SyncState> {
        self.load_json(SYNC_FILE).await
    }

    pub async fn save_sync_state(&self, state: &SyncState) -> VaultResult<()> {
        debug!(last_sync = state.last_sync, "persisting sync watermark");
        self.save_json(SYNC_FILE, state).await
    }

    async fn load_json<T: for<'de> Deserialize<'de>>(&self, name: &str) -> VaultResult<T> {
        let path = self.dir.join(name);
        let bytes = fs::read(&path).await.map_err(|e| VaultError::io(e, path.clone()))?;
        serde_json::from_slice(&bytes).map_err(VaultError::MalformedJson)
    }

    async fn save_json<T: Serialize>(&self, name: &str, value: &T) -> VaultResult<()> {
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec_pretty(value).map_err(VaultError::MalformedJson)?;
        fs::write(&path, &bytes)
            .await
            .map_err(|e| VaultError::io(e, path.clone()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(FILE_MODE))
                .await
                .map_err(|e| VaultError::io(e, path))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(vault_path: PathBuf) -> ClientConfig {
        ClientConfig {
            vault_path,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn open_initializes_settings_and_sync_state_on_first_run() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path().to_path_buf());
        let store = LocalStore::open(&cfg).await.unwrap();

        let settings = store.load_settings().await.unwrap();
        assert_eq!(settings.sync_strategy, cfg.sync_strategy);
        assert_eq!(settings.vault_name, cfg.vault_name);

        let sync_state = store.load_sync_state().await.unwrap();
        assert_eq!(sync_state.last_sync, 0);
    }

    #[tokio::test]
    async fn reopen_preserves_persisted_watermark() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path().to_path_buf());
        let store = LocalStore::open(&cfg).await.unwrap();
        store
            .save_sync_state(&SyncState { last_sync: 12345 })
            .await
            .unwrap();

        let reopened = LocalStore::open(&cfg).await.unwrap();
        let sync_state = reopened.load_sync_state().await.unwrap();
        assert_eq!(sync_state.last_sync, 12345);
    }
}
