//! Unified configuration for the server and client binaries.
//!
//! Mirrors spec.md §6's documented defaults and environment variables.
//! Both configs are plain `serde`-serializable structs with `Default` impls
//! rather than a builder, since neither has the combinatorial surface that
//! would justify one.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server-side configuration, assembled from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `LOCAL_VAULTS_LOCATION` — base path under which per-vault directories
    /// are created.
    pub local_vaults_root: PathBuf,

    /// Address the WebSocket listener binds to.
    pub bind_address: String,

    /// Metadata-store connection string (consumed by the external item
    /// catalog; opaque to this crate).
    pub metadata_store_url: String,

    /// Coordination backend address (distributed lock + pub/sub bus).
    pub coordination_address: String,

    /// Coordination backend password, if required.
    pub coordination_password: Option<String>,

    /// Coordination backend logical database index.
    pub coordination_db_index: u32,
}

impl ServerConfig {
    /// Build from environment, falling back to documented defaults.
    pub fn from_env() -> Self {
        Self {
            local_vaults_root: std::env::var("LOCAL_VAULTS_LOCATION")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./vaults")),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            metadata_store_url: std::env::var("METADATA_STORE_URL")
                .unwrap_or_else(|_| "postgres://localhost/commy".to_string()),
            coordination_address: std::env::var("COORDINATION_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1:6379".to_string()),
            coordination_password: std::env::var("COORDINATION_PASSWORD").ok(),
            coordination_db_index: std::env::var("COORDINATION_DB_INDEX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            local_vaults_root: PathBuf::from("./vaults"),
            bind_address: "0.0.0.0:8080".to_string(),
            metadata_store_url: "postgres://localhost/commy".to_string(),
            coordination_address: "127.0.0.1:6379".to_string(),
            coordination_password: None,
            coordination_db_index: 0,
        }
    }
}

/// Client-side configuration — the in-memory form of the CLI flags and of
/// the persisted `.gobi-sync/settings.json` (see `local_store`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub vault_name: String,
    pub vault_path: PathBuf,
    pub sync_strategy: u8,
    /// Negotiated websocket protocol version. Hardcoded to 1: "we want to
    /// always use the latest".
    pub websocket_version: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8080".to_string(),
            username: "root".to_string(),
            password: "toor".to_string(),
            vault_name: "testVault".to_string(),
            vault_path: PathBuf::from(".dev/clientFolder"),
            sync_strategy: 1,
            websocket_version: 1,
        }
    }
}
