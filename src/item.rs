//! The `Item` data model (spec §3) and vault-relative path safety.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// The unit of synchronization: one file's metadata record.
///
/// `(owner, vault_name, server_path)` is unique. When two records share that
/// triple and differ otherwise, the one with the larger `server_mtime`
/// supersedes, ties broken by the lexicographically larger `sha256`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub owner: String,
    pub vault_name: String,
    /// Vault-relative, forward-slash path. Never absolute, never containing
    /// `..` components.
    pub server_path: String,
    pub server_mtime: i64,
    pub size: u64,
    /// 64-character lowercase hex SHA-256 digest of the body.
    pub sha256: String,
}

impl Item {
    /// Whether `self` supersedes `other` under the last-writer-wins rule,
    /// assuming both share `(owner, vault_name, server_path)`.
    pub fn supersedes(&self, other: &Item) -> bool {
        match self.server_mtime.cmp(&other.server_mtime) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.sha256 > other.sha256,
        }
    }
}

/// Resolve `server_path` under `vault_root`, refusing any composition that
/// would escape the root (spec invariant 5).
///
/// `server_path` must be a relative, forward-slash path with no `..`
/// components and no absolute prefix; violating that is rejected before any
/// filesystem interaction, and the resulting join is verified (via
/// component-wise construction, not string concatenation) to stay under
/// `vault_root`.
pub fn safe_join(vault_root: &Path, server_path: &str) -> VaultResult<PathBuf> {
    if server_path.is_empty() {
        return Err(VaultError::PathEscape(server_path.to_string()));
    }

    let mut resolved = vault_root.to_path_buf();
    for segment in server_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(VaultError::PathEscape(server_path.to_string())),
            seg => {
                if seg.contains('\\') || Path::new(seg).is_absolute() {
                    return Err(VaultError::PathEscape(server_path.to_string()));
                }
                resolved.push(seg);
            }
        }
    }

    // Belt-and-suspenders: re-walk the lexical components of the resolved
    // path and confirm none of them is a `ParentDir` that could have crept
    // in from a platform-specific quirk of `PathBuf::push`.
    for component in resolved.components() {
        if matches!(component, Component::ParentDir) {
            return Err(VaultError::PathEscape(server_path.to_string()));
        }
    }

    if !resolved.starts_with(vault_root) {
        return Err(VaultError::PathEscape(server_path.to_string()));
    }

    Ok(resolved)
}
