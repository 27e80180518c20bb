//! Credential verification for the session handshake.
//!
//! Mirrors the teacher's pluggable-provider pattern (a trait plus a real and
//! a mock implementation) but swaps JWT/bearer validation for the HTTP Basic
//! username/password check the protocol actually uses.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for pluggable credential verification so tests can inject a mock.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    async fn verify(&self, username: &str, password: &str) -> bool;
}

/// Verifier backed by an in-memory table of SHA-256 password digests.
///
/// The external identity store this wraps is out of scope for this crate;
/// callers populate the table from wherever accounts actually live.
pub struct TableCredentialVerifier {
    digests: Arc<RwLock<HashMap<String, String>>>,
}

impl TableCredentialVerifier {
    pub fn new() -> Self {
        Self {
            digests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set_password(&self, username: &str, password: &str) {
        let digest = hash_password(password);
        self.digests
            .write()
            .await
            .insert(username.to_string(), digest);
    }
}

impl Default for TableCredentialVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialVerifier for TableCredentialVerifier {
    async fn verify(&self, username: &str, password: &str) -> bool {
        let table = self.digests.read().await;
        match table.get(username) {
            Some(expected) => *expected == hash_password(password),
            None => false,
        }
    }
}

/// Verifier used in tests to deterministically accept/reject any credentials.
pub struct MockCredentialVerifier {
    pub accept: bool,
}

impl MockCredentialVerifier {
    pub fn new(accept: bool) -> Self {
        Self { accept }
    }
}

#[async_trait]
impl CredentialVerifier for MockCredentialVerifier {
    async fn verify(&self, _username: &str, _password: &str) -> bool {
        self.accept
    }
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Encode an `Authorization: Basic ...` header value for the client side.
pub fn basic_auth_header(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    format!("Basic {}", STANDARD.encode(raw))
}

/// Decode an `Authorization: Basic ...` header value on the server side.
/// Returns `(username, password)` on success.
pub fn decode_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
