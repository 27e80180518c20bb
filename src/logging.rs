//! Structured logging bootstrap.

use tracing_subscriber::EnvFilter;

/// Configure a global `tracing` subscriber from `RUST_LOG`, defaulting to
/// `info` when unset. Idempotent-ish: a second call is harmless if the
/// first already installed a subscriber (the error is swallowed).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
