//! Tracing setup: a global subscriber reading `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info` when unset. Call once at process start.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
