//! Shared utilities for Burrow: logging bootstrap and tunnel statistics.
//!
//! This crate provides common infrastructure used across all Burrow
//! components. The data-channel engine consumes the [`stats`] counters
//! interface; binaries and integration tests use the tracing bootstrap.

#![forbid(unsafe_code)]

pub mod stats;

pub use stats::{AtomicStats, NullStats, StatsSnapshot, TunnelStats};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
