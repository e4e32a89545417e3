//! Tunnel statistics counters.
//!
//! The data-channel engine reports per-packet outcomes through the narrow
//! [`TunnelStats`] interface: replay rejections and authentication failures
//! are counted separately so that replay attacks remain distinguishable from
//! corruption in telemetry. The engine only ever increments counters; it
//! never reads them back.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter sink for per-packet data-channel outcomes.
///
/// Implementations must be cheap and non-blocking; these methods are called
/// from the packet hot path.
pub trait TunnelStats: Send + Sync {
    /// A packet decrypted and passed all checks. `bytes` is the plaintext size.
    fn good_packet(&self, bytes: usize);

    /// A packet was rejected by replay protection. `bytes` is the wire size.
    fn replay_rejected(&self, bytes: usize);

    /// A packet failed authentication (tag/HMAC mismatch, truncation, or an
    /// unknown key generation). `bytes` is the wire size.
    fn auth_failed(&self, bytes: usize);
}

/// Stats sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl TunnelStats for NullStats {
    fn good_packet(&self, _bytes: usize) {}
    fn replay_rejected(&self, _bytes: usize) {}
    fn auth_failed(&self, _bytes: usize) {}
}

/// Lock-free counter set suitable for sharing across packet paths.
#[derive(Debug, Default)]
pub struct AtomicStats {
    good_packets: AtomicU64,
    good_bytes: AtomicU64,
    replay_packets: AtomicU64,
    replay_bytes: AtomicU64,
    auth_fail_packets: AtomicU64,
    auth_fail_bytes: AtomicU64,
}

impl AtomicStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a consistent-enough snapshot for diagnostics.
    ///
    /// Counters are read individually with relaxed ordering; totals may be
    /// momentarily skewed while traffic is flowing.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            good_packets: self.good_packets.load(Ordering::Relaxed),
            good_bytes: self.good_bytes.load(Ordering::Relaxed),
            replay_packets: self.replay_packets.load(Ordering::Relaxed),
            replay_bytes: self.replay_bytes.load(Ordering::Relaxed),
            auth_fail_packets: self.auth_fail_packets.load(Ordering::Relaxed),
            auth_fail_bytes: self.auth_fail_bytes.load(Ordering::Relaxed),
        }
    }
}

impl TunnelStats for AtomicStats {
    fn good_packet(&self, bytes: usize) {
        self.good_packets.fetch_add(1, Ordering::Relaxed);
        self.good_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn replay_rejected(&self, bytes: usize) {
        self.replay_packets.fetch_add(1, Ordering::Relaxed);
        self.replay_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn auth_failed(&self, bytes: usize) {
        self.auth_fail_packets.fetch_add(1, Ordering::Relaxed);
        self.auth_fail_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// Point-in-time view of an [`AtomicStats`] counter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub good_packets: u64,
    pub good_bytes: u64,
    pub replay_packets: u64,
    pub replay_bytes: u64,
    pub auth_fail_packets: u64,
    pub auth_fail_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = AtomicStats::new();

        stats.good_packet(100);
        stats.good_packet(50);
        stats.replay_rejected(20);
        stats.auth_failed(30);

        let snap = stats.snapshot();
        assert_eq!(snap.good_packets, 2);
        assert_eq!(snap.good_bytes, 150);
        assert_eq!(snap.replay_packets, 1);
        assert_eq!(snap.replay_bytes, 20);
        assert_eq!(snap.auth_fail_packets, 1);
        assert_eq!(snap.auth_fail_bytes, 30);
    }

    #[test]
    fn null_stats_discards() {
        let stats = NullStats;
        stats.good_packet(1);
        stats.replay_rejected(1);
        stats.auth_failed(1);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = AtomicStats::new();
        stats.good_packet(42);

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"good_bytes\":42"));
    }
}
