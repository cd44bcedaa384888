//! Lightweight operational counters: ops applied, WAL bytes written, flush
//! outcomes, cache hit rate. Ambient observability, not a subsystem of its
//! own — every layer bumps these in passing.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters updated from hot paths across the engine, cache, and WAL.
#[derive(Debug, Default)]
pub struct Metrics {
    pub nodes_created: AtomicU64,
    pub nodes_updated: AtomicU64,
    pub nodes_deleted: AtomicU64,
    pub edges_created: AtomicU64,
    pub edges_updated: AtomicU64,
    pub edges_deleted: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub wal_bytes_written: AtomicU64,
    pub wal_batches_synced: AtomicU64,
    pub flush_successes: AtomicU64,
    pub flush_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wal_write(&self, bytes: u64) {
        self.wal_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_flush(&self, succeeded: bool) {
        if succeeded {
            self.flush_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.flush_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Takes a point-in-time, non-atomic copy suitable for logging or a
    /// status endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            nodes_updated: self.nodes_updated.load(Ordering::Relaxed),
            nodes_deleted: self.nodes_deleted.load(Ordering::Relaxed),
            edges_created: self.edges_created.load(Ordering::Relaxed),
            edges_updated: self.edges_updated.load(Ordering::Relaxed),
            edges_deleted: self.edges_deleted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            wal_bytes_written: self.wal_bytes_written.load(Ordering::Relaxed),
            wal_batches_synced: self.wal_batches_synced.load(Ordering::Relaxed),
            flush_successes: self.flush_successes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub nodes_deleted: u64,
    pub edges_created: u64,
    pub edges_updated: u64,
    pub edges_deleted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub wal_bytes_written: u64,
    pub wal_batches_synced: u64,
    pub flush_successes: u64,
    pub flush_failures: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_rate_is_zero_with_no_samples() {
        assert_eq!(MetricsSnapshot::default().cache_hit_rate(), 0.0);
    }

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = Metrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_flush(true);
        metrics.record_flush(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.flush_successes, 1);
        assert_eq!(snapshot.flush_failures, 1);
        assert!((snapshot.cache_hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
    }
}
