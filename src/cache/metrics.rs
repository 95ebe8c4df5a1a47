//! Cache Metrics Collection
//!
//! In-process counters for monitoring cache health: hit rates per keyspace,
//! corruption self-heals, invalidation volume, and lock contention.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Read outcomes per keyspace
    entity_hits: AtomicU64,
    entity_misses: AtomicU64,
    collection_hits: AtomicU64,
    collection_misses: AtomicU64,
    query_hits: AtomicU64,
    query_misses: AtomicU64,

    // Self-healing and invalidation
    corruption_heals: AtomicU64,
    invalidated_keys: AtomicU64,

    // Lock protocol
    locks_acquired: AtomicU64,
    lock_contention: AtomicU64,

    // Fail-open degradations (store errors swallowed)
    store_failures: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_entity_hit(&self) {
        self.entity_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entity_miss(&self) {
        self.entity_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collection_hit(&self) {
        self.collection_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collection_miss(&self) {
        self.collection_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_hit(&self) {
        self.query_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_miss(&self) {
        self.query_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A corrupt entry was detected and deleted.
    pub fn record_corruption_heal(&self) {
        self.corruption_heals.fetch_add(1, Ordering::Relaxed);
    }

    /// Keys removed by an invalidation pass.
    pub fn record_invalidated(&self, count: u64) {
        self.invalidated_keys.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_lock_acquired(&self) {
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// A fail-fast lock acquisition lost to another holder.
    pub fn record_lock_contention(&self) {
        self.lock_contention.fetch_add(1, Ordering::Relaxed);
    }

    /// A store error was swallowed on the request path.
    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entity_hits(&self) -> u64 {
        self.entity_hits.load(Ordering::Relaxed)
    }

    pub fn entity_misses(&self) -> u64 {
        self.entity_misses.load(Ordering::Relaxed)
    }

    pub fn collection_hits(&self) -> u64 {
        self.collection_hits.load(Ordering::Relaxed)
    }

    pub fn collection_misses(&self) -> u64 {
        self.collection_misses.load(Ordering::Relaxed)
    }

    pub fn query_hits(&self) -> u64 {
        self.query_hits.load(Ordering::Relaxed)
    }

    pub fn query_misses(&self) -> u64 {
        self.query_misses.load(Ordering::Relaxed)
    }

    pub fn corruption_heals(&self) -> u64 {
        self.corruption_heals.load(Ordering::Relaxed)
    }

    pub fn invalidated_keys(&self) -> u64 {
        self.invalidated_keys.load(Ordering::Relaxed)
    }

    pub fn lock_contention(&self) -> u64 {
        self.lock_contention.load(Ordering::Relaxed)
    }

    /// Hit ratio across all keyspaces.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.entity_hits.load(Ordering::Relaxed)
            + self.collection_hits.load(Ordering::Relaxed)
            + self.query_hits.load(Ordering::Relaxed);
        let misses = self.entity_misses.load(Ordering::Relaxed)
            + self.collection_misses.load(Ordering::Relaxed)
            + self.query_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entity_hits: self.entity_hits.load(Ordering::Relaxed),
            entity_misses: self.entity_misses.load(Ordering::Relaxed),
            collection_hits: self.collection_hits.load(Ordering::Relaxed),
            collection_misses: self.collection_misses.load(Ordering::Relaxed),
            query_hits: self.query_hits.load(Ordering::Relaxed),
            query_misses: self.query_misses.load(Ordering::Relaxed),
            corruption_heals: self.corruption_heals.load(Ordering::Relaxed),
            invalidated_keys: self.invalidated_keys.load(Ordering::Relaxed),
            locks_acquired: self.locks_acquired.load(Ordering::Relaxed),
            lock_contention: self.lock_contention.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.entity_hits.store(0, Ordering::Relaxed);
        self.entity_misses.store(0, Ordering::Relaxed);
        self.collection_hits.store(0, Ordering::Relaxed);
        self.collection_misses.store(0, Ordering::Relaxed);
        self.query_hits.store(0, Ordering::Relaxed);
        self.query_misses.store(0, Ordering::Relaxed);
        self.corruption_heals.store(0, Ordering::Relaxed);
        self.invalidated_keys.store(0, Ordering::Relaxed);
        self.locks_acquired.store(0, Ordering::Relaxed);
        self.lock_contention.store(0, Ordering::Relaxed);
        self.store_failures.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub entity_hits: u64,
    pub entity_misses: u64,
    pub collection_hits: u64,
    pub collection_misses: u64,
    pub query_hits: u64,
    pub query_misses: u64,
    pub corruption_heals: u64,
    pub invalidated_keys: u64,
    pub locks_acquired: u64,
    pub lock_contention: u64,
    pub store_failures: u64,
    pub hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.entity_hits(), 0);
        assert_eq!(metrics.corruption_heals(), 0);
        assert_eq!(metrics.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio() {
        let metrics = CacheMetrics::new();

        metrics.record_entity_hit();
        metrics.record_entity_hit();
        metrics.record_query_hit();
        metrics.record_entity_miss();

        assert!((metrics.hit_ratio() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();

        metrics.record_collection_hit();
        metrics.record_corruption_heal();
        metrics.record_invalidated(3);
        metrics.record_lock_acquired();
        metrics.record_lock_contention();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.collection_hits, 1);
        assert_eq!(snapshot.corruption_heals, 1);
        assert_eq!(snapshot.invalidated_keys, 3);
        assert_eq!(snapshot.locks_acquired, 1);
        assert_eq!(snapshot.lock_contention, 1);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();

        metrics.record_entity_hit();
        metrics.record_invalidated(10);
        metrics.reset();

        assert_eq!(metrics.entity_hits(), 0);
        assert_eq!(metrics.invalidated_keys(), 0);
    }
}
