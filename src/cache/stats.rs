//! Cache Statistics Module
//!
//! Store metadata (sizes and bounds) plus per-process hit, miss and eviction
//! counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Counters ==
/// Lock-free per-process operation counters.
#[derive(Debug, Default)]
pub struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Hit ==
    /// Increments the hit counter.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Miss ==
    /// Increments the miss counter.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Evictions ==
    /// Adds to the eviction counter.
    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Current (hits, misses, evictions).
    pub fn load(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}

// == Store Stats ==
/// Snapshot returned by [`DiskCache::stats`](crate::cache::DiskCache::stats).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    /// Entries in the index, including expired ones not yet reclaimed
    pub entry_count: usize,
    /// Sum of payload sizes over `entry_count` entries
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub max_entry_count: usize,
    /// Successful retrievals by this process
    pub hits: u64,
    /// Failed retrievals by this process (absent, expired or corrupt)
    pub misses: u64,
    /// Live entries this process removed to satisfy the bounds
    pub evictions: u64,
}

impl StoreStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = StatsCounters::new();
        assert_eq!(counters.load(), (0, 0, 0));
    }

    #[test]
    fn test_record_counters() {
        let counters = StatsCounters::new();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        counters.record_evictions(3);
        assert_eq!(counters.load(), (2, 1, 3));
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = StoreStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = StoreStats {
            hits: 3,
            misses: 1,
            ..StoreStats::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
    }
}
