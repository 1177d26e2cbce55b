//! Cache usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one cache instance.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Fresh reads served without I/O.
    pub hits: AtomicU64,
    /// Reads that led this caller to run the fetcher.
    pub misses: AtomicU64,
    /// Callers that attached to an already in-flight fetch.
    pub coalesced: AtomicU64,
    /// Refresh results dropped because an optimistic write won the race.
    pub discarded_stale: AtomicU64,
    /// Fetches that settled with an error.
    pub fetch_errors: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded_stale(&self) {
        self.discarded_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current snapshot of all counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            discarded_stale: self.discarded_stale.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of `CacheStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub discarded_stale: u64,
    pub fetch_errors: u64,
}

impl CacheStatsSnapshot {
    /// Hit rate over reads that consulted the cache (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
