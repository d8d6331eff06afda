//! Cache Statistics Module
//!
//! Hit/miss/eviction counters and the snapshot reported by `stats()`.

use serde::Serialize;

// == Cache Stats ==
/// Running counters kept by a [`BoundedCache`](super::BoundedCache).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads that returned a live value
    pub hits: u64,
    /// Reads on an unknown or expired key
    pub misses: u64,
    /// Entries removed by the LRU policy
    pub evictions: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if nothing has been read yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}

// == Stats Snapshot ==
/// Point-in-time view of a cache.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    pub average_access_count: f64,
    /// Entries past their expiry that no read or sweep has removed yet
    pub expired_entries: usize,
    /// Approximate footprint in bytes (JSON-encoded keys and values)
    pub memory_usage: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_record_eviction() {
        let mut stats = CacheStats::new();
        stats.record_eviction();
        stats.record_eviction();
        assert_eq!(stats.evictions, 2);
    }
}
