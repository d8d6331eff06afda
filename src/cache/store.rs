//! Bounded Cache Module
//!
//! Main cache engine combining HashMap storage with LRU tracking and TTL
//! expiration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, CacheStats, LruTracker, StatsSnapshot, MAX_KEY_LENGTH};
use crate::error::{CacheError, Result};

// == Bounded Cache ==
/// Key/value store holding at most `max_size` entries, each with its own
/// expiry.
///
/// Expired entries are never returned: reads delete them on sight and
/// [`cleanup`](Self::cleanup) sweeps the rest. The structure is not
/// synchronized; share it through [`SharedCache`](super::SharedCache).
#[derive(Debug)]
pub struct BoundedCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    lru: LruTracker,
    stats: CacheStats,
    max_size: usize,
    default_ttl: Duration,
    max_key_length: usize,
}

impl<V> BoundedCache<V> {
    // == Constructor ==
    /// Creates a new cache with the given capacity and default TTL.
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_size,
            default_ttl,
            max_key_length: MAX_KEY_LENGTH,
        }
    }

    /// Replaces the default [`MAX_KEY_LENGTH`] limit.
    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    // == Set ==
    /// Stores a value, overwriting any previous one and resetting its TTL.
    ///
    /// When a new key arrives at capacity, the least recently used entry is
    /// evicted first so the size never exceeds `max_size`.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - Time to live (uses the default TTL if None)
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Result<()> {
        let key = key.into();

        if key.len() > self.max_key_length {
            return Err(CacheError::InvalidKey(format!(
                "Key exceeds maximum length of {} bytes",
                self.max_key_length
            )));
        }

        let is_overwrite = self.entries.contains_key(&key);

        if !is_overwrite && self.entries.len() >= self.max_size {
            match self.lru.evict_oldest() {
                Some(evicted_key) => {
                    self.entries.remove(&evicted_key);
                    self.stats.record_eviction();
                }
                None => {
                    return Err(CacheError::CacheFull(format!(
                        "Cannot store '{}' in a cache of capacity {}",
                        key, self.max_size
                    )));
                }
            }
        }

        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        self.entries.insert(key.clone(), entry);
        self.lru.touch(&key);

        Ok(())
    }

    // == Has ==
    /// Returns true if the key holds a live value.
    ///
    /// Does not count as an access, but still drops the entry if it expired.
    pub fn has(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                self.remove_entry(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    // == Delete ==
    /// Removes an entry. Returns whether something was removed; deleting an
    /// absent key is a no-op.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    // == Clear ==
    /// Removes every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
    }

    // == Cleanup ==
    /// Removes all expired entries, returning how many were dropped.
    pub fn cleanup(&mut self) -> usize {
        let now = current_timestamp_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
        }

        expired_keys.len()
    }

    /// Keys containing `pattern`, live or not.
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|key| key.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        self.lru.remove(key);
        removed
    }
}

impl<V: Clone> BoundedCache<V> {
    // == Get ==
    /// Retrieves a live value and marks it most recently used.
    ///
    /// An expired entry is removed and reported as `Expired`; both that and
    /// an unknown key count as misses.
    pub fn get(&mut self, key: &str) -> Result<V> {
        let expired = match self.entries.get_mut(key) {
            None => {
                self.stats.record_miss();
                return Err(CacheError::NotFound(key.to_string()));
            }
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                entry.record_access();
                false
            }
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_miss();
            return Err(CacheError::Expired(key.to_string()));
        }

        self.stats.record_hit();
        self.lru.touch(key);
        // The entry was found above and nothing removed it since.
        self.entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }
}

impl<V: Serialize> BoundedCache<V> {
    // == Stats ==
    /// Returns a snapshot of size, counters and estimated footprint.
    pub fn stats(&self) -> StatsSnapshot {
        let now = current_timestamp_ms();
        let size = self.entries.len();
        let total_accesses: u64 = self.entries.values().map(|e| e.access_count).sum();
        let expired_entries = self
            .entries
            .values()
            .filter(|e| e.is_expired_at(now))
            .count();

        StatsSnapshot {
            size,
            max_size: self.max_size,
            hit_rate: self.stats.hit_rate(),
            average_access_count: if size == 0 {
                0.0
            } else {
                total_accesses as f64 / size as f64
            },
            expired_entries,
            memory_usage: self.estimate_memory_usage(),
            hits: self.stats.hits,
            misses: self.stats.misses,
            evictions: self.stats.evictions,
        }
    }

    /// Sums the JSON-encoded length of every key and value.
    fn estimate_memory_usage(&self) -> usize {
        self.entries
            .iter()
            .map(|(key, entry)| {
                let key_size = serde_json::to_vec(key).map(|b| b.len()).unwrap_or(0);
                let value_size = serde_json::to_vec(&entry.value)
                    .map(|b| b.len())
                    .unwrap_or(0);
                key_size + value_size
            })
            .sum()
    }
}
