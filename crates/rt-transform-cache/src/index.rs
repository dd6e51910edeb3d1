// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory LRU index of cache entries (spec §4.11, §5 "a single mutex
//! serializes index mutations; downloads/uploads release the lock").

use chrono::{DateTime, Utc};
use lru::LruCache;

/// What the index remembers about one cache entry, without holding the
/// payload itself.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// Payload size in bytes.
    pub size: u64,
    /// Last time this entry was read or written.
    pub access_time: DateTime<Utc>,
}

/// LRU-ordered map from cache key to [`IndexEntry`], plus a running total
/// size so `Set` can decide whether eviction is needed without re-summing.
pub struct CacheIndex {
    entries: LruCache<String, IndexEntry>,
    current_size: u64,
}

impl CacheIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            current_size: 0,
        }
    }

    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Look up an entry, promoting it to most-recently-used.
    pub fn get(&mut self, key: &str) -> Option<IndexEntry> {
        self.entries.get(key).copied()
    }

    /// Refresh `access_time` for an existing entry without changing its size.
    pub fn touch(&mut self, key: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.access_time = now;
        }
    }

    /// Insert or replace an entry, adjusting `current_size` accordingly.
    pub fn insert(&mut self, key: String, size: u64, access_time: DateTime<Utc>) {
        if let Some(old) = self.entries.put(key, IndexEntry { size, access_time }) {
            self.current_size = self.current_size.saturating_sub(old.size);
        }
        self.current_size += size;
    }

    /// Remove an entry outright (used on eviction, invalidation, and TTL sweep).
    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let removed = self.entries.pop(key);
        if let Some(entry) = &removed {
            self.current_size = self.current_size.saturating_sub(entry.size);
        }
        removed
    }

    /// Pop least-recently-used entries until `current_size <= target`,
    /// returning the evicted keys in eviction order.
    pub fn evict_until(&mut self, target: u64) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.current_size > target {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.current_size = self.current_size.saturating_sub(entry.size);
            evicted.push(key);
        }
        evicted
    }

    /// Keys whose `access_time` predates `cutoff`, in no particular order.
    #[must_use]
    pub fn stale_keys(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.access_time < cutoff)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn insert_then_get_round_trips_and_tracks_size() {
        let mut index = CacheIndex::new();
        let now = Utc::now();
        index.insert("a".to_string(), 10, now);
        index.insert("b".to_string(), 20, now);
        assert_eq!(index.current_size(), 30);
        assert_eq!(index.get("a").unwrap().size, 10);
    }

    #[test]
    fn evict_until_pops_least_recently_used_first() {
        let mut index = CacheIndex::new();
        let now = Utc::now();
        index.insert("a".to_string(), 10, now);
        index.insert("b".to_string(), 10, now);
        index.insert("c".to_string(), 10, now);
        // Touch `a` so `b` becomes the least-recently-used entry.
        index.get("a");

        let evicted = index.evict_until(10);
        assert_eq!(evicted, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(index.current_size(), 10);
    }

    #[test]
    fn stale_keys_finds_entries_older_than_cutoff() {
        let mut index = CacheIndex::new();
        let now = Utc::now();
        index.insert("old".to_string(), 5, now - Duration::hours(2));
        index.insert("fresh".to_string(), 5, now);

        let stale = index.stale_keys(now - Duration::hours(1));
        assert_eq!(stale, vec!["old".to_string()]);
    }

    #[test]
    fn remove_adjusts_current_size() {
        let mut index = CacheIndex::new();
        let now = Utc::now();
        index.insert("a".to_string(), 10, now);
        index.remove("a");
        assert_eq!(index.current_size(), 0);
        assert!(index.get("a").is_none());
    }
}
