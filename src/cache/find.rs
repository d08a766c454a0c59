//! Find cache
//!
//! Bounded TTL cache over serialized finder output. Values are the raw
//! newline-delimited row bytes, never finder objects, so a hit can be
//! reconstituted into a cached finder without touching the store. Eviction
//! is LRU when the entry bound is reached; expired entries are dropped on
//! read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Cached entry with expiry tracking.
struct Entry {
    body: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct FindCacheStats {
    /// Total cache hits
    pub hits: AtomicU64,

    /// Total cache misses
    pub misses: AtomicU64,

    /// Total evictions
    pub evictions: AtomicU64,
}

/// Bounded TTL cache for find results.
pub struct FindCache {
    entries: RwLock<HashMap<String, Entry>>,
    max_entries: usize,
    stats: FindCacheStats,
}

impl FindCache {
    /// Cache holding at most `max_entries` bodies.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            stats: FindCacheStats::default(),
        }
    }

    /// Look up a body; expired entries count as misses and are removed.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(key) {
            if entry.is_expired() {
                entries.remove(key);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            entry.last_accessed = Instant::now();
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.body.clone());
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a body with the given TTL, evicting when full.
    pub fn set(&self, key: &str, body: Vec<u8>, ttl_sec: u32) {
        let mut entries = self.entries.write();

        if !entries.contains_key(key) {
            while entries.len() >= self.max_entries {
                self.evict_lru(&mut entries);
            }
        }

        let now = Instant::now();
        entries.insert(
            key.to_string(),
            Entry {
                body,
                created_at: now,
                ttl: Duration::from_secs(u64::from(ttl_sec)),
                last_accessed: now,
            },
        );
    }

    /// Number of live entries (expired ones included until touched).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cache statistics.
    pub fn stats(&self) -> &FindCacheStats {
        &self.stats
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    // O(n) scan; entry counts are small enough that a linked map
    // is not worth the dependency.
    fn evict_lru(&self, entries: &mut HashMap<String, Entry>) {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());
        if let Some(key) = lru_key {
            entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let cache = FindCache::new(10);
        assert!(cache.get("k").is_none());
        cache.set("k", b"body\n".to_vec(), 60);
        assert_eq!(cache.get("k").unwrap(), b"body\n");
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_expiry() {
        let cache = FindCache::new(10);
        cache.set("k", b"body".to_vec(), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_at_capacity() {
        let cache = FindCache::new(2);
        cache.set("a", b"1".to_vec(), 60);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b", b"2".to_vec(), 60);
        std::thread::sleep(Duration::from_millis(2));
        // touch "a" so "b" becomes the LRU victim
        cache.get("a");
        cache.set("c", b"3".to_vec(), 60);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = FindCache::new(1);
        cache.set("a", b"1".to_vec(), 60);
        cache.set("a", b"2".to_vec(), 60);
        assert_eq!(cache.get("a").unwrap(), b"2");
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 0);
    }
}
