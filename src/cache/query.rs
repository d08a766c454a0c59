//! Compiled-query memoization
//!
//! Glob expansion and predicate building are pure functions of the query,
//! so their output can be memoized. Each finder kind gets its own optional
//! cache; a missing cache disables memoization for that finder. The caches
//! live in a [`PlannerContext`] owned by the server and passed into the
//! finders, not in process-wide globals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::Config;

/// Bounded TTL map from raw query to compiled WHERE fragment.
pub struct QueryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    max_entries: usize,
    ttl: Duration,
}

impl QueryCache {
    /// Cache of `max_entries` fragments valid for `ttl_sec` seconds.
    pub fn new(max_entries: usize, ttl_sec: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl: Duration::from_secs(u64::from(ttl_sec)),
        }
    }

    /// Fetch a live fragment.
    pub fn get(&self, query: &str) -> Option<String> {
        let entries = self.entries.read();
        let (value, created_at) = entries.get(query)?;
        if created_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    /// Store a fragment, evicting the oldest entry when full.
    pub fn set(&self, query: &str, value: String) {
        let mut entries = self.entries.write();
        if !entries.contains_key(query) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (_, created))| *created)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        entries.insert(query.to_string(), (value, Instant::now()));
    }
}

/// Memoization caches shared across requests; `None` disables a cache.
#[derive(Clone, Default)]
pub struct PlannerContext {
    /// Cache for the tree-table finder
    pub base_query_cache: Option<Arc<QueryCache>>,

    /// Cache for the index-table finder
    pub index_query_cache: Option<Arc<QueryCache>>,

    /// Cache for the tagged finder
    pub tagged_query_cache: Option<Arc<QueryCache>>,
}

impl PlannerContext {
    /// Build the caches the configuration asks for.
    pub fn from_config(config: &Config) -> Self {
        let size = config.clickhouse.query_cache_size;
        if size == 0 {
            return Self::default();
        }
        let ttl = config.clickhouse.expand_ttl_sec;
        Self {
            base_query_cache: Some(Arc::new(QueryCache::new(size, ttl))),
            index_query_cache: Some(Arc::new(QueryCache::new(size, ttl))),
            tagged_query_cache: Some(Arc::new(QueryCache::new(size, ttl))),
        }
    }

    /// Run `build` through a cache when one is present.
    pub fn memoize(
        cache: &Option<Arc<QueryCache>>,
        query: &str,
        build: impl FnOnce() -> String,
    ) -> String {
        let Some(cache) = cache else {
            return build();
        };
        if let Some(value) = cache.get(query) {
            return value;
        }
        let value = build();
        cache.set(query, value.clone());
        value
    }
}
