//! Finders
//!
//! A finder turns one target into rows of metric paths: it compiles the
//! query to SQL, runs it through the transport, and exposes the resulting
//! rows. Selection is by target shape and configuration: `seriesByTag(...)`
//! goes to the tagged finder, installations with a combined index table use
//! the index finder, everything else the tree finder (optionally wrapped
//! for a separate reverse tree table). Cached variants are reconstituted
//! from find-cache bodies without touching the store.

pub mod base;
pub mod cached;
pub mod index;
pub mod reverse;
pub mod tagged;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::alias;
use crate::cache::find::FindCache;
use crate::cache::query::PlannerContext;
use crate::cache::{choose_timeout, find_key, render_key, timestamp_truncate};
use crate::config::Config;
use crate::costs::TaggedCosts;
use crate::error::{Error, Result};
use crate::transport::{ChClient, QueryContext};

/// Prefix marking a tagged target.
pub const SERIES_BY_TAG_PREFIX: &str = "seriesByTag(";

/// Read counters filled by a finder for observability.
#[derive(Debug, Default, Clone)]
pub struct FinderStat {
    /// Table the query ran against
    pub table: String,

    /// Size of the response body in bytes
    pub read_bytes: i64,

    /// Rows the store reports having read
    pub ch_read_rows: i64,

    /// Bytes the store reports having read
    pub ch_read_bytes: i64,
}

/// One find capability: run the query, then read the rows out.
#[async_trait]
pub trait Finder: Send + Sync {
    /// Compile and run the query for `[from, until]`, keeping the response
    /// body for the accessors below.
    async fn execute(
        &mut self,
        ctx: &QueryContext,
        config: &Config,
        query: &str,
        from: i64,
        until: i64,
        stat: &mut FinderStat,
    ) -> Result<()>;

    /// All rows, branch nodes included.
    fn list(&self) -> Vec<Vec<u8>>;

    /// Leaf rows only (no trailing-dot branch nodes).
    fn series(&self) -> Vec<Vec<u8>>;

    /// Canonical metric name for one row.
    fn abs(&self, v: &[u8]) -> Vec<u8>;

    /// Raw body for caching.
    fn bytes(&self) -> Result<Vec<u8>>;
}

/// Split a response body into rows, dropping empty lines and, for
/// `only_series`, branch rows ending in a dot.
pub(crate) fn split_rows(body: &[u8], only_series: bool) -> Vec<Vec<u8>> {
    body.split(|&b| b == b'\n')
        .filter(|row| !row.is_empty())
        .filter(|row| !only_series || row.last() != Some(&b'.'))
        .map(<[u8]>::to_vec)
        .collect()
}

/// Pick the finder for a target.
pub fn new_finder(
    config: &Config,
    context: &PlannerContext,
    costs: Option<Arc<TaggedCosts>>,
    client: Arc<dyn ChClient>,
    target: &str,
) -> Result<Box<dyn Finder>> {
    let ch = &config.clickhouse;

    if target.starts_with(SERIES_BY_TAG_PREFIX) {
        if ch.tagged_table.is_empty() {
            return Err(Error::Config(
                "tagged-table is not configured".to_string(),
            ));
        }
        return Ok(Box::new(tagged::TaggedFinder::new(
            client,
            &ch.tagged_table,
            config,
            costs,
            context.tagged_query_cache.clone(),
        )));
    }

    if !ch.index_table.is_empty() {
        return Ok(Box::new(index::IndexFinder::new(
            client,
            &ch.index_table,
            config,
            context.index_query_cache.clone(),
        )));
    }

    let base = base::BaseFinder::new(
        client.clone(),
        &ch.tree_table,
        config,
        context.base_query_cache.clone(),
    );
    if ch.reverse_tree_table.is_empty() {
        return Ok(Box::new(base));
    }
    Ok(Box::new(reverse::ReverseFinder::new(
        Box::new(base),
        client,
        &ch.reverse_tree_table,
        config,
        context.base_query_cache.clone(),
    )))
}

/// Result of a find: the finder holding rows, its read statistics, and
/// whether the body came from the find cache.
pub struct FindResult {
    /// Finder with the rows loaded
    pub finder: Box<dyn Finder>,

    /// Read statistics (zeroed on a cache hit)
    pub stat: FinderStat,

    /// True when served from the find cache (`X-Cached-Find`)
    pub cached: bool,
}

impl std::fmt::Debug for FindResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindResult")
            .field("stat", &self.stat)
            .field("cached", &self.cached)
            .finish()
    }
}

/// Run one target through the find cache and the appropriate finder.
///
/// A pure find request passes `from = until = 0` and gets the short cache
/// TTL; render-style requests carry their window and get the TTL the
/// window calls for. Identical requests inside one TTL bucket share a
/// cached body. Cache read errors count as misses.
pub async fn find(
    config: &Config,
    context: &PlannerContext,
    costs: Option<Arc<TaggedCosts>>,
    client: Arc<dyn ChClient>,
    cache: Option<&FindCache>,
    request_id: &str,
    target: &str,
    from: i64,
    until: i64,
) -> Result<FindResult> {
    let fc = &config.common.find_cache;
    let cache = if fc.enabled { cache } else { None };

    let mut cache_slot: Option<(String, u32)> = None;
    if let Some(cache) = cache {
        let now = Utc::now().timestamp();
        let ttl = if from == 0 && until == 0 {
            fc.short_timeout_sec
        } else {
            choose_timeout(from, until, now, fc)
        };
        let ts = timestamp_truncate(now, i64::from(ttl));
        let key = if from == 0 && until == 0 {
            find_key(target, ts)
        } else {
            render_key(from, until, ts, target)
        };

        if let Some(body) = cache.get(&key) {
            crate::metrics::FIND_CACHE_HITS.inc();
            return Ok(FindResult {
                finder: cached::new_cached(config, target, body),
                stat: FinderStat::default(),
                cached: true,
            });
        }
        crate::metrics::FIND_CACHE_MISSES.inc();
        cache_slot = Some((key, ttl));
    }

    let mut finder = new_finder(config, context, costs, client, target)?;
    let mut stat = FinderStat::default();
    let ctx = QueryContext::new(request_id, "");
    finder
        .execute(&ctx, config, target, from, until, &mut stat)
        .await?;

    if let (Some(cache), Some((key, ttl))) = (cache, cache_slot) {
        if let Ok(body) = finder.bytes() {
            cache.set(&key, body, ttl);
        }
    }

    Ok(FindResult {
        finder,
        stat,
        cached: false,
    })
}

/// Run several `(target, from, until)` jobs in parallel and merge their
/// rows into one alias map. Jobs run as separate tasks; results merge
/// under a mutex and the first observed error wins.
pub async fn find_all(
    config: Arc<Config>,
    context: PlannerContext,
    costs: Option<Arc<TaggedCosts>>,
    client: Arc<dyn ChClient>,
    cache: Option<Arc<FindCache>>,
    request_id: String,
    jobs: Vec<(String, i64, i64)>,
) -> Result<alias::Map> {
    let merged = Arc::new(Mutex::new(alias::Map::new()));
    let mut handles = Vec::with_capacity(jobs.len());

    for (target, from, until) in jobs {
        let config = config.clone();
        let context = context.clone();
        let costs = costs.clone();
        let client = client.clone();
        let cache = cache.clone();
        let request_id = request_id.clone();
        let merged = merged.clone();

        handles.push(tokio::spawn(async move {
            let result = find(
                &config,
                &context,
                costs,
                client,
                cache.as_deref(),
                &request_id,
                &target,
                from,
                until,
            )
            .await?;
            merged.lock().merge_target(result.finder.as_ref(), &target);
            Ok::<(), Error>(())
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(Error::internal(format!("find task: {e}"))),
        }
    }

    let map = std::mem::take(&mut *merged.lock());
    Ok(map)
}
