//! Caching for planner output
//!
//! Two caches front the planner. The find cache ([`find::FindCache`])
//! stores serialized row lists under time-bucketed keys so concurrent
//! identical requests inside one TTL window share a single fetch. The
//! query cache ([`query::QueryCache`]) memoizes compiled WHERE fragments
//! keyed by the raw query.

pub mod find;
pub mod query;

use crate::config::FindCacheConfig;

/// Requests whose window ends within this many seconds of now still count
/// as "recent" for short-TTL selection.
const RECENT_WINDOW_SEC: i64 = 61;

/// Truncate a timestamp to its TTL bucket: `floor(ts / ttl) * ttl`.
///
/// All requests inside one bucket produce the same key; crossing a bucket
/// boundary recomputes naturally.
pub fn timestamp_truncate(ts: i64, ttl_sec: i64) -> i64 {
    if ttl_sec <= 0 {
        return ts;
    }
    ts - ts % ttl_sec
}

/// Pick the TTL for a request window: short requests ending near now get
/// the short timeout, everything else the default.
pub fn choose_timeout(from: i64, until: i64, now: i64, config: &FindCacheConfig) -> u32 {
    let duration = until - from;
    if duration <= i64::from(config.short_duration_sec) && now - until <= RECENT_WINDOW_SEC {
        config.short_timeout_sec
    } else {
        config.default_timeout_sec
    }
}

/// Cache key for a `/metrics/find` query.
pub fn find_key(query: &str, bucket_ts: i64) -> String {
    format!("1970-02-12;query={query};ts={bucket_ts}")
}

/// Cache key for one render target and window.
pub fn render_key(from: i64, until: i64, bucket_ts: i64, target: &str) -> String {
    format!("{from}_{until};ts={bucket_ts};{target}")
}
