//! Prometheus metrics for the gateway core
//!
//! Counters are process-global; a serving layer exposes them alongside its
//! own request metrics.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    /// Queries issued to the store, labeled by table and outcome
    pub static ref UPSTREAM_QUERIES: CounterVec = register_counter_vec!(
        "gch_upstream_queries_total",
        "Queries issued to the store",
        &["table", "status"]
    )
    .unwrap();

    /// Tagged-costs reload cycles, labeled by outcome
    pub static ref COSTS_RELOADS: CounterVec = register_counter_vec!(
        "gch_costs_reloads_total",
        "Tagged costs reload cycles",
        &["status"]
    )
    .unwrap();

    /// Find-cache hits
    pub static ref FIND_CACHE_HITS: IntCounter = register_int_counter!(
        "gch_find_cache_hits_total",
        "Find cache hits"
    )
    .unwrap();

    /// Find-cache misses
    pub static ref FIND_CACHE_MISSES: IntCounter = register_int_counter!(
        "gch_find_cache_misses_total",
        "Find cache misses"
    )
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_once() {
        FIND_CACHE_HITS.inc();
        FIND_CACHE_MISSES.inc();
        UPSTREAM_QUERIES.with_label_values(&["t", "ok"]).inc();
        COSTS_RELOADS.with_label_values(&["ok"]).inc();
        assert!(FIND_CACHE_HITS.get() >= 1);
    }
}
