//! End-to-end SQL and cache behavior through the public finder API,
//! against a recording stub transport.

use std::sync::Arc;

use graphite_gateway::cache::find::FindCache;
use graphite_gateway::cache::query::PlannerContext;
use graphite_gateway::config::Config;
use graphite_gateway::error::Error;
use graphite_gateway::finder;
use graphite_gateway::transport::stub::StubClient;
use graphite_gateway::transport::ChClient;

fn index_config() -> Config {
    let mut config = Config::default();
    config.clickhouse.index_table = "graphite_index".to_string();
    config.clickhouse.tagged_table = "graphite_tagged".to_string();
    config.clickhouse.index_use_daily = false;
    config
}

async fn run_find(
    config: &Config,
    stub: Arc<StubClient>,
    cache: Option<&FindCache>,
    target: &str,
    from: i64,
    until: i64,
) -> finder::FindResult {
    let client: Arc<dyn ChClient> = stub;
    finder::find(
        config,
        &PlannerContext::default(),
        None,
        client,
        cache,
        "req-1",
        target,
        from,
        until,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_direct_index_sql() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = index_config();
    let stub = Arc::new(StubClient::new());
    run_find(&config, stub.clone(), None, "test.metric*", 1668106860, 1668106870).await;

    assert_eq!(
        stub.last_query().unwrap(),
        "SELECT Path FROM graphite_index WHERE \
         ((Level=20002) AND (Path LIKE 'test.metric%')) AND (Date='1970-02-12') \
         GROUP BY Path FORMAT TabSeparatedRaw"
    );
}

#[tokio::test]
async fn test_reverse_index_sql() {
    let config = index_config();
    let stub = Arc::new(StubClient::new());
    run_find(&config, stub.clone(), None, "*test.metric", 1668106860, 1668106870).await;

    assert_eq!(
        stub.last_query().unwrap(),
        "SELECT Path FROM graphite_index WHERE \
         ((Level=30002) AND (Path LIKE 'metric.%' AND \
         match(Path, '^metric[.]([^.]*?)test[.]?$'))) AND (Date='1970-02-12') \
         GROUP BY Path FORMAT TabSeparatedRaw"
    );
}

#[tokio::test]
async fn test_daily_index_sql() {
    let mut config = index_config();
    config.clickhouse.index_use_daily = true;
    let stub = Arc::new(StubClient::new());
    run_find(&config, stub.clone(), None, "test.metric*", 1668124800, 1668124810).await;

    assert_eq!(
        stub.last_query().unwrap(),
        "SELECT Path FROM graphite_index WHERE \
         ((Level=2) AND (Path LIKE 'test.metric%')) AND \
         (Date >='2022-11-11' AND Date <= '2022-11-11') \
         GROUP BY Path FORMAT TabSeparatedRaw"
    );
}

#[tokio::test]
async fn test_tagged_alternation_sql() {
    let config = index_config();
    let stub = Arc::new(StubClient::new());
    run_find(
        &config,
        stub.clone(),
        None,
        "seriesByTag('name={avg,max}')",
        1668124800,
        1668124810,
    )
    .await;

    let sql = stub.last_query().unwrap();
    assert!(sql.starts_with("SELECT Path FROM graphite_tagged WHERE "));
    assert!(sql.contains("Tag1 IN ('__name__=avg','__name__=max')"));
    assert!(sql.ends_with("GROUP BY Path FORMAT TabSeparatedRaw"));
}

#[tokio::test]
async fn test_malformed_tagged_query_is_bad_request() {
    let config = index_config();
    let client: Arc<dyn ChClient> = Arc::new(StubClient::new());
    let err = finder::find(
        &config,
        &PlannerContext::default(),
        None,
        client,
        None,
        "req-1",
        "seriesByTag('name=m{in,ax')",
        0,
        0,
    )
    .await
    .unwrap_err();
    assert_eq!(err.http_status(), 400);
}

#[tokio::test]
async fn test_find_cache_hit_determinism() {
    let mut config = index_config();
    config.common.find_cache.enabled = true;
    // a wide bucket keeps both calls on one key even at a minute boundary
    config.common.find_cache.short_timeout_sec = 3600;
    let cache = FindCache::new(config.common.find_cache.size);
    let stub = Arc::new(StubClient::with_body(&b"test.metric1\ntest.metric2\n"[..]));

    let first = run_find(&config, stub.clone(), Some(&cache), "test.metric*", 0, 0).await;
    assert!(!first.cached);

    let second = run_find(&config, stub.clone(), Some(&cache), "test.metric*", 0, 0).await;
    assert!(second.cached);
    assert_eq!(first.finder.list(), second.finder.list());
    assert_eq!(
        first.finder.bytes().unwrap(),
        second.finder.bytes().unwrap()
    );

    // the store was asked exactly once
    assert_eq!(stub.queries().len(), 1);
}

#[tokio::test]
async fn test_find_cache_replays_unreversed_rows() {
    let mut config = index_config();
    config.common.find_cache.enabled = true;
    config.common.find_cache.short_timeout_sec = 3600;
    let cache = FindCache::new(16);
    let stub = Arc::new(StubClient::with_body(&b"metric.a.test\n"[..]));

    let live = run_find(&config, stub.clone(), Some(&cache), "*test.metric", 0, 0).await;
    let hit = run_find(&config, stub.clone(), Some(&cache), "*test.metric", 0, 0).await;

    assert!(hit.cached);
    assert_eq!(live.finder.series(), vec![b"test.a.metric".to_vec()]);
    assert_eq!(hit.finder.series(), vec![b"test.a.metric".to_vec()]);
}

#[tokio::test]
async fn test_find_all_merges_targets() {
    let config = Arc::new(index_config());
    let stub = Arc::new(StubClient::new());
    stub.push_body(&b"a.x\na.y\n"[..]);
    stub.push_body(&b"name?k=v\n"[..]);
    let client: Arc<dyn ChClient> = stub;

    let map = finder::find_all(
        config,
        PlannerContext::default(),
        None,
        client,
        None,
        "req-1".to_string(),
        vec![
            ("a.*".to_string(), 0, 0),
            ("seriesByTag('k=v')".to_string(), 0, 0),
        ],
    )
    .await
    .unwrap();

    assert_eq!(map.len(), 3);
    let mut rows = map.series();
    rows.sort();
    assert!(rows.contains(&"a.x".to_string()));
    assert!(rows.contains(&"name?k=v".to_string()));
}

#[tokio::test]
async fn test_find_all_first_error_wins() {
    let config = Arc::new(index_config());
    let stub = Arc::new(StubClient::new());
    stub.push_error(Error::UpstreamTimeout("data timeout".to_string()));
    let client: Arc<dyn ChClient> = stub;

    let err = finder::find_all(
        config,
        PlannerContext::default(),
        None,
        client,
        None,
        "req-1".to_string(),
        vec![("a.*".to_string(), 0, 0)],
    )
    .await
    .unwrap_err();
    assert_eq!(err.http_status(), 504);
}
