//! Configuration for the gateway core
//!
//! TOML-backed configuration with environment variable overrides and
//! sensible defaults. Sections mirror the deployment surface: `[common]`
//! for the find cache, `[clickhouse]` for the store connection, tables and
//! planner bounds, `[tagged_costs]` for selectivity tuning.

use serde::{Deserialize, Serialize};

use crate::costs::CostsConfig;
use crate::error::{Error, Result};
use crate::sql::direction::{compile_rules, Direction, IndexReverses};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Request-level settings
    #[serde(default)]
    pub common: Common,

    /// Store connection, tables and planner bounds
    #[serde(default)]
    pub clickhouse: ClickHouse,

    /// Tagged-term selectivity costs; absent means terms are ordered by
    /// operator alone
    #[serde(default)]
    pub tagged_costs: Option<CostsConfig>,
}

/// Request-level settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Common {
    /// Find cache settings
    #[serde(default)]
    pub find_cache: FindCacheConfig,

    /// Upper bound on metrics returned per render target (0 = unlimited)
    #[serde(default = "default_max_metrics_per_target")]
    pub max_metrics_per_target: usize,
}

/// Find cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FindCacheConfig {
    /// Enable the find cache
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of cached entries
    #[serde(default = "default_find_cache_size")]
    pub size: usize,

    /// TTL for ordinary requests, seconds
    #[serde(default = "default_find_timeout")]
    pub default_timeout_sec: u32,

    /// TTL for short recent-window requests, seconds
    #[serde(default = "default_short_timeout")]
    pub short_timeout_sec: u32,

    /// A request no longer than this (and ending near now) counts as short
    #[serde(default = "default_short_duration")]
    pub short_duration_sec: u32,
}

/// Store connection, tables and planner bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickHouse {
    /// Store DSN
    #[serde(default = "default_url")]
    pub url: String,

    /// Combined index table; empty disables the index finder
    #[serde(default)]
    pub index_table: String,

    /// Use per-day index rows when the request carries a time range
    #[serde(default = "default_true")]
    pub index_use_daily: bool,

    /// Default routing for the index table
    #[serde(default)]
    pub index_reverse: Direction,

    /// Per-query routing rules, checked in order
    #[serde(default)]
    pub index_reverses: IndexReverses,

    /// Tree table for installations without a combined index
    #[serde(default = "default_tree_table")]
    pub tree_table: String,

    /// Reverse tree table; empty disables the reverse wrapper
    #[serde(default)]
    pub reverse_tree_table: String,

    /// Tagged series table; empty disables `seriesByTag`
    #[serde(default)]
    pub tagged_table: String,

    /// Connect timeout, seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,

    /// Data timeout, seconds
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,

    /// Entries per compiled-WHERE memoization cache (0 disables)
    #[serde(default)]
    pub query_cache_size: usize,

    /// TTL for memoized WHERE fragments, seconds
    #[serde(default = "default_expand_ttl")]
    pub expand_ttl_sec: u32,

    /// Cap on glob expansion width (emitted strings); negative disables
    /// expansion, zero fails every pattern open
    #[serde(default)]
    pub expand_max: i64,

    /// Cap on glob expansion depth in dot-segments (0 = unlimited)
    #[serde(default)]
    pub expand_depth: i64,

    /// Keep tag values URL-encoded in canonical metric names
    #[serde(default)]
    pub abs_keep_encoded: bool,
}

// Default value functions
fn default_max_metrics_per_target() -> usize {
    15_000
}
fn default_find_cache_size() -> usize {
    8192
}
fn default_find_timeout() -> u32 {
    300
}
fn default_short_timeout() -> u32 {
    60
}
fn default_short_duration() -> u32 {
    10_800
}
fn default_url() -> String {
    "http://localhost:8123".to_string()
}
fn default_tree_table() -> String {
    "graphite_tree".to_string()
}
fn default_connect_timeout() -> u64 {
    1
}
fn default_data_timeout() -> u64 {
    60
}
fn default_expand_ttl() -> u32 {
    7200
}
fn default_true() -> bool {
    true
}

impl Default for Common {
    fn default() -> Self {
        Self {
            find_cache: FindCacheConfig::default(),
            max_metrics_per_target: default_max_metrics_per_target(),
        }
    }
}

impl Default for FindCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: default_find_cache_size(),
            default_timeout_sec: default_find_timeout(),
            short_timeout_sec: default_short_timeout(),
            short_duration_sec: default_short_duration(),
        }
    }
}

impl Default for ClickHouse {
    fn default() -> Self {
        Self {
            url: default_url(),
            index_table: String::new(),
            index_use_daily: true,
            index_reverse: Direction::Auto,
            index_reverses: IndexReverses::new(),
            tree_table: default_tree_table(),
            reverse_tree_table: String::new(),
            tagged_table: String::new(),
            connect_timeout_sec: default_connect_timeout(),
            data_timeout_sec: default_data_timeout(),
            query_cache_size: 0,
            expand_ttl_sec: default_expand_ttl(),
            expand_max: 0,
            expand_depth: 0,
            abs_keep_encoded: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and finish it for use.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {path}: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text and finish it for use.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.finish()?;
        Ok(config)
    }

    /// Compile rule regexes, validate costs, apply env overrides.
    pub fn finish(&mut self) -> Result<()> {
        self.apply_env_overrides();
        compile_rules(&mut self.clickhouse.index_reverses)?;
        if let Some(tagged_costs) = &mut self.tagged_costs {
            tagged_costs.check()?;
        }
        self.validate()
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("GCH_URL") {
            self.clickhouse.url = url;
        }
        if let Ok(table) = std::env::var("GCH_INDEX_TABLE") {
            self.clickhouse.index_table = table;
        }
        if let Ok(table) = std::env::var("GCH_TAGGED_TABLE") {
            self.clickhouse.tagged_table = table;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.clickhouse.url.is_empty() {
            return Err(Error::Config("clickhouse url cannot be empty".to_string()));
        }
        if self.clickhouse.index_table.is_empty() && self.clickhouse.tree_table.is_empty() {
            return Err(Error::Config(
                "either index-table or tree-table must be set".to_string(),
            ));
        }
        if self.clickhouse.query_cache_size > 0 && self.clickhouse.expand_ttl_sec == 0 {
            return Err(Error::Config(
                "expand-ttl must be positive when the query cache is enabled".to_string(),
            ));
        }
        if self.common.find_cache.enabled {
            let fc = &self.common.find_cache;
            if fc.size == 0 || fc.default_timeout_sec == 0 || fc.short_timeout_sec == 0 {
                return Err(Error::Config(
                    "find-cache size and timeouts must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}
