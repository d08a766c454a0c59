//! Tagged-term selectivity costs
//!
//! Holds per-tag and per-value selectivity weights (lower is more
//! selective) used to reorder `seriesByTag` terms so the cheapest term
//! becomes the primary `Tag1` filter. The live map starts from user
//! configuration and is periodically rebuilt from tag counts in the store;
//! readers take a shared lock, the reloader swaps under a write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::transport::{ChClient, Options, QueryContext};

/// Upper bound the computed totals are normalized into.
const NORMALIZED_MAX: f64 = 1_000_000.0;

/// Sleep before retrying after a failed reload.
const RETRY_INTERVAL: Duration = Duration::from_secs(300);

/// Cost tuning for one tag key.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Costs {
    /// Cost for wildcarded equality or regex terms (when the value is not
    /// listed in `values`)
    #[serde(default)]
    pub total: i32,

    /// Cost for exact equality without wildcards (when the value is not
    /// listed in `values`)
    #[serde(default)]
    pub default: i32,

    /// Per-value costs, usually not needed
    #[serde(default)]
    pub values: HashMap<String, i32>,
}

/// `[tagged_costs]` configuration section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CostsConfig {
    /// Save loaded costs to this file after each successful reload
    #[serde(default)]
    pub store_file: String,

    /// Reload interval in seconds; 0 disables the background reloader
    #[serde(default)]
    pub auto_load_sec: u64,

    /// Per-tag tuning
    #[serde(default)]
    pub costs: HashMap<String, Costs>,

    /// Fallback cost for exact equality without wildcards
    #[serde(default = "default_default_cost")]
    pub default: i32,

    /// Fallback cost for wildcarded or regex terms
    #[serde(default = "default_total_cost", alias = "wildcard")]
    pub total: i32,
}

fn default_default_cost() -> i32 {
    1
}
fn default_total_cost() -> i32 {
    1000
}

impl Default for CostsConfig {
    fn default() -> Self {
        Self {
            store_file: String::new(),
            auto_load_sec: 0,
            costs: HashMap::new(),
            default: default_default_cost(),
            total: default_total_cost(),
        }
    }
}

impl CostsConfig {
    /// Validate bounds, fill per-key fallbacks, fold the `name` alias into
    /// `__name__`.
    pub fn check(&mut self) -> Result<()> {
        if self.default < 1 || self.default > 1000 {
            return Err(Error::Config(
                "default tagged cost must be > 0 and <= 1000".to_string(),
            ));
        }
        if self.default >= self.total {
            return Err(Error::Config(
                "total tagged cost must be greater than default".to_string(),
            ));
        }

        for (key, costs) in self.costs.iter_mut() {
            if costs.default == 0 {
                costs.default = self.default;
            } else if costs.default > 1000 {
                return Err(Error::Config(format!(
                    "default tagged cost[{key}] must be > 0 and <= 1000 or -1"
                )));
            }
            if costs.total == 0 {
                costs.total = self.total;
            } else if costs.total > 1000 {
                return Err(Error::Config(format!(
                    "wildcard tagged cost[{key}] must be > 0 and <= 1000 or -1"
                )));
            }
        }

        if let Some(costs) = self.costs.remove("name") {
            if self.costs.contains_key("__name__") {
                return Err(Error::Config(
                    "duplicate tagged name and __name__ in tagged costs".to_string(),
                ));
            }
            self.costs.insert("__name__".to_string(), costs);
        }

        Ok(())
    }
}

/// Live costs engine shared between the tagged finder and the reloader.
pub struct TaggedCosts {
    config: CostsConfig,
    live: RwLock<HashMap<String, Costs>>,
    updated: AtomicBool,
}

impl TaggedCosts {
    /// Build from a checked [`CostsConfig`].
    pub fn new(config: CostsConfig) -> Self {
        let live = config.costs.clone();
        Self {
            config,
            live: RwLock::new(live),
            updated: AtomicBool::new(false),
        }
    }

    /// Cost for one term. `eq_literal` is true for exact equality without
    /// wildcards; everything else (wildcards, regexes, negations) is
    /// charged the wildcard rate.
    pub fn term_cost(&self, key: &str, value: &str, eq_literal: bool) -> i32 {
        let live = self.live.read();
        if let Some(c) = live.get(key) {
            if let Some(v) = c.values.get(value) {
                return *v;
            }
            return if eq_literal { c.default } else { c.total };
        }
        if eq_literal {
            self.config.default
        } else {
            self.config.total
        }
    }

    /// Reload from the store: count series per `Tag1` over the last day.
    pub async fn update(&self, client: &dyn ChClient, table: &str) -> Result<()> {
        self.updated.store(false, Ordering::Relaxed);

        let (db, table) = match table.split_once('.') {
            Some((db, table)) => (db, table),
            None => ("default", table),
        };

        let until = Utc::now();
        let from = until - chrono::Duration::days(1);
        let query = format!(
            "SELECT Tag1, count(Tag1) AS Count FROM {}.{} WHERE Date>='{}' AND Date<='{}'  GROUP BY Tag1 FORMAT TabSeparatedRaw",
            db,
            table,
            from.format("%Y-%m-%d"),
            until.format("%Y-%m-%d"),
        );

        let ctx = QueryContext::background("tagged_costs", "graphite_tags");
        let opts = Options {
            connect_timeout: Duration::from_secs(10),
            data_timeout: Duration::from_secs(10),
        };
        let response = client.query(&ctx, &query, &opts).await?;

        self.update_from(&response.body)
    }

    /// Rebuild the live map from `key=value\tcount` rows.
    pub fn update_from(&self, body: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::parse(format!("bad costs body: {e}")))?;

        let mut costs: HashMap<String, Costs> = HashMap::new();

        for (i, row) in text.split('\n').enumerate() {
            if row.is_empty() {
                continue;
            }
            let Some((tag, count)) = row.split_once('\t') else {
                return Err(Error::parse(format!("bad line {i}: {row}")));
            };
            let Some((name, value)) = tag.split_once('=').filter(|(n, _)| !n.is_empty()) else {
                return Err(Error::parse(format!("bad line {i} (name/value): {row}")));
            };
            let n: i64 = count
                .parse()
                .map_err(|_| Error::parse(format!("bad line {i} (count): {row}")))?;

            let c = costs.entry(name.to_string()).or_default();
            c.values.insert(value.to_string(), n as i32);
            c.total += n as i32;
        }

        normalize(&mut costs);
        self.merge_configured(&mut costs);

        let store_result = if self.config.store_file.is_empty() {
            Ok(())
        } else {
            save_costs(&costs, &self.config.store_file)
        };

        *self.live.write() = costs;
        self.updated.store(true, Ordering::Relaxed);

        store_result
    }

    /// Run periodic reloads until shutdown. Sleeps the configured interval
    /// after a successful cycle and [`RETRY_INTERVAL`] after a failure.
    pub async fn updater(
        self: Arc<Self>,
        client: Arc<dyn ChClient>,
        table: String,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let interval = Duration::from_secs(self.config.auto_load_sec);
        loop {
            let sleep_for = if self.updated.load(Ordering::Relaxed) {
                interval
            } else {
                RETRY_INTERVAL
            };

            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }

            let start = std::time::Instant::now();
            match self.update(client.as_ref(), &table).await {
                Ok(()) => {
                    crate::metrics::COSTS_RELOADS.with_label_values(&["ok"]).inc();
                    info!(elapsed = ?start.elapsed(), "tagged costs loaded");
                }
                Err(e) => {
                    crate::metrics::COSTS_RELOADS.with_label_values(&["error"]).inc();
                    error!(error = %e, elapsed = ?start.elapsed(), "unable to load tagged costs");
                }
            }
        }
    }
}

/// Scale totals into `[1, NORMALIZED_MAX]` and set each key's default to
/// the median of its normalized per-value counts.
fn normalize(costs: &mut HashMap<String, Costs>) {
    let max = costs.values().map(|c| c.total).max().unwrap_or(0);
    if max == 0 {
        return;
    }
    let div = f64::from(max) / NORMALIZED_MAX;

    for c in costs.values_mut() {
        c.total = ((f64::from(c.total) / div) as i32).max(1);

        let mut values: Vec<i32> = Vec::with_capacity(c.values.len());
        for v in c.values.values_mut() {
            *v = ((f64::from(*v) / div) as i32).max(1);
            values.push(*v);
        }
        values.sort_unstable();
        c.default = values[(values.len() - 1) / 2];
    }
}

impl TaggedCosts {
    /// Carry user-configured per-key overrides over the computed map.
    fn merge_configured(&self, costs: &mut HashMap<String, Costs>) {
        for (key, configured) in &self.config.costs {
            let c = costs.entry(key.clone()).or_default();
            if configured.default != 0 {
                c.default = configured.default;
            }
            if configured.total != 0 {
                c.total = configured.total;
            }
        }
    }
}

fn save_costs(costs: &HashMap<String, Costs>, file_name: &str) -> Result<()> {
    let body = serde_json::to_vec(costs)
        .map_err(|e| Error::Internal(format!("costs serialization: {e}")))?;
    if let Err(e) = std::fs::write(file_name, body) {
        warn!(file = file_name, error = %e, "unable to store tagged costs");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(mut config: CostsConfig) -> CostsConfig {
        config.check().unwrap();
        config
    }

    fn test_config() -> CostsConfig {
        checked(CostsConfig {
            default: 2,
            total: 500,
            costs: HashMap::from([
                (
                    "name".to_string(),
                    Costs {
                        default: 1,
                        total: 100,
                        ..Default::default()
                    },
                ),
                (
                    "environment".to_string(),
                    Costs {
                        default: 100,
                        total: 100,
                        ..Default::default()
                    },
                ),
                (
                    "dc".to_string(),
                    Costs {
                        default: 60,
                        total: 100,
                        ..Default::default()
                    },
                ),
                (
                    "key".to_string(),
                    Costs {
                        values: HashMap::from([
                            ("value2".to_string(), 70),
                            ("value3".to_string(), -1),
                            ("val*4".to_string(), -1),
                            ("^val.*4$".to_string(), -1),
                        ]),
                        ..Default::default()
                    },
                ),
            ]),
            ..Default::default()
        })
    }

    #[test]
    fn test_check_bounds() {
        let mut bad = CostsConfig {
            default: 0,
            ..Default::default()
        };
        assert!(bad.check().is_err());

        let mut bad = CostsConfig {
            default: 10,
            total: 10,
            ..Default::default()
        };
        assert!(bad.check().is_err());

        let mut bad = CostsConfig {
            costs: HashMap::from([(
                "k".to_string(),
                Costs {
                    default: 1001,
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };
        assert!(bad.check().is_err());
    }

    #[test]
    fn test_check_aliases_name() {
        let config = test_config();
        assert!(config.costs.contains_key("__name__"));
        assert!(!config.costs.contains_key("name"));

        let mut dup = CostsConfig {
            costs: HashMap::from([
                ("name".to_string(), Costs::default()),
                ("__name__".to_string(), Costs::default()),
            ]),
            ..Default::default()
        };
        assert!(dup.check().is_err());
    }

    #[test]
    fn test_check_fills_fallbacks() {
        let config = test_config();
        // key had neither default nor total configured
        assert_eq!(config.costs["key"].default, 2);
        assert_eq!(config.costs["key"].total, 500);
    }

    #[test]
    fn test_term_cost_lookup() {
        let costs = TaggedCosts::new(test_config());

        assert_eq!(costs.term_cost("key", "value", true), 2);
        assert_eq!(costs.term_cost("key", "value2", true), 70);
        assert_eq!(costs.term_cost("key", "value3", true), -1);
        assert_eq!(costs.term_cost("key", "val*4", false), -1);
        assert_eq!(costs.term_cost("key", "^val.*4$", false), -1);
        assert_eq!(costs.term_cost("__name__", "cpu.load_avg", true), 1);
        assert_eq!(costs.term_cost("dc", "west", true), 60);
        assert_eq!(costs.term_cost("dc", "west*", false), 100);
        assert_eq!(costs.term_cost("environment", "production", true), 100);
        // unknown key falls back to the scalar costs
        assert_eq!(costs.term_cost("other", "v", true), 2);
        assert_eq!(costs.term_cost("other", "v*", false), 500);
    }

    #[test]
    fn test_update_from_normalizes() {
        let costs = TaggedCosts::new(checked(CostsConfig::default()));
        costs
            .update_from(b"a=x\t100\na=y\t300\nb=z\t400\n")
            .unwrap();

        assert_eq!(costs.term_cost("a", "x", true), 250_000);
        assert_eq!(costs.term_cost("a", "y", true), 750_000);
        assert_eq!(costs.term_cost("b", "z", true), 1_000_000);
        // per-key default is the median of normalized values
        assert_eq!(costs.term_cost("a", "unseen", true), 250_000);
        // wildcard rate is the normalized per-key total
        assert_eq!(costs.term_cost("a", "unseen*", false), 1_000_000);
    }

    #[test]
    fn test_update_from_merges_configured() {
        let costs = TaggedCosts::new(checked(CostsConfig {
            costs: HashMap::from([(
                "a".to_string(),
                Costs {
                    default: 7,
                    ..Default::default()
                },
            )]),
            ..Default::default()
        }));
        costs.update_from(b"a=x\t10\n").unwrap();
        // user default overrides the computed median
        assert_eq!(costs.term_cost("a", "unseen", true), 7);
        // computed per-value costs stay
        assert_eq!(costs.term_cost("a", "x", true), 1_000_000);
    }

    #[test]
    fn test_update_from_bad_lines() {
        let costs = TaggedCosts::new(checked(CostsConfig::default()));
        assert!(costs.update_from(b"no-tab-here\n").is_err());
        assert!(costs.update_from(b"novalue\t12\n").is_err());
        assert!(costs.update_from(b"a=x\tnot-a-number\n").is_err());
        // prior map stays live after a failed reload
        costs.update_from(b"a=x\t10\n").unwrap();
        assert!(costs.update_from(b"broken\n").is_err());
        assert_eq!(costs.term_cost("a", "x", true), 1_000_000);
    }

    #[test]
    fn test_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let store_file = dir.path().join("costs.json");
        let costs = TaggedCosts::new(checked(CostsConfig {
            store_file: store_file.to_string_lossy().into_owned(),
            ..Default::default()
        }));
        costs.update_from(b"a=x\t10\n").unwrap();
        let stored = std::fs::read_to_string(&store_file).unwrap();
        let parsed: HashMap<String, Costs> = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed["a"].values["x"], 1_000_000);
    }
}
