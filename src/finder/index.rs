//! Index-table finder
//!
//! One combined table holds daily and whole-tree index rows, forward and
//! reversed, distinguished by an offset added to the `Level` column. The
//! finder routes each query to the forward or reversed half (user rules
//! first, wildcard-position heuristic after), rewrites the pattern for the
//! reversed half, and picks the daily rows when the request carries a
//! usable time range.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::query::{PlannerContext, QueryCache};
use crate::config::Config;
use crate::error::Result;
use crate::finder::{split_rows, Finder, FinderStat};
use crate::glob::expand::expand;
use crate::reverse::{reverse_bytes_no_tag, reverse_no_tag};
use crate::sql::direction::use_reverse;
use crate::sql::{date_clause, eq, tree_glob, Scalar, Where};
use crate::transport::{ChClient, Options, QueryContext};

/// Level offset of daily reversed rows.
pub const REVERSE_LEVEL_OFFSET: i64 = 10_000;

/// Level offset of whole-tree forward rows.
pub const TREE_LEVEL_OFFSET: i64 = 20_000;

/// Level offset of whole-tree reversed rows.
pub const REVERSE_TREE_LEVEL_OFFSET: i64 = 30_000;

/// Date sentinel on whole-tree rows.
pub const DEFAULT_TREE_DATE: &str = "1970-02-12";

/// Finder over the combined index table.
pub struct IndexFinder {
    client: Arc<dyn ChClient>,
    table: String,
    opts: Options,
    daily_enabled: bool,
    query_cache: Option<Arc<QueryCache>>,
    body: Vec<u8>,
    use_reverse: bool,
    use_daily: bool,
    /// Rows in `body` are still reversed and need rewriting on read
    body_reversed: bool,
    /// Un-reverse the body right after the fetch so cached bytes replay
    /// without rework
    unreverse_for_cache: bool,
}

/// A reversed rewrite is textual, so every alternation has to stay inside
/// one dot-segment, and the pattern has to survive expansion. A pattern
/// that fails the probe stays on the forward table, where the unrewritten
/// pattern is always valid.
fn reverse_probe_ok(query: &str) -> bool {
    if !query.contains(['{', '[']) {
        return true;
    }

    // a dot inside a construct would cross segment boundaries on rewrite
    let mut depth: i32 = 0;
    for c in query.chars() {
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            '.' if depth > 0 => return false,
            _ => {}
        }
    }

    // first-alternative probe: an unexpandable pattern (such as an invalid
    // runes range) cannot be rewritten either
    expand(query, i64::MAX, 0, true).is_expanded()
}

impl IndexFinder {
    /// Finder for `table` using the configured direction rules, daily
    /// switch and timeouts.
    pub fn new(
        client: Arc<dyn ChClient>,
        table: &str,
        config: &Config,
        query_cache: Option<Arc<QueryCache>>,
    ) -> Self {
        Self {
            client,
            table: table.to_string(),
            opts: Options::from_config(&config.clickhouse),
            daily_enabled: config.clickhouse.index_use_daily,
            query_cache,
            body: Vec::new(),
            use_reverse: false,
            use_daily: false,
            body_reversed: false,
            unreverse_for_cache: config.common.find_cache.enabled,
        }
    }

    fn where_clause(&self, config: &Config, query: &str, level_offset: i64) -> String {
        let level = query.matches('.').count() as i64 + 1;

        let mut w = Where::new();
        w.and(&eq("Level", Scalar::Int(level + level_offset)));
        w.and(&tree_glob(
            "Path",
            query,
            config.clickhouse.expand_max,
            config.clickhouse.expand_depth,
        ));
        w.into_string()
    }
}

#[async_trait]
impl Finder for IndexFinder {
    async fn execute(
        &mut self,
        ctx: &QueryContext,
        config: &Config,
        query: &str,
        from: i64,
        until: i64,
        stat: &mut FinderStat,
    ) -> Result<()> {
        let ch = &config.clickhouse;

        self.use_reverse = use_reverse(query, ch.index_reverse, &ch.index_reverses)
            && reverse_probe_ok(query);
        self.use_daily = self.daily_enabled && from > 0 && until > 0;

        let level_offset = match (self.use_daily, self.use_reverse) {
            (true, false) => 0,
            (true, true) => REVERSE_LEVEL_OFFSET,
            (false, false) => TREE_LEVEL_OFFSET,
            (false, true) => REVERSE_TREE_LEVEL_OFFSET,
        };

        let query = if self.use_reverse {
            reverse_no_tag(query)
        } else {
            query.to_string()
        };

        // the rewritten pattern and the offset make the key unambiguous
        let cache_key = format!("{level_offset}:{query}");
        let mut w = Where::new();
        w.and(&PlannerContext::memoize(&self.query_cache, &cache_key, || {
            self.where_clause(config, &query, level_offset)
        }));

        if self.use_daily {
            w.and(&date_clause(from, until));
        } else {
            w.and(&eq("Date", Scalar::Str(DEFAULT_TREE_DATE)));
        }

        let sql = format!(
            "SELECT Path FROM {} WHERE {} GROUP BY Path FORMAT TabSeparatedRaw",
            self.table, w
        );

        let qctx = QueryContext::new(&ctx.request_id, &self.table);
        let response = self.client.query(&qctx, &sql, &self.opts).await?;

        stat.table = self.table.clone();
        stat.read_bytes = response.body.len() as i64;
        stat.ch_read_rows = response.read_rows as i64;
        stat.ch_read_bytes = response.read_bytes as i64;
        self.body = response.body;
        self.body_reversed = self.use_reverse;

        if self.body_reversed && self.unreverse_for_cache {
            let rows: Vec<Vec<u8>> = split_rows(&self.body, false)
                .iter()
                .map(|row| reverse_bytes_no_tag(row))
                .collect();
            self.body = rows.join(&b'\n');
            if !self.body.is_empty() {
                self.body.push(b'\n');
            }
            self.body_reversed = false;
        }

        Ok(())
    }

    fn list(&self) -> Vec<Vec<u8>> {
        let rows = split_rows(&self.body, false);
        if !self.body_reversed {
            return rows;
        }
        rows.iter().map(|row| reverse_bytes_no_tag(row)).collect()
    }

    fn series(&self) -> Vec<Vec<u8>> {
        let rows = split_rows(&self.body, true);
        if !self.body_reversed {
            return rows;
        }
        rows.iter().map(|row| reverse_bytes_no_tag(row)).collect()
    }

    fn abs(&self, v: &[u8]) -> Vec<u8> {
        v.to_vec()
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.body.clone())
    }
}
