//! Tree-table finder
//!
//! The plain finder over a forward tree table: `Level` is the segment
//! count, the path predicate comes from the glob compiler. Compiled WHERE
//! fragments are memoized per query when a planner cache is configured.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::query::{PlannerContext, QueryCache};
use crate::config::Config;
use crate::error::Result;
use crate::finder::{split_rows, Finder, FinderStat};
use crate::sql::{eq, tree_glob, Scalar, Where};
use crate::transport::{ChClient, Options, QueryContext};

/// Finder over the forward tree table.
pub struct BaseFinder {
    client: Arc<dyn ChClient>,
    table: String,
    opts: Options,
    query_cache: Option<Arc<QueryCache>>,
    body: Vec<u8>,
}

impl BaseFinder {
    /// Finder for `table` using the configured timeouts.
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
            query_cache,
            body: Vec::new(),
        }
    }

    fn where_clause(&self, config: &Config, query: &str) -> String {
        let level = query.matches('.').count() + 1;

        let mut w = Where::new();
        w.and(&eq("Level", Scalar::Int(level as i64)));
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
impl Finder for BaseFinder {
    async fn execute(
        &mut self,
        ctx: &QueryContext,
        config: &Config,
        query: &str,
        _from: i64,
        _until: i64,
        stat: &mut FinderStat,
    ) -> Result<()> {
        let w = PlannerContext::memoize(&self.query_cache, query, || {
            self.where_clause(config, query)
        });

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
        Ok(())
    }

    fn list(&self) -> Vec<Vec<u8>> {
        split_rows(&self.body, false)
    }

    fn series(&self) -> Vec<Vec<u8>> {
        split_rows(&self.body, true)
    }

    fn abs(&self, v: &[u8]) -> Vec<u8> {
        v.to_vec()
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.body.clone())
    }
}
