//! Reverse-tree wrapper finder
//!
//! For installations with a separate reverse tree table. When the last
//! segment of the query is wildcard-free, the query is reversed and run
//! against the reverse table (where it is prefix-anchored) and the rows
//! are reversed back on read; otherwise the wrapped finder runs untouched.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::query::QueryCache;
use crate::config::Config;
use crate::error::Result;
use crate::finder::base::BaseFinder;
use crate::finder::{Finder, FinderStat};
use crate::glob::has_wildcard;
use crate::reverse::{reverse_bytes_no_tag, reverse_no_tag};
use crate::transport::{ChClient, QueryContext};

/// Wrapper routing suitable queries to the reverse tree table.
pub struct ReverseFinder {
    wrapped: Box<dyn Finder>,
    base: BaseFinder,
    is_used: bool,
}

impl ReverseFinder {
    /// Wrap `wrapped`, with a base finder over the reverse `table`.
    pub fn new(
        wrapped: Box<dyn Finder>,
        client: Arc<dyn ChClient>,
        table: &str,
        config: &Config,
        query_cache: Option<Arc<QueryCache>>,
    ) -> Self {
        Self {
            wrapped,
            base: BaseFinder::new(client, table, config, query_cache),
            is_used: false,
        }
    }
}

#[async_trait]
impl Finder for ReverseFinder {
    async fn execute(
        &mut self,
        ctx: &QueryContext,
        config: &Config,
        query: &str,
        from: i64,
        until: i64,
        stat: &mut FinderStat,
    ) -> Result<()> {
        let last_segment = match query.rfind('.') {
            Some(p) if p + 1 < query.len() => &query[p + 1..],
            _ => {
                return self
                    .wrapped
                    .execute(ctx, config, query, from, until, stat)
                    .await
            }
        };

        if has_wildcard(last_segment) {
            return self
                .wrapped
                .execute(ctx, config, query, from, until, stat)
                .await;
        }

        self.is_used = true;
        self.base
            .execute(ctx, config, &reverse_no_tag(query), from, until, stat)
            .await
    }

    fn list(&self) -> Vec<Vec<u8>> {
        if !self.is_used {
            return self.wrapped.list();
        }
        self.base
            .list()
            .iter()
            .map(|row| reverse_bytes_no_tag(row))
            .collect()
    }

    fn series(&self) -> Vec<Vec<u8>> {
        if !self.is_used {
            return self.wrapped.series();
        }
        self.base
            .series()
            .iter()
            .map(|row| reverse_bytes_no_tag(row))
            .collect()
    }

    fn abs(&self, v: &[u8]) -> Vec<u8> {
        v.to_vec()
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        if !self.is_used {
            return self.wrapped.bytes();
        }
        // rows go out un-reversed so a cache replay needs no rework
        let mut body = Vec::new();
        for row in self.list() {
            body.extend_from_slice(&row);
            body.push(b'\n');
        }
        Ok(body)
    }
}
