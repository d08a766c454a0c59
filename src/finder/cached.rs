//! Cached finders
//!
//! Reconstituted from a find-cache body: no store round trip, `execute` is
//! a no-op, the rows are already in their final (un-reversed) form. The
//! tagged variant keeps the tagged `abs` canonicalization so a cache hit
//! is indistinguishable from a live result.

use async_trait::async_trait;

use crate::config::Config;
use crate::error::Result;
use crate::finder::tagged::tagged_abs;
use crate::finder::{split_rows, Finder, FinderStat, SERIES_BY_TAG_PREFIX};
use crate::transport::QueryContext;

/// Finder replaying a cached body.
pub struct CachedFinder {
    body: Vec<u8>,
    tagged: bool,
    abs_keep_encoded: bool,
}

/// Reconstitute a finder for `target` from cached bytes.
pub fn new_cached(config: &Config, target: &str, body: Vec<u8>) -> Box<dyn Finder> {
    Box::new(CachedFinder {
        body,
        tagged: target.starts_with(SERIES_BY_TAG_PREFIX),
        abs_keep_encoded: config.clickhouse.abs_keep_encoded,
    })
}

#[async_trait]
impl Finder for CachedFinder {
    async fn execute(
        &mut self,
        _ctx: &QueryContext,
        _config: &Config,
        _query: &str,
        _from: i64,
        _until: i64,
        _stat: &mut FinderStat,
    ) -> Result<()> {
        Ok(())
    }

    fn list(&self) -> Vec<Vec<u8>> {
        split_rows(&self.body, false)
    }

    fn series(&self) -> Vec<Vec<u8>> {
        split_rows(&self.body, !self.tagged)
    }

    fn abs(&self, v: &[u8]) -> Vec<u8> {
        if self.tagged {
            tagged_abs(v, self.abs_keep_encoded)
        } else {
            v.to_vec()
        }
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.body.clone())
    }
}
