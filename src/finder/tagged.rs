//! Tagged finder
//!
//! Parses `seriesByTag('tag op value', ...)` calls, orders the terms by
//! selectivity cost, and emits the tagged-table SQL. The cheapest term is
//! checked against the pre-extracted `Tag1` column; every other term goes
//! through `arrayExists` over the full `Tags` array. A leading regex term
//! is duplicated into `PREWHERE` so the store can narrow its column reads
//! early.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::query::QueryCache;
use crate::config::Config;
use crate::costs::TaggedCosts;
use crate::error::{Error, Result};
use crate::finder::{split_rows, Finder, FinderStat};
use crate::glob::{glob_expand_simple, has_wildcard};
use crate::sql::{
    date_clause, eq, has_prefix_and_not_eq, in_list, like, match_expr, Scalar, Where,
};
use crate::transport::{ChClient, Options, QueryContext};

/// Term operators, in sort precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaggedTermOp {
    /// `=`
    Eq = 1,
    /// `=~`
    Match = 2,
    /// `!=`
    Ne = 3,
    /// `!=~`
    NotMatch = 4,
}

/// One parsed `tag op value` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedTerm {
    /// Tag key, with `name` normalized to `__name__`
    pub key: String,

    /// Operator
    pub op: TaggedTermOp,

    /// Right-hand side, untouched
    pub value: String,

    /// Value carries glob wildcards (equality/inequality terms only)
    pub has_wildcard: bool,

    /// Selectivity cost, lower first; zero when no costs are configured
    pub cost: i32,
}

impl TaggedTerm {
    fn concat(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

/// Parse a `seriesByTag(...)` call into cost-ordered terms.
pub fn parse_series_by_tag(query: &str, costs: Option<&TaggedCosts>) -> Result<Vec<TaggedTerm>> {
    let args = parse_call_args(query)?;

    let mut terms = Vec::with_capacity(args.len());
    for arg in &args {
        if arg.is_empty() {
            continue;
        }
        terms.push(parse_term(arg, query, costs)?);
    }
    if terms.is_empty() {
        return Err(Error::InvalidSeriesByTag(query.to_string()));
    }

    sort_terms(&mut terms);
    Ok(terms)
}

/// Extract the quoted string arguments of a `seriesByTag(...)` call.
fn parse_call_args(query: &str) -> Result<Vec<String>> {
    let invalid = || Error::InvalidSeriesByTag(query.to_string());

    let trimmed = query.trim();
    let inner = trimmed
        .strip_prefix(super::SERIES_BY_TAG_PREFIX)
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(invalid)?;

    let mut args = Vec::new();
    let mut rest = inner.trim_start();
    loop {
        if rest.is_empty() {
            break;
        }
        let quote = rest.chars().next().ok_or_else(invalid)?;
        if quote != '\'' && quote != '"' {
            return Err(invalid());
        }
        let end = rest[1..].find(quote).ok_or_else(invalid)?;
        args.push(rest[1..end + 1].to_string());
        rest = rest[end + 2..].trim_start();

        match rest.strip_prefix(',') {
            Some(after) => rest = after.trim_start(),
            None if rest.is_empty() => break,
            None => return Err(invalid()),
        }
    }
    if args.is_empty() {
        return Err(invalid());
    }
    Ok(args)
}

fn parse_term(arg: &str, query: &str, costs: Option<&TaggedCosts>) -> Result<TaggedTerm> {
    let Some((key_part, value_part)) = arg.split_once('=') else {
        return Err(Error::InvalidSeriesByTag(query.to_string()));
    };

    let mut key = key_part.trim();
    let mut value = value_part.trim();
    let mut negated = false;
    let mut regex = false;

    if let Some(stripped) = key.strip_suffix('!') {
        negated = true;
        key = stripped.trim_end();
    }
    if let Some(stripped) = value.strip_prefix('~') {
        regex = true;
        value = stripped.trim_start();
    }

    if key.is_empty() {
        return Err(Error::InvalidSeriesByTag(query.to_string()));
    }
    let key = if key == "name" { "__name__" } else { key };

    let op = match (negated, regex) {
        (false, false) => TaggedTermOp::Eq,
        (false, true) => TaggedTermOp::Match,
        (true, false) => TaggedTermOp::Ne,
        (true, true) => TaggedTermOp::NotMatch,
    };

    let term_wildcard = matches!(op, TaggedTermOp::Eq | TaggedTermOp::Ne) && has_wildcard(value);
    let eq_literal = op == TaggedTermOp::Eq && !term_wildcard;
    let cost = match costs {
        Some(costs) => costs.term_cost(key, value, eq_literal),
        None => 0,
    };

    Ok(TaggedTerm {
        key: key.to_string(),
        op,
        value: value.to_string(),
        has_wildcard: term_wildcard,
        cost,
    })
}

/// Order terms so the most selective becomes the `Tag1` filter: cost
/// ascending, then operator ascending, then non-wildcard equality before
/// wildcard equality, then `__name__` before other keys.
fn sort_terms(terms: &mut [TaggedTerm]) {
    terms.sort_by(|a, b| {
        a.cost
            .cmp(&b.cost)
            .then(a.op.cmp(&b.op))
            .then_with(|| {
                if a.op == TaggedTermOp::Eq {
                    a.has_wildcard.cmp(&b.has_wildcard)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| {
                let a_name = a.key == "__name__";
                let b_name = b.key == "__name__";
                b_name.cmp(&a_name)
            })
    });
}

/// Equality-shaped predicate against `field`, expanding `{...}`
/// alternations to `IN` and translating `*` to a `LIKE` pattern.
fn eq_predicate(field: &str, term: &TaggedTerm) -> Result<String> {
    let concat = term.concat();
    if !term.has_wildcard {
        return Ok(eq(field, Scalar::Str(&concat)));
    }

    if term.value.contains(['{', '}']) {
        let mut expanded = Vec::new();
        glob_expand_simple(&concat, "", &mut expanded)?;
        if expanded.iter().any(|e| has_wildcard(e)) {
            let mut w = Where::new();
            for e in &expanded {
                w.or(&like(field, &e.replace('*', "%")));
            }
            return Ok(w.into_string());
        }
        return Ok(in_list(field, &expanded));
    }

    Ok(like(field, &concat.replace('*', "%")))
}

/// Predicate for the first (cheapest) term, checked against `Tag1`.
/// Negative operators still scan the full `Tags` array.
fn term_where_1(term: &TaggedTerm) -> Result<String> {
    match term.op {
        TaggedTermOp::Eq => eq_predicate("Tag1", term),
        TaggedTermOp::Ne => {
            if term.value.is_empty() {
                // key!="" means the tag exists and is non-empty
                return Ok(has_prefix_and_not_eq("Tag1", &format!("{}=", term.key)));
            }
            Ok(format!(
                "NOT arrayExists((x) -> {}, Tags)",
                eq_predicate("x", term)?
            ))
        }
        TaggedTermOp::Match => Ok(match_expr("Tag1", &term.key, &term.value)),
        TaggedTermOp::NotMatch => Ok(format!(
            "NOT arrayExists((x) -> {}, Tags)",
            match_expr("x", &term.key, &term.value)
        )),
    }
}

/// Predicate for every subsequent term, over the `Tags` array.
fn term_where_n(term: &TaggedTerm) -> Result<String> {
    match term.op {
        TaggedTermOp::Eq => Ok(format!(
            "arrayExists((x) -> {}, Tags)",
            eq_predicate("x", term)?
        )),
        TaggedTermOp::Ne => {
            if term.value.is_empty() {
                return Ok(format!(
                    "arrayExists((x) -> {}, Tags)",
                    has_prefix_and_not_eq("x", &format!("{}=", term.key))
                ));
            }
            Ok(format!(
                "NOT arrayExists((x) -> {}, Tags)",
                eq_predicate("x", term)?
            ))
        }
        TaggedTermOp::Match => Ok(format!(
            "arrayExists((x) -> {}, Tags)",
            match_expr("x", &term.key, &term.value)
        )),
        TaggedTermOp::NotMatch => Ok(format!(
            "NOT arrayExists((x) -> {}, Tags)",
            match_expr("x", &term.key, &term.value)
        )),
    }
}

/// Build the `WHERE` and `PREWHERE` fragments for ordered terms.
pub fn tagged_where(terms: &[TaggedTerm]) -> Result<(Where, Where)> {
    if terms.is_empty() {
        return Err(Error::internal("empty tagged term list"));
    }

    let mut w = Where::new();
    let mut pw = Where::new();

    let first = term_where_1(&terms[0])?;
    if terms[0].op == TaggedTermOp::Match {
        pw.and(&first);
    }
    w.and(&first);

    for term in &terms[1..] {
        w.and(&term_where_n(term)?);
    }

    Ok((w, pw))
}

/// Canonical metric name: `name?k1=v1&k2=v2` becomes `name;k1=v1;k2=v2`
/// with the tags sorted. `keep_encoded` skips URL-decoding of the tag
/// pairs for consumers that want the wire form.
pub(crate) fn tagged_abs(v: &[u8], keep_encoded: bool) -> Vec<u8> {
    let s = String::from_utf8_lossy(v);
    let Some((path, query)) = s.split_once('?') else {
        return v.to_vec();
    };

    let mut tags: Vec<String> = if keep_encoded {
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, value)| format!("{k}={value}"))
            .collect()
    };

    if tags.is_empty() {
        return path.as_bytes().to_vec();
    }
    tags.sort();
    format!("{path};{}", tags.join(";")).into_bytes()
}

/// Finder over the tagged series table.
pub struct TaggedFinder {
    client: Arc<dyn ChClient>,
    table: String,
    opts: Options,
    costs: Option<Arc<TaggedCosts>>,
    query_cache: Option<Arc<QueryCache>>,
    abs_keep_encoded: bool,
    body: Vec<u8>,
}

impl TaggedFinder {
    /// Finder for the tagged `table`.
    pub fn new(
        client: Arc<dyn ChClient>,
        table: &str,
        config: &Config,
        costs: Option<Arc<TaggedCosts>>,
        query_cache: Option<Arc<QueryCache>>,
    ) -> Self {
        Self {
            client,
            table: table.to_string(),
            opts: Options::from_config(&config.clickhouse),
            costs,
            query_cache,
            abs_keep_encoded: config.clickhouse.abs_keep_encoded,
            body: Vec::new(),
        }
    }

    fn make_where(&self, query: &str) -> Result<(Where, Where)> {
        let terms = parse_series_by_tag(query, self.costs.as_deref())?;
        tagged_where(&terms)
    }
}

#[async_trait]
impl Finder for TaggedFinder {
    async fn execute(
        &mut self,
        ctx: &QueryContext,
        _config: &Config,
        query: &str,
        from: i64,
        until: i64,
        stat: &mut FinderStat,
    ) -> Result<()> {
        let (terms_w, pw) = match &self.query_cache {
            None => self.make_where(query)?,
            Some(cache) => match cache.get(query) {
                Some(memo) => {
                    let (pw_s, w_s) = memo.split_once('\n').unwrap_or(("", memo.as_str()));
                    let mut w = Where::new();
                    w.and(w_s);
                    let mut pw = Where::new();
                    pw.and(pw_s);
                    (w, pw)
                }
                None => {
                    let (w, pw) = self.make_where(query)?;
                    cache.set(query, format!("{pw}\n{w}"));
                    (w, pw)
                }
            },
        };

        let mut w = Where::new();
        w.and(&date_clause(from, until));
        w.and(terms_w.as_str());

        let mut sql = format!("SELECT Path FROM {}", self.table);
        if !pw.is_empty() {
            sql.push(' ');
            sql.push_str(&pw.prewhere_sql());
        }
        sql.push(' ');
        sql.push_str(&w.sql());
        sql.push_str(" GROUP BY Path FORMAT TabSeparatedRaw");

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

    // tagged rows have no branch markers, so series and list coincide
    fn series(&self) -> Vec<Vec<u8>> {
        self.list()
    }

    fn abs(&self, v: &[u8]) -> Vec<u8> {
        tagged_abs(v, self.abs_keep_encoded)
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.body.clone())
    }
}
