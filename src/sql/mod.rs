//! SQL predicate builder
//!
//! Builds the boolean fragments the finders place into `WHERE`/`PREWHERE`.
//! Everything here returns plain strings; a [`Where`] accumulates them with
//! `AND`/`OR` wrapping. Escaping matches the store's string literal rules:
//! backslashes double, quotes are backslash-escaped, and `LIKE` patterns
//! additionally escape `_` and `%`.

pub mod direction;

use crate::glob::expand::expand;
use crate::glob::{
    glob_to_regex, has_wildcard, index_wildcard, non_regexp_prefix,
};

/// Typed scalar for [`quote`]; replaces dynamic typing at the call sites.
#[derive(Debug, Clone, Copy)]
pub enum Scalar<'a> {
    /// Signed integer, rendered bare
    Int(i64),
    /// Unsigned 32-bit integer, rendered bare
    UInt32(u32),
    /// String, rendered quoted and escaped
    Str(&'a str),
    /// Raw bytes, rendered as a quoted lossy string
    Bytes(&'a [u8]),
}

/// Escape a string literal: double backslashes, then escape quotes.
pub fn escape(s: &str) -> String {
    s.replace('\\', r"\\").replace('\'', r"\'")
}

/// Escape a `LIKE` pattern: `_` and `%` get a backslash which the literal
/// escaping pass then doubles, matching the store's expected form.
pub fn like_escape(s: &str) -> String {
    s.replace('_', r"\_")
        .replace('%', r"\%")
        .replace('\\', r"\\")
        .replace('\'', r"\'")
}

/// Render a scalar as a SQL literal.
pub fn quote(value: Scalar<'_>) -> String {
    match value {
        Scalar::Int(v) => v.to_string(),
        Scalar::UInt32(v) => v.to_string(),
        Scalar::Str(s) => format!("'{}'", escape(s)),
        Scalar::Bytes(b) => format!("'{}'", escape(&String::from_utf8_lossy(b))),
    }
}

/// `field=value`
pub fn eq(field: &str, value: Scalar<'_>) -> String {
    format!("{}={}", field, quote(value))
}

/// `field LIKE 'pattern'`; the caller is responsible for escaping.
pub fn like(field: &str, pattern: &str) -> String {
    format!("{field} LIKE '{pattern}'")
}

/// `field LIKE 'prefix%'`
pub fn has_prefix(field: &str, prefix: &str) -> String {
    format!("{} LIKE '{}%'", field, like_escape(prefix))
}

/// `field LIKE 'prefix_%'`. The raw `_` forces at least one character
/// after the prefix, so the field exists and is non-empty.
pub fn has_prefix_and_not_eq(field: &str, prefix: &str) -> String {
    format!("{} LIKE '{}_%'", field, like_escape(prefix))
}

/// `field IN ('a','b',...)`; a single item degrades to [`eq`].
pub fn in_list(field: &str, list: &[String]) -> String {
    if list.len() == 1 {
        return eq(field, Scalar::Str(&list[0]));
    }
    let mut buf = String::with_capacity(list.len() * 16);
    buf.push_str(field);
    buf.push_str(" IN (");
    for (i, v) in list.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        buf.push_str(&quote(Scalar::Str(v)));
    }
    buf.push(')');
    buf
}

/// `Date >='from' AND Date <= 'until'` with the dates in UTC `YYYY-MM-DD`.
pub fn date_clause(from: i64, until: i64) -> String {
    format!(
        "Date >='{}' AND Date <= '{}'",
        format_date(from),
        format_date(until)
    )
}

/// UTC `YYYY-MM-DD` for a unix timestamp.
pub fn format_date(ts: i64) -> String {
    use chrono::{TimeZone, Utc};
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "1970-01-01".to_string(),
    }
}

/// Regex match predicate for one `key=value` tag expression.
///
/// An empty or `*` value only asserts the tag exists. Otherwise the
/// expression is anchored at `key=` (a leading `^` in `value` anchors the
/// value itself, anything else matches with `.*`), and the widest literal
/// prefix is peeled off: a fully-literal expression becomes `=`, a literal
/// with only a trailing `$` becomes `=` on the stripped form, and the rest
/// keep a `LIKE` prefix guard next to `match()` when one exists.
pub fn match_expr(field: &str, key: &str, value: &str) -> String {
    if value.is_empty() || value == "*" {
        return like(field, &format!("{key}=%"));
    }

    let expr = match value.strip_prefix('^') {
        Some(rest) => format!("{key}={rest}"),
        None => format!("{key}=.*{value}"),
    };

    let prefix = non_regexp_prefix(&expr);
    if prefix.len() == expr.len() {
        return eq(field, Scalar::Str(&expr));
    }
    if prefix.len() == expr.len() - 1 && expr.ends_with('$') {
        return eq(field, Scalar::Str(prefix));
    }

    let m = format!(
        "match({}, {})",
        field,
        quote(Scalar::Str(&format!("^{expr}")))
    );
    if prefix.is_empty() {
        m
    } else {
        format!("{} AND {}", has_prefix(field, prefix), m)
    }
}

/// Compile a single concrete glob pattern against `field`.
fn glob_one(field: &str, query: &str, optional_dot_at_end: bool) -> String {
    if !has_wildcard(query) {
        if optional_dot_at_end {
            return in_list(field, &[query.to_string(), format!("{query}.")]);
        }
        return eq(field, Scalar::Str(query));
    }

    // wildcard position is guaranteed by the has_wildcard check
    let simple_prefix = &query[..index_wildcard(query).unwrap_or(0)];

    // prefix search like "metric.name.xx*"
    if simple_prefix.len() == query.len() - 1 && query.ends_with('*') {
        return has_prefix(field, simple_prefix);
    }

    // The quoting layer doubles backslashes, so the regex uses [.]
    // instead of \. throughout (see glob_to_regex).
    let postfix = if optional_dot_at_end { "[.]?$" } else { "$" };
    let regex = format!("^{}{}", glob_to_regex(query), postfix);
    let m = format!("match({}, {})", field, quote(Scalar::Str(&regex)));

    if simple_prefix.is_empty() {
        m
    } else {
        format!("{} AND {}", has_prefix(field, simple_prefix), m)
    }
}

fn glob_expanded(
    field: &str,
    query: &str,
    max: i64,
    depth: i64,
    optional_dot_at_end: bool,
) -> String {
    if query == "*" {
        return String::new();
    }

    let patterns = expand(query, max, depth, false).into_vec();
    if patterns.len() == 1 {
        return glob_one(field, &patterns[0], optional_dot_at_end);
    }

    let mut values = Vec::new();
    let mut w = Where::new();
    for p in &patterns {
        if has_wildcard(p) {
            w.or(&glob_one(field, p, optional_dot_at_end));
        } else {
            values.push(p.clone());
            if optional_dot_at_end {
                values.push(format!("{p}."));
            }
        }
    }
    if !values.is_empty() {
        w.or(&in_list(field, &values));
    }
    w.into_string()
}

/// Glob compiler for data-path fields (exact match at the end).
pub fn glob(field: &str, query: &str, max: i64, depth: i64) -> String {
    glob_expanded(field, query, max, depth, false)
}

/// Glob compiler for tree tables, where branch nodes carry a trailing dot.
pub fn tree_glob(field: &str, query: &str, max: i64, depth: i64) -> String {
    glob_expanded(field, query, max, depth, true)
}

/// Accumulates boolean fragments into one `WHERE`/`PREWHERE` expression.
#[derive(Debug, Default, Clone)]
pub struct Where {
    expr: String,
}

impl Where {
    /// Empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// AND a fragment in; empty operands are dropped.
    pub fn and(&mut self, exp: &str) {
        if exp.is_empty() {
            return;
        }
        if self.expr.is_empty() {
            self.expr = exp.to_string();
        } else {
            self.expr = format!("({}) AND ({})", self.expr, exp);
        }
    }

    /// OR a fragment in; empty operands are dropped.
    pub fn or(&mut self, exp: &str) {
        if exp.is_empty() {
            return;
        }
        if self.expr.is_empty() {
            self.expr = exp.to_string();
        } else {
            self.expr = format!("({}) OR ({})", self.expr, exp);
        }
    }

    /// True when nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.expr.is_empty()
    }

    /// The bare expression without a keyword.
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// Consume into the bare expression.
    pub fn into_string(self) -> String {
        self.expr
    }

    /// `WHERE <expr>`, or empty when nothing was accumulated.
    pub fn sql(&self) -> String {
        if self.expr.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.expr)
        }
    }

    /// `PREWHERE <expr>`, or empty when nothing was accumulated.
    pub fn prewhere_sql(&self) -> String {
        if self.expr.is_empty() {
            String::new()
        } else {
            format!("PREWHERE {}", self.expr)
        }
    }
}

impl std::fmt::Display for Where {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("it's"), r"it\'s");
        assert_eq!(escape(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_like_escape() {
        // the backslash pass doubles the escapes added for _ and %
        assert_eq!(like_escape("__name__="), r"\\_\\_name\\_\\_=");
        assert_eq!(like_escape("50%"), r"50\\%");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote(Scalar::Int(20002)), "20002");
        assert_eq!(quote(Scalar::UInt32(7)), "7");
        assert_eq!(quote(Scalar::Str("v")), "'v'");
        assert_eq!(quote(Scalar::Bytes(b"v")), "'v'");
    }

    #[test]
    fn test_eq_and_in() {
        assert_eq!(eq("Tag1", Scalar::Str("key=value")), "Tag1='key=value'");
        assert_eq!(
            in_list("Tag1", &["a".to_string(), "b".to_string()]),
            "Tag1 IN ('a','b')"
        );
        assert_eq!(in_list("Tag1", &["a".to_string()]), "Tag1='a'");
    }

    #[test]
    fn test_prefix_predicates() {
        assert_eq!(has_prefix("Path", "test.metric"), "Path LIKE 'test.metric%'");
        assert_eq!(
            has_prefix_and_not_eq("Tag1", "key="),
            "Tag1 LIKE 'key=_%'"
        );
    }

    #[test]
    fn test_where_and_or() {
        let mut w = Where::new();
        assert!(w.is_empty());
        w.and("");
        assert!(w.is_empty());
        w.and("a=1");
        assert_eq!(w.as_str(), "a=1");
        w.and("b=2");
        assert_eq!(w.as_str(), "(a=1) AND (b=2)");
        w.or("c=3");
        assert_eq!(w.as_str(), "((a=1) AND (b=2)) OR (c=3)");
        assert_eq!(w.sql(), "WHERE ((a=1) AND (b=2)) OR (c=3)");

        let w = Where::new();
        assert_eq!(w.sql(), "");
        assert_eq!(w.prewhere_sql(), "");
    }

    #[test]
    fn test_date_clause() {
        assert_eq!(
            date_clause(1668124800, 1668124810),
            "Date >='2022-11-11' AND Date <= '2022-11-11'"
        );
    }

    #[test]
    fn test_glob_star_is_empty() {
        assert_eq!(tree_glob("Path", "*", 0, 0), "");
    }

    #[test]
    fn test_glob_literal() {
        assert_eq!(glob("Path", "a.b", 0, 0), "Path='a.b'");
        assert_eq!(tree_glob("Path", "a.b", 0, 0), "Path IN ('a.b','a.b.')");
    }

    #[test]
    fn test_glob_prefix_search() {
        assert_eq!(
            tree_glob("Path", "test.metric*", 0, 0),
            "Path LIKE 'test.metric%'"
        );
    }

    #[test]
    fn test_glob_with_regex_tail() {
        assert_eq!(
            tree_glob("Path", "metric.*test", 0, 0),
            "Path LIKE 'metric.%' AND match(Path, '^metric[.]([^.]*?)test[.]?$')"
        );
        assert_eq!(
            glob("Path", "metric.*test", 0, 0),
            "Path LIKE 'metric.%' AND match(Path, '^metric[.]([^.]*?)test$')"
        );
    }

    #[test]
    fn test_glob_without_prefix() {
        assert_eq!(
            glob("Path", "*suffix", 0, 0),
            "match(Path, '^([^.]*?)suffix$')"
        );
    }

    #[test]
    fn test_glob_expansion_to_in() {
        assert_eq!(
            glob("Path", "a.{b,c}.d", 10, 0),
            "Path IN ('a.b.d','a.c.d')"
        );
        assert_eq!(
            tree_glob("Path", "a.{b,c}.d", 10, 0),
            "Path IN ('a.b.d','a.b.d.','a.c.d','a.c.d.')"
        );
    }

    #[test]
    fn test_glob_expansion_mixed() {
        assert_eq!(
            glob("Path", "a.{b,c}.d*", 10, 0),
            "(Path LIKE 'a.b.d%') OR (Path LIKE 'a.c.d%')"
        );
    }

    #[test]
    fn test_glob_single_choice_collapses_on_fail_open() {
        // bound exceeded: the cleared pattern compiles as one glob
        assert_eq!(
            glob("Path", "a.{x}.b", 0, 0),
            "Path='a.x.b'"
        );
    }

    #[test]
    fn test_match_expr_exists_only() {
        assert_eq!(match_expr("x", "what", ""), "x LIKE 'what=%'");
        assert_eq!(match_expr("x", "what", "*"), "x LIKE 'what=%'");
    }

    #[test]
    fn test_match_expr_plain() {
        assert_eq!(
            match_expr("x", "key", "value"),
            "x LIKE 'key=%' AND match(x, '^key=.*value')"
        );
        assert_eq!(
            match_expr("Tag1", "__name__", "cpu.usage"),
            r"Tag1 LIKE '\\_\\_name\\_\\_=%' AND match(Tag1, '^__name__=.*cpu.usage')"
        );
    }

    #[test]
    fn test_match_expr_anchors() {
        assert_eq!(match_expr("x", "key", "^value"), "x='key=value'");
        assert_eq!(match_expr("x", "key", "^value$"), "x='key=value'");
        assert_eq!(
            match_expr("Tag1", "__name__", "^cpu|mem"),
            r"Tag1 LIKE '\\_\\_name\\_\\_=%' AND match(Tag1, '^__name__=cpu|mem')"
        );
        assert_eq!(
            match_expr("Tag1", "__name__", "cpu|mem$"),
            r"Tag1 LIKE '\\_\\_name\\_\\_=%' AND match(Tag1, '^__name__=.*cpu|mem$')"
        );
    }

    #[test]
    fn test_match_expr_escapes_backslash() {
        assert_eq!(
            match_expr("x", "host", r"Vladimirs-MacBook-Pro\.local"),
            r"x LIKE 'host=%' AND match(x, '^host=.*Vladimirs-MacBook-Pro\\.local')"
        );
    }
}
