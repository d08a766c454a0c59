//! Graphite glob pattern utilities
//!
//! Shared helpers for the glob-to-SQL compiler: wildcard detection, the
//! glob-to-regex transliteration, literal-prefix extraction for regexes, and
//! the Grafana `{single}` cleanup. The bounded expansion machinery lives in
//! [`expand`].

pub mod expand;

use crate::error::{Error, Result};

/// Characters that make a pattern a wildcard pattern.
pub const WILDCARD_CHARS: &[char] = &['[', ']', '{', '}', '*', '?'];

/// Bytes the regex engine treats as metacharacters (`regexp.QuoteMeta` set).
const REGEX_META: &[u8] = br"\.+*?()|[]{}^$";

/// True iff the target contains any glob wildcard character.
pub fn has_wildcard(target: &str) -> bool {
    target.contains(WILDCARD_CHARS)
}

/// Byte offset of the first wildcard character, if any.
pub fn index_wildcard(target: &str) -> Option<usize> {
    target.find(WILDCARD_CHARS)
}

/// Byte offset of the last wildcard character, if any.
pub fn index_last_wildcard(target: &str) -> Option<usize> {
    target.rfind(WILDCARD_CHARS)
}

/// Transliterate a Graphite glob into the store's regex dialect.
///
/// Substitutions are applied in a fixed order; `[.]` stands in for `\.`
/// because the quoting layer doubles backslashes.
pub fn glob_to_regex(g: &str) -> String {
    let mut s = g.replace('.', "[.]");
    s = s.replace('$', "[$]");
    s = s.replace('{', "(");
    s = s.replace('}', ")");
    s = s.replace('?', "[^.]");
    s = s.replace(',', "|");
    s.replace('*', "([^.]*?)")
}

/// Longest leading substring of `expr` the regex engine treats as literal.
///
/// Stops at the first metacharacter. When the stop is an alternation bar
/// (`x=a|b`), backtracks to the last `=` or `~` so the returned prefix still
/// anchors the whole alternation.
pub fn non_regexp_prefix(expr: &str) -> &str {
    let bytes = expr.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if REGEX_META.contains(&b) {
            if b == b'|' && i + 1 < bytes.len() {
                if let Some(eq) = expr[..i].rfind(['=', '~']) {
                    if eq > 0 {
                        return &expr[..eq + 1];
                    }
                }
            }
            return &expr[..i];
        }
    }
    expr
}

/// Collapse single-choice constructs: `{x}` with no `,`/`.` inside becomes
/// `x`, `[c]` becomes `c`. Grafana emits these for unexpanded variables.
pub fn clear_glob(query: &str) -> String {
    let mut out = String::new();
    let mut found = false;
    let mut pos = 0;

    while let Some(rel) = query[pos..].find(['{', '[']) {
        let start = pos + rel;
        if query.as_bytes()[start] == b'{' {
            let Some(end_rel) = query[start + 1..].find('}') else {
                break;
            };
            let end = start + 1 + end_rel;
            let inner = &query[start + 1..end];
            if !inner.contains(['.', ',']) {
                out.push_str(&query[pos..start]);
                out.push_str(inner);
                found = true;
                pos = end + 1;
            } else {
                out.push_str(&query[pos..end + 1]);
                pos = end + 1;
            }
        } else {
            let Some(end_rel) = query[start + 1..].find(']') else {
                break;
            };
            let end = start + 1 + end_rel;
            if end_rel == 1 {
                out.push_str(&query[pos..start]);
                out.push_str(&query[start + 1..end]);
                found = true;
                pos = end + 1;
            } else {
                out.push_str(&query[pos..end + 1]);
                pos = end + 1;
            }
        }
    }

    if !found {
        return query.to_string();
    }
    out.push_str(&query[pos..]);
    out
}

/// Expand `S{a,b,c}E` into `[SaE, SbE, ScE]`, recursively for several brace
/// groups. Workaround for Grafana multi-value variables; only `{...}` is
/// understood here, other wildcards pass through as literal text.
///
/// Unclosed, empty, or nested braces are a [`Error::BadPattern`].
pub fn glob_expand_simple(value: &str, prefix: &str, result: &mut Vec<String>) -> Result<()> {
    if value.is_empty() {
        result.push(prefix.to_string());
        return Ok(());
    }

    let Some(start) = value.find(['{', '}']) else {
        result.push(format!("{prefix}{value}"));
        return Ok(());
    };

    let end = match value[start..].find('}') {
        Some(e) if e > 1 => start + e,
        _ => return Err(Error::bad_pattern(format!("malformed glob: {value}"))),
    };
    if value[start + 1..end].contains(['{', '}']) {
        return Err(Error::bad_pattern(format!("malformed glob: {value}")));
    }

    let mut prefix = prefix.to_string();
    prefix.push_str(&value[..start]);
    let postfix = if end + 1 < value.len() {
        &value[end + 1..]
    } else {
        ""
    };

    for v in value[start + 1..end].split(',') {
        glob_expand_simple(postfix, &format!("{prefix}{v}"), result)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_wildcard() {
        assert!(!has_wildcard("a.b.c"));
        assert!(has_wildcard("a.b*"));
        assert!(has_wildcard("a.{b,c}.d"));
        assert!(has_wildcard("a.[bc].d"));
        assert!(has_wildcard("a.b?.d"));
    }

    #[test]
    fn test_glob_to_regex() {
        assert_eq!(glob_to_regex("a.b*"), "a[.]b([^.]*?)");
        assert_eq!(glob_to_regex("a.{b,c}?"), "a[.](b|c)[^.]");
        assert_eq!(glob_to_regex("m$"), "m[$]");
    }

    #[test]
    fn test_glob_to_regex_matches_like_graphite() {
        // (pattern, path, matches)
        let table = [
            ("a.b*", "a.bcd", true),
            ("a.b*", "a.b.c", false),
            ("a.{b,c}.d", "a.c.d", true),
            ("a.{b,c}.d", "a.x.d", false),
            ("host.?.cpu", "host.1.cpu", true),
            ("host.?.cpu", "host.10.cpu", false),
            ("a.[bc].d", "a.b.d", true),
            ("a.[bc].d", "a.e.d", false),
            ("m$", "m$", true),
        ];
        for (pattern, path, want) in table {
            let re = regex::Regex::new(&format!("^{}$", glob_to_regex(pattern))).unwrap();
            assert_eq!(re.is_match(path), want, "{pattern} vs {path}");
        }
    }

    #[test]
    fn test_non_regexp_prefix() {
        assert_eq!(non_regexp_prefix("metric.name"), "metric");
        assert_eq!(non_regexp_prefix("__name__=.*cpu"), "__name__=");
        assert_eq!(non_regexp_prefix("__name__=cpu|mem"), "__name__=");
        assert_eq!(non_regexp_prefix("plain_value"), "plain_value");
        assert_eq!(non_regexp_prefix("key=value$"), "key=value");
        // trailing bar has nothing to anchor, no backtrack
        assert_eq!(non_regexp_prefix("ab|"), "ab");
    }

    #[test]
    fn test_clear_glob() {
        let table = [
            ("a.{a,b}.te{s}t.b", "a.{a,b}.test.b"),
            ("a.{a,b}.te{s,t}*.b", "a.{a,b}.te{s,t}*.b"),
            ("a.{a,b}.test*.b", "a.{a,b}.test*.b"),
            ("a.[b].te{s}t.b", "a.b.test.b"),
            ("a.[ab].te{s,t}*.b", "a.[ab].te{s,t}*.b"),
        ];
        for (query, want) in table {
            assert_eq!(clear_glob(query), want, "{query}");
        }
    }

    #[test]
    fn test_clear_glob_unclosed() {
        assert_eq!(clear_glob("a.{b"), "a.{b");
        assert_eq!(clear_glob("a.[b"), "a.[b");
    }

    #[test]
    fn test_glob_expand_simple() {
        let mut out = Vec::new();
        glob_expand_simple("S{a,b,c}E", "", &mut out).unwrap();
        assert_eq!(out, vec!["SaE", "SbE", "ScE"]);

        let mut out = Vec::new();
        glob_expand_simple("x{1,2}y{a,b}", "", &mut out).unwrap();
        assert_eq!(out, vec!["x1ya", "x1yb", "x2ya", "x2yb"]);

        let mut out = Vec::new();
        glob_expand_simple("plain", "pfx.", &mut out).unwrap();
        assert_eq!(out, vec!["pfx.plain"]);
    }

    #[test]
    fn test_glob_expand_simple_malformed() {
        for bad in ["m{in,ax", "m}in", "m{}x", "a{b{c}}"] {
            let mut out = Vec::new();
            assert!(glob_expand_simple(bad, "", &mut out).is_err(), "{bad}");
        }
    }
}
