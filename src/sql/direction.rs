//! Index direction planner
//!
//! Decides whether a query runs against the forward or the reverse-indexed
//! table. User rules are checked first, in order, first match wins; a query
//! still `Auto` after the rules falls back to the wildcard-position
//! heuristic: when the wildcards sit closer to the front than to the back,
//! reversal turns them into a prefix-anchored pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::glob::{index_last_wildcard, index_wildcard};

/// Which physical table a query is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Decide per query from rules and wildcard positions
    #[default]
    Auto,
    /// Always the forward table
    Direct,
    /// Always the reverse table
    Reversed,
}

/// One user rule routing matching queries to a fixed direction.
///
/// Every non-empty field must match for the rule to apply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IndexReverseRule {
    /// Query must start with this prefix
    #[serde(default)]
    pub prefix: String,

    /// Query must end with this suffix
    #[serde(default)]
    pub suffix: String,

    /// Query must match this regex
    #[serde(default, rename = "regex")]
    pub regex_str: String,

    #[serde(skip)]
    compiled: Option<Regex>,

    /// Direction the rule assigns
    #[serde(rename = "reverse")]
    pub direction: Direction,
}

impl IndexReverseRule {
    fn matches(&self, query: &str) -> bool {
        if !self.prefix.is_empty() && !query.starts_with(&self.prefix) {
            return false;
        }
        if !self.suffix.is_empty() && !query.ends_with(&self.suffix) {
            return false;
        }
        if let Some(re) = &self.compiled {
            if !re.is_match(query) {
                return false;
            }
        }
        true
    }
}

/// Ordered rule list from configuration.
pub type IndexReverses = Vec<IndexReverseRule>;

/// Compile the regex fields of a rule list; call once after loading config.
pub fn compile_rules(rules: &mut IndexReverses) -> Result<()> {
    for rule in rules.iter_mut() {
        if !rule.regex_str.is_empty() {
            rule.compiled = Some(
                Regex::new(&rule.regex_str)
                    .map_err(|e| Error::Config(format!("index-reverses regex: {e}")))?,
            );
        }
    }
    Ok(())
}

/// Apply the rules in order; the first matching rule replaces `direction`.
pub fn check_reverses(query: &str, direction: Direction, rules: &IndexReverses) -> Direction {
    for rule in rules {
        if rule.matches(query) {
            return rule.direction;
        }
    }
    direction
}

/// Final routing decision for one query.
pub fn use_reverse(query: &str, direction: Direction, rules: &IndexReverses) -> bool {
    match direction {
        Direction::Direct => false,
        Direction::Reversed => true,
        Direction::Auto => {
            let ruled = check_reverses(query, Direction::Auto, rules);
            if ruled != Direction::Auto {
                return use_reverse(query, ruled, rules);
            }

            let Some(w) = index_wildcard(query) else {
                return false;
            };
            let first_wildcard_node = query[..w].matches('.').count();

            // index_wildcard returned Some, so the last one exists too
            let w = index_last_wildcard(query).unwrap_or(0);
            let last_wildcard_node = query[w..].matches('.').count();

            first_wildcard_node < last_wildcard_node
        }
    }
}
