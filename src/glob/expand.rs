//! Bounded glob expansion
//!
//! Parses a Graphite pattern into an ordered list of expression nodes and
//! enumerates the concrete strings the pattern stands for, capped by `max`
//! (total emitted strings) and `depth` (dot-segments from the left that may
//! hold expanding constructs). When a bound would be exceeded the expansion
//! fails open: the caller gets the single, still-correct unexpanded pattern
//! and compiles it as a plain glob instead.
//!
//! A `*` or `?` terminates expansion; everything from the first such
//! wildcard to the end of the pattern is carried as one opaque tail node.

use super::clear_glob;

/// One parsed expression node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    /// Fixed text between expanding constructs
    Literal(String),

    /// `{a,b,...}` alternation, alternatives in written order
    List(Vec<String>),

    /// `[a-z]` character class, sorted and deduplicated
    Runes(Vec<char>),

    /// Tail from the first `*`/`?` (or a downgraded construct) to the end;
    /// nothing past it is expanded
    Wildcard(String),
}

impl Node {
    fn count(&self) -> usize {
        match self {
            Node::Literal(_) | Node::Wildcard(_) => 1,
            Node::List(items) => items.len(),
            Node::Runes(chars) => chars.len(),
        }
    }
}

/// Outcome of [`expand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// The pattern was fully enumerated within bounds.
    Expanded(Vec<String>),

    /// Bounds were exceeded or the pattern does not expand cleanly; the
    /// contained pattern is to be compiled as-is.
    FailOpen(String),
}

impl Expansion {
    /// The concrete patterns to compile, whichever way expansion went.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Expansion::Expanded(v) => v,
            Expansion::FailOpen(p) => vec![p],
        }
    }

    /// True when the pattern survived expansion within bounds.
    pub fn is_expanded(&self) -> bool {
        matches!(self, Expansion::Expanded(_))
    }
}

/// Expand `pattern` into concrete strings.
///
/// `max < 0` disables expansion entirely. `depth <= 0` places no limit on
/// how deep (in dot-segments) expanding constructs may sit. With
/// `try_first`, only the first alternative of each node is enumerated; this
/// is the cheap probe the index finder uses before committing to a reverse
/// rewrite.
pub fn expand(pattern: &str, max: i64, depth: i64, try_first: bool) -> Expansion {
    if max < 0 {
        return Expansion::FailOpen(clear_glob(pattern));
    }

    let nodes = match parse(pattern) {
        Ok(nodes) => nodes,
        // Invalid runes range or escape: the raw pattern is used untouched.
        Err(()) => return Expansion::FailOpen(pattern.to_string()),
    };

    let mut count: u64 = 1;
    for node in &nodes {
        count = count.saturating_mul(node.count() as u64);
    }
    if count > max as u64 {
        return Expansion::FailOpen(clear_glob(pattern));
    }

    if depth > 0 {
        let mut offset = 0;
        for node in &nodes {
            let segment = pattern[..offset].matches('.').count() as i64;
            if matches!(node, Node::List(_) | Node::Runes(_)) && segment >= depth {
                return Expansion::FailOpen(clear_glob(pattern));
            }
            offset += node_source_len(pattern, offset, node);
        }
    }

    Expansion::Expanded(enumerate(&nodes, try_first))
}

/// Length of the pattern text a node was parsed from, counted from `offset`.
fn node_source_len(pattern: &str, offset: usize, node: &Node) -> usize {
    match node {
        Node::Literal(s) => s.len(),
        Node::Wildcard(s) => s.len(),
        // Constructs run to their closing delimiter.
        Node::List(_) => pattern[offset..].find('}').map_or(0, |e| e + 1),
        Node::Runes(_) => pattern[offset..].find(']').map_or(0, |e| e + 1),
    }
}

fn parse(pattern: &str) -> std::result::Result<Vec<Node>, ()> {
    let mut nodes = Vec::new();
    let mut literal = String::new();
    let mut rest = pattern;

    fn flush(nodes: &mut Vec<Node>, literal: &mut String) {
        if !literal.is_empty() {
            nodes.push(Node::Literal(std::mem::take(literal)));
        }
    }

    while let Some(pos) = rest.find(['{', '[', '*', '?']) {
        literal.push_str(&rest[..pos]);
        let marker = rest.as_bytes()[pos];
        rest = &rest[pos..];

        match marker {
            b'*' | b'?' => {
                flush(&mut nodes, &mut literal);
                nodes.push(Node::Wildcard(rest.to_string()));
                return Ok(nodes);
            }
            b'{' => match rest[1..].find('}') {
                Some(end) if !rest[1..end + 1].contains('{') => {
                    let items: Vec<String> =
                        rest[1..end + 1].split(',').map(str::to_string).collect();
                    if items.iter().any(|i| super::has_wildcard(i)) {
                        // Alternatives with nested wildcards do not expand;
                        // the whole tail is one opaque glob.
                        flush(&mut nodes, &mut literal);
                        nodes.push(Node::Wildcard(rest.to_string()));
                        return Ok(nodes);
                    }
                    flush(&mut nodes, &mut literal);
                    nodes.push(Node::List(items));
                    rest = &rest[end + 2..];
                }
                // Unclosed or nested brace downgrades to a wildcard tail.
                _ => {
                    flush(&mut nodes, &mut literal);
                    nodes.push(Node::Wildcard(rest.to_string()));
                    return Ok(nodes);
                }
            },
            b'[' => match rest[1..].find(']') {
                Some(end) => {
                    let chars = parse_runes(&rest[1..end + 1])?;
                    flush(&mut nodes, &mut literal);
                    nodes.push(Node::Runes(chars));
                    rest = &rest[end + 2..];
                }
                None => {
                    flush(&mut nodes, &mut literal);
                    nodes.push(Node::Wildcard(rest.to_string()));
                    return Ok(nodes);
                }
            },
            _ => unreachable!(),
        }
    }

    literal.push_str(rest);
    flush(&mut nodes, &mut literal);
    Ok(nodes)
}

/// Parse the inside of a `[...]` class into a sorted, deduplicated rune set.
/// Overlapping ranges merge naturally (`[a-cb-d]` enumerates as `a..=d`).
///
/// Errors on an empty class, a backslash escape, a reversed range, or a
/// range whose endpoints have different UTF-8 widths (`Я-你`).
fn parse_runes(class: &str) -> std::result::Result<Vec<char>, ()> {
    if class.is_empty() || class.contains('\\') {
        return Err(());
    }

    let mut chars: Vec<char> = Vec::new();
    let mut iter = class.chars().peekable();
    while let Some(c) = iter.next() {
        if iter.peek() == Some(&'-') {
            let mut ahead = iter.clone();
            ahead.next(); // the dash
            if let Some(end) = ahead.next() {
                if end.len_utf8() != c.len_utf8() || (end as u32) < (c as u32) {
                    return Err(());
                }
                for r in (c as u32)..=(end as u32) {
                    if let Some(ch) = char::from_u32(r) {
                        chars.push(ch);
                    }
                }
                iter = ahead;
                continue;
            }
            // trailing dash is a literal
        }
        chars.push(c);
    }

    chars.sort_unstable();
    chars.dedup();
    Ok(chars)
}

fn enumerate(nodes: &[Node], try_first: bool) -> Vec<String> {
    let mut results = vec![String::new()];
    for node in nodes {
        match node {
            Node::Literal(s) | Node::Wildcard(s) => {
                for r in &mut results {
                    r.push_str(s);
                }
            }
            Node::List(items) => {
                results = product(results, items.iter().map(String::as_str), try_first);
            }
            Node::Runes(chars) => {
                let items: Vec<String> = chars.iter().map(|c| c.to_string()).collect();
                results = product(results, items.iter().map(String::as_str), try_first);
            }
        }
    }
    results
}

/// Cross every accumulated prefix with each alternative, prefixes varying
/// slowest so output order follows node order.
fn product<'a>(
    prefixes: Vec<String>,
    alternatives: impl Iterator<Item = &'a str> + Clone,
    try_first: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    for prefix in &prefixes {
        for alt in alternatives.clone() {
            out.push(format!("{prefix}{alt}"));
            if try_first {
                break;
            }
        }
    }
    out
}
