//! Dotted-path reversal
//!
//! Reverse-indexed tables store paths with their dot-separated segments in
//! reverse order so that queries with leading wildcards become
//! prefix-anchored. Tagged metrics carry a `?key=value` or `;key=value`
//! tail; only the metric name in front of the first marker is reversed.

/// Reverse the dot-separated segments of a plain path.
pub fn reverse(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('.').collect();
    segments.reverse();
    segments.join(".")
}

/// Reverse a path, leaving any tag tail (`?...` / `;...`) untouched.
pub fn reverse_no_tag(path: &str) -> String {
    match path.find(['?', ';']) {
        Some(i) => {
            let mut out = reverse(&path[..i]);
            out.push_str(&path[i..]);
            out
        }
        None => reverse(path),
    }
}

/// Byte-level variant of [`reverse_no_tag`] for rows read off the wire.
pub fn reverse_bytes_no_tag(path: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(path) {
        Ok(s) => reverse_no_tag(s).into_bytes(),
        // Not valid UTF-8: reverse raw byte segments, no tag detection.
        Err(_) => {
            let mut segments: Vec<&[u8]> = path.split(|&b| b == b'.').collect();
            segments.reverse();
            segments.join(&b'.')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse() {
        let table = [
            (
                "carbon.agents.carbon-clickhouse.graphite1.tcp.metricsReceived",
                "metricsReceived.tcp.graphite1.carbon-clickhouse.agents.carbon",
            ),
            ("", ""),
            (".", "."),
            ("carbon..xx", "xx..carbon"),
            (".hello..world.", ".world..hello."),
        ];
        for (path, want) in table {
            assert_eq!(reverse(path), want, "{path:?}");
            assert_eq!(reverse_no_tag(path), want, "{path:?}");
            assert_eq!(
                reverse_bytes_no_tag(path.as_bytes()),
                want.as_bytes(),
                "{path:?}"
            );
        }
    }

    #[test]
    fn test_reverse_round_trips() {
        for path in ["a.b.c", "one", "x..y", "a.b.c.d.e.f"] {
            assert_eq!(reverse(&reverse(path)), path);
        }
    }

    #[test]
    fn test_reverse_no_tag_keeps_tags() {
        assert_eq!(
            reverse_no_tag("metric_name?label=value"),
            "metric_name?label=value"
        );
        assert_eq!(reverse_no_tag("a.b.c?env=prod"), "c.b.a?env=prod");
        assert_eq!(reverse_no_tag("a.b.c;tag=v"), "c.b.a;tag=v");
    }
}
