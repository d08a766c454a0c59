//! ClickHouse HTTP transport
//!
//! The finders talk to the store through the [`ChClient`] trait; the
//! production implementation POSTs SQL over HTTP with per-query ids and
//! progress headers and maps responses onto the crate's error kinds. The
//! transport does not retry; callers see the first failure.

pub mod stub;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Per-call timeouts.
#[derive(Debug, Clone)]
pub struct Options {
    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Whole-request timeout, connect included
    pub data_timeout: Duration,
}

impl Options {
    /// Timeouts from the store configuration section.
    pub fn from_config(ch: &crate::config::ClickHouse) -> Self {
        Self {
            connect_timeout: Duration::from_secs(ch.connect_timeout_sec),
            data_timeout: Duration::from_secs(ch.data_timeout_sec),
        }
    }
}

/// Identification carried with each query for logs and the store's
/// `query_id` parameter.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Originating request id (or background-task name)
    pub request_id: String,

    /// Table the query targets, for logging
    pub table: String,
}

impl QueryContext {
    /// Context for a client-originated request.
    pub fn new(request_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            table: table.into(),
        }
    }

    /// Context for a background task.
    pub fn background(task: &str, table: &str) -> Self {
        Self::new(task, table)
    }
}

/// A successful store response.
#[derive(Debug, Default)]
pub struct ChResponse {
    /// Raw response body
    pub body: Vec<u8>,

    /// Rows the store read, from the summary header
    pub read_rows: u64,

    /// Bytes the store read, from the summary header
    pub read_bytes: u64,
}

/// Store query interface the finders depend on.
#[async_trait]
pub trait ChClient: Send + Sync {
    /// Run one SQL query and return the raw body plus read statistics.
    async fn query(&self, ctx: &QueryContext, sql: &str, opts: &Options) -> Result<ChResponse>;
}

/// HTTP implementation of [`ChClient`].
pub struct HttpClient {
    dsn: String,
    client: reqwest::Client,
}

impl HttpClient {
    /// Build a client for the given DSN with the configured connect
    /// timeout baked in.
    pub fn new(dsn: impl Into<String>, opts: &Options) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(opts.connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            dsn: dsn.into(),
            client,
        })
    }
}

/// Flatten SQL to a single log line.
fn format_sql(q: &str) -> String {
    q.split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shorten very long SQL for logging: head, marker, tail.
fn sql_for_logger(q: &str) -> String {
    if q.len() <= 500 {
        return format_sql(q);
    }
    let head = &q[..395];
    let tail = &q[q.len() - 100..];
    format_sql(&format!("{head}<...>{tail}"))
}

/// Parse the `X-Clickhouse-Summary` header values into read counters.
fn parse_summary(header: &str) -> (u64, u64) {
    let Ok(summary) = serde_json::from_str::<std::collections::HashMap<String, String>>(header)
    else {
        return (0, 0);
    };
    let get = |key: &str| {
        summary
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    };
    (get("read_rows"), get("read_bytes"))
}

/// Map a non-200 response onto an error kind.
fn response_error(status: u16, body: &str) -> Error {
    if body.contains("Limit for ") {
        return Error::LimitExceeded(body.to_string());
    }
    if status == 500 && body.starts_with("Code: 170") {
        // distributed table points at a cluster the store does not know
        return Error::UpstreamUnavailable(body.to_string());
    }
    Error::UpstreamError {
        status,
        message: body.to_string(),
    }
}

#[async_trait]
impl ChClient for HttpClient {
    async fn query(&self, ctx: &QueryContext, sql: &str, opts: &Options) -> Result<ChResponse> {
        let mut url = url::Url::parse(&self.dsn)
            .map_err(|e| Error::Config(format!("bad store dsn: {e}")))?;

        let nonce: u64 = rand::random();
        url.query_pairs_mut()
            .append_pair("query_id", &format!("{}::{:016x}", ctx.request_id, nonce))
            .append_pair("send_progress_in_http_headers", "1")
            .append_pair("http_headers_progress_interval_ms", "10000");

        let start = std::time::Instant::now();
        let logged_sql = sql_for_logger(sql);

        let result = self
            .client
            .post(url)
            .timeout(opts.data_timeout)
            .body(sql.to_string())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(table = %ctx.table, query = %logged_sql, error = %e, "query");
                crate::metrics::UPSTREAM_QUERIES
                    .with_label_values(&[&ctx.table, "error"])
                    .inc();
                return Err(if e.is_timeout() {
                    Error::UpstreamTimeout(e.to_string())
                } else {
                    // connect refused, reset, DNS failure
                    Error::UpstreamUnavailable(e.to_string())
                });
            }
        };

        let status = response.status().as_u16();
        let summary = response
            .headers()
            .get("X-Clickhouse-Summary")
            .and_then(|v| v.to_str().ok())
            .map(parse_summary)
            .unwrap_or((0, 0));

        let body = response.bytes().await.map_err(|e| {
            error!(table = %ctx.table, query = %logged_sql, error = %e, "query");
            if e.is_timeout() {
                Error::UpstreamTimeout(e.to_string())
            } else {
                Error::UpstreamUnavailable(e.to_string())
            }
        })?;

        if status != 200 {
            let text = String::from_utf8_lossy(&body).into_owned();
            error!(table = %ctx.table, query = %logged_sql, status, "query");
            crate::metrics::UPSTREAM_QUERIES
                .with_label_values(&[&ctx.table, "error"])
                .inc();
            return Err(response_error(status, &text));
        }

        // Some errors stream back inside a 200 response.
        if body.starts_with(b"Code: 170") {
            crate::metrics::UPSTREAM_QUERIES
                .with_label_values(&[&ctx.table, "error"])
                .inc();
            return Err(Error::UpstreamUnavailable(
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        debug!(
            table = %ctx.table,
            query = %logged_sql,
            elapsed = ?start.elapsed(),
            read_rows = summary.0,
            read_bytes = summary.1,
            "query"
        );
        crate::metrics::UPSTREAM_QUERIES
            .with_label_values(&[&ctx.table, "ok"])
            .inc();

        Ok(ChResponse {
            body: body.to_vec(),
            read_rows: summary.0,
            read_bytes: summary.1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sql() {
        assert_eq!(format_sql("SELECT 1\n  FROM t\n"), "SELECT 1 FROM t ");
    }

    #[test]
    fn test_sql_for_logger_truncates() {
        let long = "x".repeat(1000);
        let logged = sql_for_logger(&long);
        assert!(logged.contains("<...>"));
        assert_eq!(logged.len(), 395 + 5 + 100);

        let short = "SELECT 1";
        assert_eq!(sql_for_logger(short), "SELECT 1");
    }

    #[test]
    fn test_parse_summary() {
        let (rows, bytes) =
            parse_summary(r#"{"read_rows":"120","read_bytes":"4096","written_rows":"0"}"#);
        assert_eq!(rows, 120);
        assert_eq!(bytes, 4096);

        assert_eq!(parse_summary("not json"), (0, 0));
    }

    #[test]
    fn test_response_error_mapping() {
        assert!(matches!(
            response_error(500, "Limit for rows exceeded"),
            Error::LimitExceeded(_)
        ));
        assert!(matches!(
            response_error(500, "Code: 170, e.displayText() = DB::Exception: cluster not found"),
            Error::UpstreamUnavailable(_)
        ));
        assert!(matches!(
            response_error(502, "bad gateway"),
            Error::UpstreamError { status: 502, .. }
        ));
        assert!(matches!(
            response_error(400, "syntax error"),
            Error::UpstreamError { status: 400, .. }
        ));
    }
}
