//! Error types for the gateway core
//!
//! One variant per failure class the planner and transport can hit, with the
//! HTTP status each one surfaces as. The planner never retries; transient
//! upstream failures are reported as-is and retrying is the caller's call.

use thiserror::Error;

/// Main error type for the gateway core
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed glob or tag expression (unclosed brace/bracket, empty list)
    #[error("bad pattern: {0}")]
    BadPattern(String),

    /// Malformed `seriesByTag(...)` call
    #[error("wrong seriesByTag call: {0:?}")]
    InvalidSeriesByTag(String),

    /// The store refused the query because a read limit was hit
    #[error("storage read limit: {0}")]
    LimitExceeded(String),

    /// Connect or data timeout talking to the store
    #[error("storage read timeout: {0}")]
    UpstreamTimeout(String),

    /// Store unreachable: DNS failure, refused, reset, or cluster
    /// misconfiguration (`Code: 170`)
    #[error("storage unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Any other non-200 response from the store
    #[error("storage response status {status}: {message}")]
    UpstreamError {
        /// HTTP status returned by the store
        status: u16,
        /// Response body (possibly truncated)
        message: String,
    },

    /// Malformed row in a store response
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error (costs store file, config file)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Logic invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error surfaces as on the gateway's own API.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::BadPattern(_) | Error::InvalidSeriesByTag(_) => 400,
            Error::LimitExceeded(_) => 403,
            Error::UpstreamTimeout(_) => 504,
            Error::UpstreamUnavailable(_) => 503,
            Error::UpstreamError { .. } => 500,
            Error::Parse(_) => 500,
            Error::Config(_) | Error::Io(_) | Error::Internal(_) => 500,
        }
    }

    /// Create a bad-pattern error
    pub fn bad_pattern(message: impl Into<String>) -> Self {
        Error::BadPattern(message.into())
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
