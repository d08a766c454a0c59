//! In-memory store stub
//!
//! A [`ChClient`] that records every SQL statement it receives and serves
//! queued responses. Used by unit and integration tests that exercise the
//! finders end to end without a running store.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::transport::{ChClient, ChResponse, Options, QueryContext};

/// Recording stub client.
#[derive(Default)]
pub struct StubClient {
    queries: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Result<ChResponse>>>,
    default_body: Vec<u8>,
}

impl StubClient {
    /// Stub answering every query with an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub answering every query with `body` unless responses are queued.
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            default_body: body.into(),
            ..Default::default()
        }
    }

    /// Queue one successful response.
    pub fn push_body(&self, body: impl Into<Vec<u8>>) {
        self.responses.lock().push_back(Ok(ChResponse {
            body: body.into(),
            ..Default::default()
        }));
    }

    /// Queue one failure.
    pub fn push_error(&self, error: Error) {
        self.responses.lock().push_back(Err(error));
    }

    /// All SQL statements seen so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    /// The most recent SQL statement, if any.
    pub fn last_query(&self) -> Option<String> {
        self.queries.lock().last().cloned()
    }
}

#[async_trait]
impl ChClient for StubClient {
    async fn query(&self, _ctx: &QueryContext, sql: &str, _opts: &Options) -> Result<ChResponse> {
        self.queries.lock().push(sql.to_string());
        match self.responses.lock().pop_front() {
            Some(response) => response,
            None => Ok(ChResponse {
                body: self.default_body.clone(),
                ..Default::default()
            }),
        }
    }
}
