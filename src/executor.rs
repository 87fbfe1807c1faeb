//! Single HTTP call with timing.

use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Network-level failure of a call that never produced a full response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Body(_) => "body",
            TransportError::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Timings of one completed call.
///
/// `ttfb` runs until the status line and headers arrive, `latency` until the
/// body is fully read, and `response_time` is the difference: the time spent
/// transferring the body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallTiming {
    pub latency: Duration,
    pub ttfb: Duration,
    pub response_time: Duration,
}

impl CallTiming {
    pub fn new(ttfb: Duration, latency: Duration) -> Self {
        Self {
            latency,
            ttfb,
            response_time: latency.saturating_sub(ttfb),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Completed { status: u16, timing: CallTiming },
    Transport(TransportError),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Completed { status: 200, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CallOutcome::Completed { status, .. } => Some(*status),
            CallOutcome::Transport(_) => None,
        }
    }

    /// Timings worth recording: only calls answered with exactly 200.
    pub fn success_timing(&self) -> Option<&CallTiming> {
        match self {
            CallOutcome::Completed { status: 200, timing } => Some(timing),
            _ => None,
        }
    }
}

/// Sends JSON `POST`s through one shared connection pool.
#[derive(Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
}

impl RequestExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client used for the target API: per-call timeout covering the whole
    /// request, optional certificate verification bypass.
    pub fn build_client(timeout: Duration, accept_invalid_certs: bool) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
    }

    pub async fn perform_request(
        &self,
        url: &str,
        headers: HeaderMap,
        payload: &serde_json::Value,
    ) -> CallOutcome {
        let start = Instant::now();
        let resp = match self
            .client
            .post(url)
            .headers(headers)
            .json(payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return CallOutcome::Transport(e.into()),
        };
        let ttfb = start.elapsed();
        let status = resp.status().as_u16();

        if let Err(e) = resp.bytes().await {
            return CallOutcome::Transport(e.into());
        }
        let timing = CallTiming::new(ttfb, start.elapsed());
        debug!(%url, status, latency_s = timing.latency.as_secs_f64(), "call completed");

        CallOutcome::Completed { status, timing }
    }
}
