//! Time-series sink for per-call and per-run points (InfluxDB line protocol).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SinkConfig;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink returned error: {status} - {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Formats the point as one line of line protocol with a nanosecond
    /// timestamp.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let fields = self
            .fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    FieldValue::Float(v) => format!("{v}"),
                    FieldValue::Integer(v) => format!("{v}i"),
                    FieldValue::String(v) => format!("\"{}\"", escape(v, &['"', '\\'])),
                };
                format!("{}={}", escape(key, &[',', '=', ' ']), value)
            })
            .collect::<Vec<_>>()
            .join(",");

        let ts = self.timestamp.timestamp_nanos_opt().unwrap_or_default();
        let _ = write!(line, " {fields} {ts}");
        line
    }
}

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, point: Point) -> Result<(), SinkError>;
}

/// Writes points through the InfluxDB v2 `/api/v2/write` endpoint.
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    token: String,
}

impl InfluxSink {
    pub fn new(cfg: &SinkConfig, token: String, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let write_url = format!("{}/api/v2/write", cfg.url.trim_end_matches('/'));
        let write_url = reqwest::Url::parse_with_params(
            &write_url,
            &[
                ("org", cfg.org.as_str()),
                ("bucket", cfg.bucket.as_str()),
                ("precision", "ns"),
            ],
        )
        .map(String::from)
        .unwrap_or(write_url);

        info!(url = %write_url, "writing metrics to InfluxDB");
        Ok(Self {
            client,
            write_url,
            token,
        })
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn write(&self, point: Point) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.write_url)
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(point.to_line_protocol())
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(SinkError::Rejected { status, body })
        }
    }
}

/// Logs points at debug level instead of storing them.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn write(&self, point: Point) -> Result<(), SinkError> {
        debug!(line = %point.to_line_protocol(), "metrics point");
        Ok(())
    }
}
