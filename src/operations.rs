//! GPV / SPV operation definitions and per-call point construction.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::auth::AuthToken;
use crate::config::{Config, OperationConfig, DEVICE_ID_PLACEHOLDER};
use crate::devices::DeviceId;
use crate::executor::CallOutcome;
use crate::sink::Point;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid header name `{0}`")]
    Name(String),
    #[error("invalid value for header `{0}`")]
    Value(String),
}

/// Kind of per-device call. Declaration order is execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Read ("get parameter values").
    Gpv,
    /// Write ("set parameter values").
    Spv,
}

impl OperationKind {
    /// Time-series measurement the per-call points go to.
    pub fn measurement(&self) -> &'static str {
        self.into()
    }
}

/// A configured operation with its headers parsed up front.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    url_template: String,
    headers: HeaderMap,
    payload: serde_json::Value,
}

impl Operation {
    pub fn from_config(kind: OperationKind, cfg: &OperationConfig) -> Result<Self, HeaderError> {
        Ok(Self {
            kind,
            url_template: cfg.url.clone(),
            headers: header_map(&cfg.headers)?,
            payload: cfg.payload.clone(),
        })
    }

    pub fn url_for(&self, device: &DeviceId) -> String {
        self.url_template
            .replace(DEVICE_ID_PLACEHOLDER, device.as_str())
    }

    /// Configured headers plus the bearer token; the token wins over any
    /// configured `Authorization`.
    pub fn headers_with(&self, token: &AuthToken) -> Result<HeaderMap, HeaderError> {
        let mut headers = self.headers.clone();
        let value = HeaderValue::from_str(&token.bearer())
            .map_err(|_| HeaderError::Value(AUTHORIZATION.to_string()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// The configured operations, GPV first.
pub fn operations_from_config(cfg: &Config) -> Result<Vec<Operation>, HeaderError> {
    [(OperationKind::Gpv, &cfg.gpv), (OperationKind::Spv, &cfg.spv)]
        .into_iter()
        .filter_map(|(kind, op)| op.as_ref().map(|op| Operation::from_config(kind, op)))
        .collect()
}

pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, HeaderError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| HeaderError::Name(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| HeaderError::Value(name.clone()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Point for one call: always the status (or transport error), timings only
/// for a 200.
pub fn call_point(kind: OperationKind, device: &DeviceId, outcome: &CallOutcome) -> Point {
    let point = Point::new(kind.measurement()).tag("device_id", device.as_str());
    match outcome {
        CallOutcome::Completed { status, timing } => {
            let point = point.field("status_code", i64::from(*status));
            if *status == 200 {
                point
                    .field("latency", timing.latency.as_secs_f64())
                    .field("first_byte_time", timing.ttfb.as_secs_f64())
                    .field("response_time", timing.response_time.as_secs_f64())
            } else {
                point
            }
        }
        CallOutcome::Transport(err) => point.field("transport_error", err.kind()),
    }
}
