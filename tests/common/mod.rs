#![allow(dead_code)]
use async_trait::async_trait;
use device_loadgen::config::Config;
use device_loadgen::sink::{MetricsSink, Point, SinkError};
use parking_lot::Mutex;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Keeps every point written to it.
#[derive(Default)]
pub struct RecordingSink {
    points: Mutex<Vec<Point>>,
}

impl RecordingSink {
    pub fn points(&self) -> Vec<Point> {
        self.points.lock().clone()
    }

    pub fn measurement(&self, name: &str) -> Vec<Point> {
        self.points()
            .into_iter()
            .filter(|p| p.measurement() == name)
            .collect()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn write(&self, point: Point) -> Result<(), SinkError> {
        self.points.lock().push(point);
        Ok(())
    }
}

/// Rejects every write.
pub struct FailingSink;

#[async_trait]
impl MetricsSink for FailingSink {
    async fn write(&self, _point: Point) -> Result<(), SinkError> {
        Err(SinkError::Rejected {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

pub struct Scenario {
    pub ranges: &'static str,
    pub gpv: bool,
    pub spv: bool,
    pub workers: usize,
    pub reauth_every: u64,
    pub timeout_secs: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            ranges: "[{ start: 1, end: 3 }]",
            gpv: true,
            spv: false,
            workers: 4,
            reauth_every: 100,
            timeout_secs: 5,
        }
    }
}

impl Scenario {
    pub fn config(&self, server: &MockServer) -> Config {
        let uri = server.uri();
        let mut yaml = format!(
            r#"
devices:
  prefix: "DEV"
  ranges: {ranges}
authenticate:
  url: "{uri}/oauth/token"
  headers:
    Accept: application/json
  payload:
    grant_type: password
    username: loadgen
    password: secret
runner:
  workers: {workers}
  reauth_every: {reauth}
  request_timeout_secs: {timeout}
"#,
            ranges = self.ranges,
            workers = self.workers,
            reauth = self.reauth_every,
            timeout = self.timeout_secs,
        );
        if self.gpv {
            yaml.push_str(&format!(
                r#"
gpv:
  url: "{uri}/devices/{{device_id}}/gpv"
  headers:
    Content-Type: application/json
  payload:
    parameterNames: ["Device.DeviceInfo.SoftwareVersion"]
"#
            ));
        }
        if self.spv {
            yaml.push_str(&format!(
                r#"
spv:
  url: "{uri}/devices/{{device_id}}/spv"
  headers:
    Content-Type: application/json
  payload:
    parameterValues: [["Device.WiFi.SSID.1.SSID", "lab", "xsd:string"]]
"#
            ));
        }
        Config::from_yaml_str(&yaml).expect("scenario config")
    }
}

pub async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": token })))
        .mount(server)
        .await;
}
