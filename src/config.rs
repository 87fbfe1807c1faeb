use figment::{
    providers::{Env, Format, Toml, Yaml},
    Figment,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::devices::{total_devices, MAX_DEVICES};

/// Placeholder substituted with the device id in operation URL templates.
pub const DEVICE_ID_PLACEHOLDER: &str = "{device_id}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] Box<figment::Error>),
    #[error("invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub devices: DevicesConfig,
    #[validate(nested)]
    pub authenticate: AuthConfig,
    #[validate(nested)]
    pub gpv: Option<OperationConfig>,
    #[validate(nested)]
    pub spv: Option<OperationConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub runner: RunnerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DevicesConfig {
    #[validate(length(min = 1))]
    pub prefix: String,
    #[serde(default)]
    #[validate(custom(function = "validate_device_ranges"))]
    pub ranges: Vec<DeviceRange>,
}

/// Inclusive range of device numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct DeviceRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AuthConfig {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent form-encoded.
    #[serde(default)]
    pub payload: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_token_field")]
    #[validate(length(min = 1))]
    pub token_field: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OperationConfig {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent as the JSON request body.
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RunnerConfig {
    #[serde(default = "default_workers")]
    #[validate(range(min = 1))]
    pub workers: usize,
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reauth_every")]
    #[validate(range(min = 1))]
    pub reauth_every: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl RunnerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            request_timeout_secs: default_request_timeout_secs(),
            reauth_every: default_reauth_every(),
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SinkConfig {
    #[serde(default = "default_sink_url")]
    #[validate(url)]
    pub url: String,
    #[serde(default = "default_sink_org")]
    pub org: String,
    #[serde(default = "default_sink_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            org: default_sink_org(),
            bucket: default_sink_bucket(),
            token: None,
        }
    }
}

fn validate_device_ranges(ranges: &[DeviceRange]) -> Result<(), ValidationError> {
    if total_devices(ranges) > MAX_DEVICES {
        return Err(ValidationError::new("too_many_devices"));
    }
    Ok(())
}

fn default_sink_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_sink_org() -> String {
    "vz".to_string()
}

fn default_sink_bucket() -> String {
    "APIcall".to_string()
}

fn default_token_field() -> String {
    "access_token".to_string()
}

/// Same sizing rule as a default thread pool executor: `min(32, cpus + 4)`.
fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(32)
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_reauth_every() -> u64 {
    100
}

impl Config {
    /// Loads the config file (YAML, or TOML when the extension says so) and
    /// layers `LOADGEN__SECTION__KEY` and `INFLUXDB_TOKEN` from the environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let figment = if is_toml {
            Figment::new().merge(Toml::file(path))
        } else {
            Figment::new().merge(Yaml::file(path))
        };

        let cfg: Config = with_env(figment)
            .extract()
            .map_err(|source| ConfigError::Load {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses an inline YAML document with the same environment layering as
    /// [`Config::load`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: Config = with_env(Figment::new().merge(Yaml::string(yaml)))
            .extract()
            .map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Number of configured operations each device runs.
    pub fn operations_per_device(&self) -> usize {
        usize::from(self.gpv.is_some()) + usize::from(self.spv.is_some())
    }
}

fn with_env(figment: Figment) -> Figment {
    figment
        .merge(Env::prefixed("LOADGEN__").split("__"))
        .merge(
            Env::raw()
                .only(&["INFLUXDB_TOKEN"])
                .map(|_| "sink.token".into()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const MINIMAL: &str = r#"
devices:
  prefix: "DEV"
  ranges:
    - { start: 1, end: 3 }
authenticate:
  url: "https://api.example.com/oauth/token"
  payload:
    grant_type: password
    client_id: 42
gpv:
  url: "https://api.example.com/devices/{device_id}/gpv"
  headers:
    Content-Type: application/json
  payload:
    parameters: ["Device.DeviceInfo.SoftwareVersion"]
"#;

    const MINIMAL_TOML: &str = r#"
[devices]
prefix = "DEV"
ranges = [{ start = 1, end = 3 }]

[authenticate]
url = "https://api.example.com/oauth/token"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        Jail::expect_with(|_| {
            let cfg = Config::from_yaml_str(MINIMAL).unwrap();

            assert_eq!(cfg.devices.prefix, "DEV");
            assert_eq!(cfg.devices.ranges, vec![DeviceRange { start: 1, end: 3 }]);
            assert_eq!(cfg.authenticate.token_field, "access_token");
            assert_eq!(cfg.runner.reauth_every, 100);
            assert_eq!(cfg.runner.request_timeout(), Duration::from_secs(30));
            assert!(cfg.runner.workers >= 1 && cfg.runner.workers <= 32);
            assert!(!cfg.runner.accept_invalid_certs);
            assert_eq!(cfg.sink.bucket, "APIcall");
            assert!(cfg.spv.is_none());
            assert_eq!(cfg.operations_per_device(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_payloads_keep_their_shape() {
        let cfg = Config::from_yaml_str(MINIMAL).unwrap();
        let gpv = cfg.gpv.unwrap();

        assert_eq!(
            gpv.payload,
            serde_json::json!({ "parameters": ["Device.DeviceInfo.SoftwareVersion"] })
        );
        assert_eq!(
            cfg.authenticate.payload.get("client_id"),
            Some(&serde_json::json!(42))
        );
        assert!(gpv.url.contains(DEVICE_ID_PLACEHOLDER));
    }

    #[test]
    fn test_empty_prefix_is_rejected() {
        let yaml = MINIMAL.replace("prefix: \"DEV\"", "prefix: \"\"");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        Jail::expect_with(|_| {
            let yaml = format!("{MINIMAL}runner:\n  workers: 0\n");
            let err = Config::from_yaml_str(&yaml).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_oversized_ranges_are_rejected() {
        let yaml = MINIMAL.replace(
            "{ start: 1, end: 3 }",
            "{ start: 0, end: 18446744073709551615 }",
        );
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("cfg.yaml", MINIMAL)?;
            let cfg = Config::load("cfg.yaml").unwrap();
            assert_eq!(cfg.devices.prefix, "DEV");
            assert!(cfg.gpv.is_some());
            assert_eq!(cfg.sink.token, None);
            Ok(())
        });
    }

    #[test]
    fn test_load_toml_file_by_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("cfg.toml", MINIMAL_TOML)?;
            let cfg = Config::load("cfg.toml").unwrap();
            assert_eq!(cfg.devices.ranges, vec![DeviceRange { start: 1, end: 3 }]);
            assert_eq!(cfg.operations_per_device(), 0);
            Ok(())
        });
    }

    #[test]
    fn test_influx_token_without_sink_section_keeps_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("cfg.toml", MINIMAL_TOML)?;
            jail.set_env("INFLUXDB_TOKEN", "tok-123");
            jail.set_env("LOADGEN__RUNNER__WORKERS", 7);

            let cfg = Config::load("cfg.toml").unwrap();
            assert_eq!(cfg.sink.token.as_deref(), Some("tok-123"));
            assert_eq!(cfg.sink.url, "http://localhost:8086");
            assert_eq!(cfg.sink.org, "vz");
            assert_eq!(cfg.sink.bucket, "APIcall");
            assert_eq!(cfg.runner.workers, 7);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file_values() {
        Jail::expect_with(|jail| {
            let yaml = format!("{MINIMAL}sink:\n  org: from-file\n  bucket: from-file\n");
            jail.create_file("cfg.yaml", &yaml)?;
            jail.set_env("LOADGEN__SINK__ORG", "from-env");
            jail.set_env("LOADGEN__RUNNER__REAUTH_EVERY", 250);

            let cfg = Config::load("cfg.yaml").unwrap();
            assert_eq!(cfg.sink.org, "from-env");
            assert_eq!(cfg.sink.bucket, "from-file");
            assert_eq!(cfg.runner.reauth_every, 250);
            Ok(())
        });
    }

    #[test]
    fn test_dotenv_does_not_override_process_env() {
        Jail::expect_with(|jail| {
            jail.create_file("cfg.yaml", MINIMAL)?;
            jail.create_file(".env", "INFLUXDB_TOKEN=from-dotenv\n")?;
            jail.set_env("INFLUXDB_TOKEN", "from-shell");

            dotenvy::from_path(jail.directory().join(".env")).unwrap();
            let cfg = Config::load("cfg.yaml").unwrap();
            assert_eq!(cfg.sink.token.as_deref(), Some("from-shell"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        Jail::expect_with(|_| {
            let err = Config::load("absent.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Load { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_missing_auth_section_is_a_parse_error() {
        let yaml = "devices:\n  prefix: DEV\n  ranges: []\n";
        let err = Config::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
