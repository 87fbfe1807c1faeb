//! Concurrent GPV/SPV load generator.
//!
//! Logs in against a device-management API, expands the configured device id
//! ranges, runs the configured read (`gpv`) and write (`spv`) calls for every
//! device on a bounded worker pool, and writes one time-series point per call
//! plus a `device_count` summary point.
//!
//! ```bash
//! INFLUXDB_TOKEN=... device-loadgen --config cfg.yaml
//! device-loadgen --config cfg.yaml --dry-run --output summary.json
//! ```

pub mod auth;
pub mod config;
pub mod devices;
pub mod executor;
pub mod operations;
pub mod orchestrator;
pub mod report;
pub mod sink;
pub mod stats;
pub mod telemetry;

pub use config::Config;
pub use orchestrator::{Orchestrator, RunError, RunPhase};
pub use stats::RunSummary;
