//! Counters and samples shared by the device workers, and the frozen summary.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::devices::DeviceId;
use crate::executor::{CallOutcome, CallTiming};
use crate::operations::OperationKind;
use crate::sink::Point;

/// Timing samples in seconds, only from calls answered with 200.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    samples: Mutex<Samples>,
}

#[derive(Debug, Default, Clone)]
struct Samples {
    latency: Vec<f64>,
    first_byte_time: Vec<f64>,
    response_time: Vec<f64>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, timing: &CallTiming) {
        let mut samples = self.samples.lock();
        samples.latency.push(timing.latency.as_secs_f64());
        samples.first_byte_time.push(timing.ttfb.as_secs_f64());
        samples.response_time.push(timing.response_time.as_secs_f64());
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().latency.len()
    }

    pub fn averages(&self) -> Averages {
        let samples = self.samples.lock();
        Averages {
            samples: samples.latency.len() as u64,
            latency: mean(&samples.latency),
            first_byte_time: mean(&samples.first_byte_time),
            response_time: mean(&samples.response_time),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub samples: u64,
    pub latency: f64,
    pub first_byte_time: f64,
    pub response_time: f64,
}

/// What a failed call ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Http(u16),
    Transport(String),
}

impl std::fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStatus::Http(code) => write!(f, "{code}"),
            FailureStatus::Transport(kind) => write!(f, "transport error ({kind})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    pub device_id: DeviceId,
    pub operation: OperationKind,
    pub status: FailureStatus,
}

/// Run-wide counters updated concurrently by the workers.
#[derive(Debug, Default)]
pub struct RunStats {
    devices_processed: AtomicU64,
    device_errors: AtomicU64,
    devices_aborted: AtomicU64,
    api_calls: AtomicU64,
    api_call_errors: AtomicU64,
    sink_failures: AtomicU64,
    failures: Mutex<Vec<CallFailure>>,
    metrics: MetricsAccumulator,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one call; failures are remembered, 200s feed the accumulator.
    pub fn record_call(&self, device: &DeviceId, operation: OperationKind, outcome: &CallOutcome) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(timing) = outcome.success_timing() {
            self.metrics.record(timing);
            return;
        }

        self.api_call_errors.fetch_add(1, Ordering::Relaxed);
        let status = match outcome {
            CallOutcome::Completed { status, .. } => FailureStatus::Http(*status),
            CallOutcome::Transport(err) => FailureStatus::Transport(err.kind().to_string()),
        };
        self.failures.lock().push(CallFailure {
            device_id: device.clone(),
            operation,
            status,
        });
    }

    pub fn record_device(&self, had_error: bool) {
        self.devices_processed.fetch_add(1, Ordering::Relaxed);
        if had_error {
            self.device_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_device_aborted(&self) {
        self.devices_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> &MetricsAccumulator {
        &self.metrics
    }

    pub fn summarize(&self, devices_generated: usize, reauthentications: u64, elapsed: Duration) -> RunSummary {
        RunSummary {
            devices_generated: devices_generated as u64,
            devices_processed: self.devices_processed.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            devices_aborted: self.devices_aborted.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            api_call_errors: self.api_call_errors.load(Ordering::Relaxed),
            reauthentications,
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            averages: self.metrics.averages(),
            elapsed,
            failures: self.failures.lock().clone(),
        }
    }
}

/// Aggregate result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub devices_generated: u64,
    pub devices_processed: u64,
    pub device_errors: u64,
    pub devices_aborted: u64,
    pub api_calls: u64,
    pub api_call_errors: u64,
    pub reauthentications: u64,
    pub sink_failures: u64,
    pub averages: Averages,
    pub elapsed: Duration,
    pub failures: Vec<CallFailure>,
}

impl RunSummary {
    /// The `device_count` point written once per run.
    pub fn to_point(&self) -> Point {
        Point::new("device_count")
            .field("total_devices", self.devices_processed)
            .field("errors", self.device_errors)
            .field("api_calls", self.api_calls)
            .field("api_call_errors", self.api_call_errors)
    }
}
