//! Run driver: initial login, bounded per-device fan-out, summary emission.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::auth::{AuthError, HttpAuthenticator, Session, TokenSource};
use crate::config::Config;
use crate::devices::{duplicate_ids, generate_ids, DeviceId};
use crate::executor::{CallOutcome, RequestExecutor, TransportError};
use crate::operations::{call_point, operations_from_config, HeaderError, Operation};
use crate::sink::{MetricsSink, Point};
use crate::stats::{RunStats, RunSummary};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid operation headers: {0}")]
    Headers(#[from] HeaderError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("worker pool closed: {0}")]
    Pool(#[from] AcquireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunPhase {
    Init,
    Authenticating,
    Processing,
    Reporting,
    Done,
    Failed,
}

pub struct Orchestrator {
    config: Config,
    operations: Arc<[Operation]>,
    executor: RequestExecutor,
    token_source: Arc<dyn TokenSource>,
    sink: Arc<dyn MetricsSink>,
    phase: Mutex<RunPhase>,
}

impl Orchestrator {
    pub fn new(config: Config, sink: Arc<dyn MetricsSink>) -> Result<Self, RunError> {
        let client = RequestExecutor::build_client(
            config.runner.request_timeout(),
            config.runner.accept_invalid_certs,
        )?;
        let token_source = Arc::new(HttpAuthenticator::new(client.clone(), &config.authenticate)?);
        let operations = operations_from_config(&config)?;
        if operations.is_empty() {
            warn!("no gpv or spv operation configured; devices will make no calls");
        }

        Ok(Self {
            operations: operations.into(),
            executor: RequestExecutor::new(client),
            token_source,
            sink,
            config,
            phase: Mutex::new(RunPhase::Init),
        })
    }

    /// Replaces the HTTP login, e.g. with a pre-issued token.
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = source;
        self
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock()
    }

    fn enter(&self, phase: RunPhase) {
        let mut current = self.phase.lock();
        info!(from = %*current, to = %phase, "run phase");
        *current = phase;
    }

    /// Runs every device once. Only a failed initial login aborts the run;
    /// in that case nothing is written to the sink.
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let started = Instant::now();

        self.enter(RunPhase::Authenticating);
        let session = match Session::start(
            Arc::clone(&self.token_source),
            self.config.runner.reauth_every,
        )
        .await
        {
            Ok(session) => Arc::new(session),
            Err(e) => {
                self.enter(RunPhase::Failed);
                return Err(e.into());
            }
        };

        self.enter(RunPhase::Processing);
        let devices = generate_ids(&self.config.devices.prefix, &self.config.devices.ranges);
        let duplicates = duplicate_ids(&devices).len();
        if duplicates > 0 {
            warn!(duplicates, "device ranges overlap; duplicate ids are processed independently");
        }
        let device_count = devices.len();
        let workers = self.config.runner.workers.max(1);
        info!(devices = device_count, workers, "processing devices");

        let runner = Arc::new(DeviceRunner {
            operations: Arc::clone(&self.operations),
            executor: self.executor.clone(),
            session: Arc::clone(&session),
            sink: Arc::clone(&self.sink),
            stats: RunStats::new(),
        });

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        for device in devices {
            let permit = Arc::clone(&semaphore).acquire_owned().await?;
            let runner = Arc::clone(&runner);
            tasks.spawn(async move {
                let _permit = permit;
                runner.process_device(device).await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "device task failed");
            }
        }

        self.enter(RunPhase::Reporting);
        let mut summary = runner
            .stats
            .summarize(device_count, session.refreshes(), started.elapsed());
        if let Err(e) = self.sink.write(summary.to_point()).await {
            warn!(error = %e, "failed to write run summary point");
            summary.sink_failures += 1;
        }

        self.enter(RunPhase::Done);
        Ok(summary)
    }
}

/// State shared by all device tasks of one run.
struct DeviceRunner {
    operations: Arc<[Operation]>,
    executor: RequestExecutor,
    session: Arc<Session>,
    sink: Arc<dyn MetricsSink>,
    stats: RunStats,
}

impl DeviceRunner {
    /// Runs the operations in order. A failed re-authentication ends this
    /// device's work; other devices carry on.
    async fn process_device(&self, device: DeviceId) {
        let mut had_error = false;
        for op in self.operations.iter() {
            match self.call(op, &device).await {
                Ok(success) => had_error |= !success,
                Err(e) => {
                    warn!(device_id = %device, error = %e, "re-authentication failed, skipping remaining operations");
                    self.stats.record_device_aborted();
                    return;
                }
            }
        }
        self.stats.record_device(had_error);
    }

    /// One call: record it, emit its point, then count it against the quota.
    async fn call(&self, op: &Operation, device: &DeviceId) -> Result<bool, AuthError> {
        let token = self.session.token().await;
        let outcome = match op.headers_with(&token) {
            Ok(headers) => {
                self.executor
                    .perform_request(&op.url_for(device), headers, op.payload())
                    .await
            }
            Err(e) => CallOutcome::Transport(TransportError::Other(e.to_string())),
        };

        match &outcome {
            CallOutcome::Completed { status, timing } => info!(
                operation = %op.kind,
                device_id = %device,
                status,
                latency_s = timing.latency.as_secs_f64(),
                first_byte_s = timing.ttfb.as_secs_f64(),
                response_time_s = timing.response_time.as_secs_f64(),
                "call finished"
            ),
            CallOutcome::Transport(err) => warn!(
                operation = %op.kind,
                device_id = %device,
                error = %err,
                "call failed"
            ),
        }

        self.stats.record_call(device, op.kind, &outcome);
        self.emit(call_point(op.kind, device, &outcome)).await;
        self.session.record_call().await?;
        Ok(outcome.is_success())
    }

    async fn emit(&self, point: Point) {
        if let Err(e) = self.sink.write(point).await {
            warn!(error = %e, "failed to write metrics point");
            self.stats.record_sink_failure();
        }
    }
}
