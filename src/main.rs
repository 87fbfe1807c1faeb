use anyhow::{Context, Result};
use clap::Parser;
use device_loadgen::{
    config::Config,
    orchestrator::{Orchestrator, RunError},
    sink::{InfluxSink, LogSink, MetricsSink},
    telemetry::init_tracing,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "device-loadgen")]
#[command(about = "Concurrent GPV/SPV load generator with InfluxDB metrics")]
#[command(version)]
struct Cli {
    /// Run configuration (YAML, or TOML by extension)
    #[arg(short, long, default_value = "cfg.yaml")]
    config: PathBuf,

    /// Override the number of concurrent device workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log metrics points instead of writing them to InfluxDB
    #[arg(long)]
    dry_run: bool,

    /// Also write the run summary as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut cfg = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(workers) = cli.workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        cfg.runner.workers = workers;
    }

    let sink: Arc<dyn MetricsSink> = match (&cfg.sink.token, cli.dry_run) {
        (Some(token), false) => Arc::new(InfluxSink::new(
            &cfg.sink,
            token.clone(),
            cfg.runner.request_timeout(),
        )?),
        (None, false) => {
            warn!("INFLUXDB_TOKEN is not set; metrics points will only be logged");
            Arc::new(LogSink)
        }
        (_, true) => Arc::new(LogSink),
    };

    let orchestrator = Orchestrator::new(cfg, sink)?;
    let summary = match orchestrator.run().await {
        Ok(summary) => summary,
        Err(RunError::Auth(e)) => {
            eprintln!("Authentication failed. Exiting...");
            return Err(e).context("initial authentication");
        }
        Err(e) => return Err(e.into()),
    };

    summary.print_report();

    if let Some(path) = &cli.output {
        summary
            .write_json(path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "summary saved");
    }

    Ok(())
}
