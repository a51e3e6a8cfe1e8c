use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fragment_canary::cli::Args;
use fragment_canary::metrics::sinks::{HttpMetricsSink, LogMetricsSink};
use fragment_canary::storage::HttpStorageClient;
use fragment_canary::{Canary, CanaryConfig, CanaryError, MetricsSink, RunReport};

/// Upper bound on TCP/TLS setup for both HTTP clients.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a handler the run simply goes to its deadline.
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn connect_timeout(config: &CanaryConfig) -> Duration {
    config.schedule.call_timeout.min(CONNECT_TIMEOUT)
}

fn metrics_sink(
    config: &CanaryConfig,
    dry_run: bool,
) -> Result<Arc<dyn MetricsSink>, CanaryError> {
    match config.metrics_endpoint.as_deref() {
        Some(url) if !dry_run => {
            info!(url, namespace = %config.namespace, "publishing metrics over http");
            let sink = HttpMetricsSink::builder(url)
                .connect_timeout(connect_timeout(config))
                .request_timeout(config.schedule.call_timeout)
                .build()?;
            Ok(Arc::new(sink))
        }
        _ => {
            info!(namespace = %config.namespace, "logging metrics locally");
            Ok(Arc::new(LogMetricsSink))
        }
    }
}

async fn run(args: Args) -> Result<RunReport, CanaryError> {
    let config = CanaryConfig::load(args.config.as_deref(), args.to_layer())?;

    let storage = HttpStorageClient::builder(config.storage_endpoint.clone())
        .connect_timeout(connect_timeout(&config))
        .request_timeout(config.schedule.call_timeout)
        .build()?;
    let sink = metrics_sink(&config, args.dry_run)?;

    let canary = Canary::new(&config, Arc::new(storage), sink);
    Ok(canary.run_until(shutdown_signal()).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(report) => {
            if report.interrupted {
                info!("canary stopped early on request");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "canary failed to start");
            ExitCode::FAILURE
        }
    }
}
