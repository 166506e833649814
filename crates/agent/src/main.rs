//! KubeGuard Agent - cluster health and cost monitoring
//!
//! Reads a cluster snapshot on every tick, evaluates health and cost,
//! exports Prometheus metrics and serves probe endpoints.

use anyhow::{Context, Result};
use guard_lib::{
    AgentStatus, EvaluationCycle, FileSnapshotSource, MonitorLoop, PricingConfig, StructuredLogger,
};
use kubeguard_agent::{api, config::AgentConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting kubeguard-agent");

    let config = AgentConfig::load()?;
    info!(
        cluster = %config.cluster_name,
        snapshot = %config.snapshot_path.display(),
        "Agent configured"
    );

    let logger = StructuredLogger::new(&config.cluster_name);

    let pricing = PricingConfig::from_path(&config.pricing_path).with_context(|| {
        format!("failed to load pricing from {}", config.pricing_path.display())
    })?;

    let cycle = EvaluationCycle::new(Arc::new(pricing))
        .with_health_config(config.health_config())
        .with_advisor_config(config.advisor_config())
        .with_cleanup_config(config.cleanup_config())
        .with_logger(logger.clone());

    let source = Arc::new(FileSnapshotSource::new(&config.snapshot_path));
    let status = AgentStatus::new();

    let (monitor, mut reports) = MonitorLoop::new(source, cycle, config.monitor_config());
    let monitor = monitor
        .with_status(status.clone())
        .with_logger(logger.clone());

    let app_state = Arc::new(api::AppState::new(status));

    logger.log_startup(AGENT_VERSION, config.interval_secs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    // Keep the latest report for the /report endpoint
    let report_state = app_state.clone();
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            report_state.set_latest_report(report).await;
        }
    });

    let api_port = config.api_port;
    let api_handle = tokio::spawn(api::serve(api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            let reason = match result {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {}", e),
                Err(e) => format!("API server task panicked: {}", e),
            };
            logger.log_shutdown(&reason);
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Monitoring loop did not stop cleanly");
    }

    info!("Shutting down");
    Ok(())
}
