//! Continuous monitoring loop
//!
//! Captures a snapshot and runs one evaluation cycle per tick. Cycles never
//! overlap: the next tick is only awaited once the previous cycle, including
//! metrics export, has finished or been abandoned on timeout or shutdown.
//! An abandoned cycle is cancelled so its queued evaluation tasks do no work.

use crate::cycle::{CycleReport, EvaluationCycle};
use crate::error::CycleError;
use crate::models::{UsageWindow, UtilizationSample};
use crate::observability::{ClusterMetrics, StructuredLogger};
use crate::source::SnapshotSource;
use crate::status::AgentStatus;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between cycle starts (default: 5 minutes)
    pub interval: Duration,
    /// Longest a single cycle may run before it is abandoned (default: 60 seconds)
    pub cycle_timeout: Duration,
    /// Samples kept for the cost forecast and per node and pod for the advisor
    pub history_window: usize,
    /// Capacity of the report channel
    pub buffer_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            cycle_timeout: Duration::from_secs(60),
            history_window: 24,
            buffer_size: 16,
        }
    }
}

pub struct MonitorLoop {
    source: Arc<dyn SnapshotSource>,
    cycle: EvaluationCycle,
    config: MonitorConfig,
    report_tx: mpsc::Sender<Arc<CycleReport>>,
    /// Cluster utilization of recent cycles, oldest first. Not persisted.
    history: VecDeque<UtilizationSample>,
    /// Per-node and per-pod usage of recent snapshots. Not persisted.
    usage_window: UsageWindow,
    status: AgentStatus,
    metrics: ClusterMetrics,
    logger: StructuredLogger,
}

impl MonitorLoop {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        cycle: EvaluationCycle,
        config: MonitorConfig,
    ) -> (Self, mpsc::Receiver<Arc<CycleReport>>) {
        let (report_tx, report_rx) = mpsc::channel(config.buffer_size.max(1));

        let monitor = Self {
            source,
            cycle,
            history: VecDeque::with_capacity(config.history_window),
            usage_window: UsageWindow::default(),
            config,
            report_tx,
            status: AgentStatus::new(),
            metrics: ClusterMetrics::new(),
            logger: StructuredLogger::default(),
        };

        (monitor, report_rx)
    }

    /// Share an externally owned status handle (e.g. with the probe server)
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn status(&self) -> AgentStatus {
        self.status.clone()
    }

    /// Run until the shutdown flag turns true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            timeout_secs = self.config.cycle_timeout.as_secs(),
            "Starting monitoring loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.run_cycle(&mut shutdown).await {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Shutting down monitoring loop");
    }

    /// Returns false when shutdown arrived while the cycle was running
    async fn run_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let limit = self.config.cycle_timeout;
        let (cancel_tx, cancel) = watch::channel(false);
        let result = tokio::select! {
            result = timeout(limit, self.execute(cancel)) => {
                result.unwrap_or(Err(CycleError::TimedOut(limit)))
            }
            _ = wait_for_shutdown(shutdown) => {
                info!("Shutdown requested, abandoning running cycle");
                let _ = cancel_tx.send(true);
                return false;
            }
        };
        if matches!(result, Err(CycleError::TimedOut(_))) {
            let _ = cancel_tx.send(true);
        }

        match result {
            Ok(report) => self.complete(report).await,
            Err(e) => self.fail(e).await,
        }
        true
    }

    async fn execute(&mut self, cancel: watch::Receiver<bool>) -> Result<CycleReport, CycleError> {
        let mut snapshot = self.source.capture().await.map_err(CycleError::Source)?;
        if !self.history.is_empty() {
            snapshot = snapshot.with_history(self.history.iter().copied().collect());
        }

        // A window shipped with the first snapshot seeds the in-memory one
        if self.usage_window.is_empty() {
            self.usage_window = std::mem::take(&mut snapshot.usage_window);
        }
        self.usage_window.record(&snapshot, self.config.history_window);
        snapshot.usage_window = self.usage_window.clone();

        self.cycle.run_until(Arc::new(snapshot), cancel).await
    }

    async fn complete(&mut self, report: CycleReport) {
        if let Some(utilization) = report.costs.utilization {
            self.history.push_back(UtilizationSample {
                timestamp: report.captured_at,
                utilization,
            });
            while self.history.len() > self.config.history_window {
                self.history.pop_front();
            }
        }

        self.metrics.record_cycle(&report);
        self.status
            .record_success(report.captured_at, report.health.score)
            .await;
        self.logger.log_cycle_completed(&report);
        for issue in &report.health.issues {
            self.logger.log_health_issue(issue);
        }

        match self.report_tx.try_send(Arc::new(report)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Report channel full, dropping cycle report");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Report receiver dropped");
            }
        }
    }

    async fn fail(&mut self, error: CycleError) {
        let message = error.to_string();
        self.metrics.inc_cycle_failures();
        let consecutive = self.status.record_failure(message.clone()).await;
        self.logger.log_cycle_failed(&message, consecutive);
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
