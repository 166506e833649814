//! One evaluation cycle over an immutable snapshot
//!
//! Health and cost run as two blocking tasks on the Tokio runtime and are
//! joined before the advisor and the dry-run cleanup analysis run. Every
//! cycle allocates a fresh report.
//!
//! Dropping the cycle future does not stop a blocking task that has already
//! started; it runs to completion and its result is discarded. Callers that
//! abandon a cycle flip its cancel flag so tasks still queued on the blocking
//! pool return without computing.

use crate::advisor::{
    Advisor, AdvisorConfig, CleanupAnalyzer, CleanupConfig, CleanupRecommendation,
    OptimizationReport,
};
use crate::cost::{CostAggregator, CostReport};
use crate::error::CycleError;
use crate::health::{ClusterHealth, HealthConfig, HealthEvaluator};
use crate::models::ClusterSnapshot;
use crate::observability::StructuredLogger;
use crate::pricing::PricingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task;
use tokio::time::Instant;
use tracing::debug;

/// Everything one cycle derives from a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub captured_at: DateTime<Utc>,
    pub health: ClusterHealth,
    pub costs: CostReport,
    pub optimization: OptimizationReport,
    /// Dry-run cleanup candidates; nothing is deleted by a cycle
    pub cleanup: Vec<CleanupRecommendation>,
    pub duration: Duration,
}

#[derive(Clone)]
pub struct EvaluationCycle {
    health: HealthEvaluator,
    costs: CostAggregator,
    advisor: Advisor,
    cleanup: CleanupAnalyzer,
}

impl EvaluationCycle {
    pub fn new(pricing: Arc<PricingConfig>) -> Self {
        Self {
            health: HealthEvaluator::default(),
            costs: CostAggregator::new(pricing),
            advisor: Advisor::default(),
            cleanup: CleanupAnalyzer::default(),
        }
    }

    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health = HealthEvaluator::new(config);
        self
    }

    pub fn with_advisor_config(mut self, config: AdvisorConfig) -> Self {
        self.advisor = Advisor::new(config);
        self
    }

    pub fn with_cleanup_config(mut self, config: CleanupConfig) -> Self {
        self.cleanup = CleanupAnalyzer::new(config);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.costs = self.costs.with_logger(logger);
        self
    }

    pub async fn run(&self, snapshot: Arc<ClusterSnapshot>) -> Result<CycleReport, CycleError> {
        let (_cancel_tx, cancel) = watch::channel(false);
        self.run_until(snapshot, cancel).await
    }

    /// Run the cycle, giving up with [`CycleError::Cancelled`] once `cancel`
    /// reads true at a stage boundary
    pub async fn run_until(
        &self,
        snapshot: Arc<ClusterSnapshot>,
        cancel: watch::Receiver<bool>,
    ) -> Result<CycleReport, CycleError> {
        let start = Instant::now();

        let evaluator = self.health.clone();
        let health_snapshot = snapshot.clone();
        let health_cancel = cancel.clone();
        let health_task = task::spawn_blocking(move || {
            if *health_cancel.borrow() {
                return Err(CycleError::Cancelled);
            }
            Ok(evaluator.evaluate(&health_snapshot)?)
        });

        let aggregator = self.costs.clone();
        let cost_snapshot = snapshot.clone();
        let cost_cancel = cancel.clone();
        let cost_task = task::spawn_blocking(move || {
            if *cost_cancel.borrow() {
                return Err(CycleError::Cancelled);
            }
            Ok(aggregator.compute(&cost_snapshot)?)
        });

        let (health, costs) = tokio::try_join!(health_task, cost_task)?;
        let health = health?;
        let costs = costs?;

        if *cancel.borrow() {
            return Err(CycleError::Cancelled);
        }

        let optimization = self.advisor.optimize(&snapshot, &costs);
        let cleanup = self.cleanup.analyze(&snapshot, snapshot.captured_at)?;

        let duration = start.elapsed();
        debug!(
            score = health.score,
            total_hourly = costs.total_hourly,
            recommendations = optimization.recommendations.len(),
            cleanup_candidates = cleanup.len(),
            elapsed_ms = duration.as_millis() as u64,
            "Evaluation cycle finished"
        );

        Ok(CycleReport {
            captured_at: snapshot.captured_at,
            health,
            costs,
            optimization,
            cleanup,
            duration,
        })
    }
}
