//! Cluster health and cost library
//!
//! This crate provides the core functionality for:
//! - Health evaluation of a cluster snapshot
//! - Tiered pricing resolution and cost attribution
//! - Rightsizing, idle-resource and cleanup advice
//! - Continuous monitoring, metrics and agent status

pub mod advisor;
pub mod cost;
pub mod cycle;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod pricing;
pub mod source;
pub mod status;

#[cfg(test)]
mod testing;

pub use advisor::{
    Advisor, AdvisorConfig, CleanupAnalyzer, CleanupConfig, CleanupExecutor, CleanupMode,
    CleanupOutcome, CleanupRecommendation, ClusterMutator, OptimizationReport, Recommendation,
};
pub use cost::{CostAggregator, CostReport, Forecast, NamespaceCost, NodeCost, PodCost};
pub use cycle::{CycleReport, EvaluationCycle};
pub use error::{CleanupError, CycleError, PricingError, SnapshotError};
pub use health::{ClusterHealth, HealthConfig, HealthEvaluator, HealthIssue, Severity};
pub use models::ClusterSnapshot;
pub use monitor::{MonitorConfig, MonitorLoop};
pub use observability::{ClusterMetrics, StructuredLogger};
pub use pricing::{PricingConfig, ResolvedPrices};
pub use source::{FileSnapshotSource, SnapshotSource};
pub use status::{AgentState, AgentStatus, ReadinessResponse, StatusResponse};
