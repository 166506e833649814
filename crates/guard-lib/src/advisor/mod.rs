//! Optimization and cleanup advice derived from health and cost outputs

mod cleanup;
mod optimization;

pub use cleanup::{
    CleanupAnalyzer, CleanupConfig, CleanupExecutor, CleanupFailure, CleanupMode, CleanupOutcome,
    CleanupRecommendation, CleanupResourceType, ClusterMutator, UNUSED_CONFIG_MAP_REASON,
};
pub use optimization::{Advisor, AdvisorConfig, OptimizationReport, Recommendation, RecommendationKind};
