//! Error types for the evaluation pipeline
//!
//! Only conditions that make a cycle's output meaningless are errors. A check
//! that cannot run leaves its result unknown instead.

use std::path::PathBuf;
use thiserror::Error;

/// The snapshot cannot be evaluated at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot has no node listing")]
    MissingNodes,
    #[error("snapshot has no pod listing")]
    MissingPods,
}

/// Pricing document could not be loaded
#[derive(Debug, Error)]
pub enum PricingError {
    #[error("failed to read pricing file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse pricing document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid price for '{field}': {value}")]
    InvalidPrice { field: String, value: f64 },
    #[error("invalid multiplier for region '{region}': {value}")]
    InvalidMultiplier { region: String, value: f64 },
}

/// Failure of one evaluation cycle
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("snapshot acquisition failed: {0:#}")]
    Source(anyhow::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
    #[error("evaluation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("cycle exceeded timeout of {0:?}")]
    TimedOut(std::time::Duration),
    #[error("cycle cancelled")]
    Cancelled,
}

/// Cleanup analysis could not run
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
