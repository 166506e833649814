//! Snapshot acquisition
//!
//! The live Kubernetes client lives outside this crate. It plugs in through
//! [`SnapshotSource`]; [`FileSnapshotSource`] reads a captured snapshot from
//! disk.

use crate::models::ClusterSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Produces point-in-time cluster snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn capture(&self) -> Result<ClusterSnapshot>;
}

/// Reads a JSON [`ClusterSnapshot`] from a file on every capture
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSource for FileSnapshotSource {
    async fn capture(&self) -> Result<ClusterSnapshot> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read snapshot {}", self.path.display()))?;
        let snapshot: ClusterSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot {}", self.path.display()))?;

        debug!(
            path = %self.path.display(),
            nodes = snapshot.nodes.as_ref().map(Vec::len),
            pods = snapshot.pods.as_ref().map(Vec::len),
            "Loaded cluster snapshot"
        );

        Ok(snapshot)
    }
}
