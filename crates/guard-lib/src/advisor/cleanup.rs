//! Cleanup of unused ConfigMaps and stale terminal pods
//!
//! [`CleanupAnalyzer`] is a pure function of the snapshot. The
//! [`CleanupExecutor`] runs it and, in apply mode, deletes exactly the
//! recommended resources through a [`ClusterMutator`].

use crate::error::CleanupError;
use crate::models::{object_key, ClusterSnapshot};
use crate::observability::StructuredLogger;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

pub const UNUSED_CONFIG_MAP_REASON: &str = "not referenced by any pod";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Age after which a Failed or Succeeded pod is stale
    pub retention_days: u32,
    /// Namespaces never considered for cleanup
    pub protected_namespaces: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            protected_namespaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CleanupResourceType {
    ConfigMap,
    Pod,
}

impl fmt::Display for CleanupResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupResourceType::ConfigMap => write!(f, "ConfigMap"),
            CleanupResourceType::Pod => write!(f, "Pod"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRecommendation {
    pub resource_type: CleanupResourceType,
    pub namespace: String,
    pub name: String,
    pub reason: String,
    pub age_seconds: i64,
}

impl CleanupRecommendation {
    pub fn age(&self) -> Duration {
        Duration::seconds(self.age_seconds)
    }

    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// Deletes cluster objects on behalf of the cleanup executor
#[async_trait]
pub trait ClusterMutator: Send + Sync {
    async fn delete_config_map(&self, namespace: &str, name: &str) -> anyhow::Result<()>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub recommendation: CleanupRecommendation,
    pub error: String,
}

/// Result of one cleanup run. Every recommendation ends up in exactly one of
/// `deleted`, `failed` or `skipped` in apply mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub mode: CleanupMode,
    pub recommendations: Vec<CleanupRecommendation>,
    pub deleted: Vec<CleanupRecommendation>,
    pub failed: Vec<CleanupFailure>,
    /// Not attempted because the run was cancelled
    pub skipped: Vec<CleanupRecommendation>,
}

impl CleanupOutcome {
    /// False when some deletion failed or was skipped
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupAnalyzer {
    config: CleanupConfig,
}

impl CleanupAnalyzer {
    pub fn new(config: CleanupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Recommendations sorted by type, namespace and name
    pub fn analyze(
        &self,
        snapshot: &ClusterSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<CleanupRecommendation>, CleanupError> {
        let pods = snapshot
            .pods
            .as_deref()
            .ok_or(crate::error::SnapshotError::MissingPods)?;
        let protected = |namespace: &str| {
            self.config
                .protected_namespaces
                .iter()
                .any(|p| p == namespace)
        };

        let mut recommendations = Vec::new();

        match snapshot.config_maps.as_deref() {
            Some(config_maps) => {
                let in_use: HashSet<String> = pods
                    .iter()
                    .chain(snapshot.system_pods.iter().flatten())
                    .flat_map(|pod| {
                        pod.config_map_references()
                            .map(|cm| object_key(&pod.namespace, cm))
                            .collect::<Vec<_>>()
                    })
                    .collect();

                recommendations.extend(
                    config_maps
                        .iter()
                        .filter(|cm| !protected(&cm.namespace))
                        .filter(|cm| !in_use.contains(&object_key(&cm.namespace, &cm.name)))
                        .map(|cm| CleanupRecommendation {
                            resource_type: CleanupResourceType::ConfigMap,
                            namespace: cm.namespace.clone(),
                            name: cm.name.clone(),
                            reason: UNUSED_CONFIG_MAP_REASON.to_string(),
                            age_seconds: (now - cm.created_at).num_seconds(),
                        }),
                );
            }
            None => warn!("ConfigMap listing unavailable, skipping unused ConfigMap analysis"),
        }

        let retention = Duration::days(i64::from(self.config.retention_days));
        recommendations.extend(
            pods.iter()
                .filter(|pod| pod.phase.is_terminal() && !protected(&pod.namespace))
                .filter(|pod| pod.age(now) > retention)
                .map(|pod| CleanupRecommendation {
                    resource_type: CleanupResourceType::Pod,
                    namespace: pod.namespace.clone(),
                    name: pod.name.clone(),
                    reason: format!(
                        "{} pod older than {} days",
                        pod.phase, self.config.retention_days
                    ),
                    age_seconds: pod.age(now).num_seconds(),
                }),
        );

        recommendations.sort_by(|a, b| {
            (a.resource_type, &a.namespace, &a.name).cmp(&(b.resource_type, &b.namespace, &b.name))
        });
        recommendations.dedup_by(|a, b| {
            a.resource_type == b.resource_type && a.namespace == b.namespace && a.name == b.name
        });

        Ok(recommendations)
    }
}

/// Runs cleanup analysis and applies it
///
/// Apply runs are serialized by a lock held for the whole run. Each executor
/// owns a fresh lock; executors that mutate the same cluster must share one
/// through [`CleanupExecutor::with_apply_lock`].
pub struct CleanupExecutor {
    mutator: Arc<dyn ClusterMutator>,
    analyzer: CleanupAnalyzer,
    logger: StructuredLogger,
    apply_lock: Arc<Mutex<()>>,
}

impl CleanupExecutor {
    pub fn new(mutator: Arc<dyn ClusterMutator>, analyzer: CleanupAnalyzer) -> Self {
        Self {
            mutator,
            analyzer,
            logger: StructuredLogger::default(),
            apply_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Serialize apply runs with every executor holding the same lock
    pub fn with_apply_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.apply_lock = lock;
        self
    }

    pub fn apply_lock(&self) -> Arc<Mutex<()>> {
        self.apply_lock.clone()
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn analyzer(&self) -> &CleanupAnalyzer {
        &self.analyzer
    }

    /// Analyze and, in apply mode, delete each recommended resource.
    ///
    /// Deletions are best-effort: a failure is logged and recorded and the
    /// run moves on. Cancellation is checked before every deletion; the rest
    /// of the list is then reported as skipped.
    pub async fn run(
        &self,
        snapshot: &ClusterSnapshot,
        mode: CleanupMode,
        now: DateTime<Utc>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<CleanupOutcome, CleanupError> {
        let recommendations = self.analyzer.analyze(snapshot, now)?;
        let mut outcome = CleanupOutcome {
            mode,
            recommendations: recommendations.clone(),
            deleted: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };

        if mode == CleanupMode::DryRun {
            info!(recommendations = recommendations.len(), "Cleanup dry run complete");
            return Ok(outcome);
        }

        let _guard = self.apply_lock.lock().await;

        for recommendation in recommendations {
            if *cancel.borrow() {
                outcome.skipped.push(recommendation);
                continue;
            }

            let result = match recommendation.resource_type {
                CleanupResourceType::ConfigMap => {
                    self.mutator
                        .delete_config_map(&recommendation.namespace, &recommendation.name)
                        .await
                }
                CleanupResourceType::Pod => {
                    self.mutator
                        .delete_pod(&recommendation.namespace, &recommendation.name)
                        .await
                }
            };

            match result {
                Ok(()) => {
                    self.logger.log_cleanup_deleted(
                        &recommendation.resource_type.to_string(),
                        &recommendation.namespace,
                        &recommendation.name,
                    );
                    outcome.deleted.push(recommendation);
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    self.logger.log_cleanup_failed(
                        &recommendation.resource_type.to_string(),
                        &recommendation.namespace,
                        &recommendation.name,
                        &error,
                    );
                    outcome.failed.push(CleanupFailure {
                        recommendation,
                        error,
                    });
                }
            }
        }

        if !outcome.skipped.is_empty() {
            warn!(
                skipped = outcome.skipped.len(),
                "Cleanup cancelled before all deletions were attempted"
            );
        }
        info!(
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            "Cleanup apply run complete"
        );

        Ok(outcome)
    }
}
