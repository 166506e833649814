//! Cluster health evaluation
//!
//! Reduces a snapshot into per-category statuses, a weighted 0-100 score and
//! a severity-ranked issue list. A missing node or pod listing aborts the
//! evaluation; any other category that cannot be evaluated is recorded as
//! unknown and dropped from the weighted sum.

mod checks;
mod issues;
mod score;

pub use checks::{
    check_control_plane, check_namespaces, check_network, check_nodes, check_pods,
    check_resource_usage, usage_score, ControlPlaneStatus, NamespaceHealth, NamespaceUsage,
    NetworkStatus, NodeHealthStatus, PodHealthStatus, ResourceUsageStatus,
};
pub use issues::{identify_issues, HealthIssue, Severity};
pub use score::{weighted_score, Category, CategoryScores};

use crate::error::SnapshotError;
use crate::models::ClusterSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Thresholds used by the health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Container restart count above which a pod counts as restarting
    pub restart_threshold: u32,
    /// Api-server round trip at or above which it counts as unhealthy
    pub api_latency_threshold_ms: f64,
    /// Usage percent above which the resource score is penalized
    pub usage_threshold_percent: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            restart_threshold: 5,
            api_latency_threshold_ms: 1000.0,
            usage_threshold_percent: 80.0,
        }
    }
}

/// Health assessment of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub timestamp: DateTime<Utc>,
    pub nodes: NodeHealthStatus,
    pub pods: PodHealthStatus,
    /// `None` marks an unknown category
    pub control_plane: Option<ControlPlaneStatus>,
    pub network: Option<NetworkStatus>,
    pub resource_usage: Option<ResourceUsageStatus>,
    pub namespaces: BTreeMap<String, NamespaceHealth>,
    pub scores: CategoryScores,
    pub score: u8,
    pub issues: Vec<HealthIssue>,
}

/// Evaluates cluster health from snapshots
#[derive(Debug, Clone, Default)]
pub struct HealthEvaluator {
    config: HealthConfig,
}

impl HealthEvaluator {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Evaluate the snapshot. Pure: identical snapshots give identical reports.
    pub fn evaluate(&self, snapshot: &ClusterSnapshot) -> Result<ClusterHealth, SnapshotError> {
        let nodes = snapshot.nodes.as_deref().ok_or(SnapshotError::MissingNodes)?;
        let pods = snapshot.pods.as_deref().ok_or(SnapshotError::MissingPods)?;

        let node_status = check_nodes(nodes);
        let pod_status = check_pods(pods, self.config.restart_threshold);
        let control_plane = check_control_plane(
            snapshot.api_server.as_ref(),
            snapshot.system_pods.as_deref(),
            &self.config,
        );
        let network = check_network(snapshot);
        let namespaces = check_namespaces(pods, snapshot.pod_usage_index().as_ref(), &self.config);
        let resource_usage = check_resource_usage(
            nodes,
            snapshot.node_usage_index().as_ref(),
            &namespaces,
            &self.config,
        );

        let scores = CategoryScores {
            node: node_status.score,
            pod: pod_status.score,
            control_plane: control_plane.as_ref().map(|s| s.score),
            network: network.as_ref().map(|s| s.score),
            resource_usage: resource_usage.as_ref().map(|s| s.score),
        };
        for category in scores.unknown() {
            warn!(category = %category, "Health category unavailable, excluded from score");
        }

        let mut health = ClusterHealth {
            timestamp: snapshot.captured_at,
            nodes: node_status,
            pods: pod_status,
            control_plane,
            network,
            resource_usage,
            namespaces,
            score: scores.composite(),
            scores,
            issues: Vec::new(),
        };
        health.issues = identify_issues(&health, &self.config);

        debug!(
            score = health.score,
            issues = health.issues.len(),
            "Health evaluation complete"
        );

        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiServerProbe, NodeConditionType, PodPhase};
    use crate::testing::{node, pod, SnapshotBuilder, GIB};

    #[test]
    fn test_missing_nodes_is_fatal() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 1).build();
        snapshot.nodes = None;
        assert_eq!(
            HealthEvaluator::default().evaluate(&snapshot),
            Err(SnapshotError::MissingNodes)
        );
    }

    #[test]
    fn test_missing_pods_is_fatal() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 1).build();
        snapshot.pods = None;
        assert_eq!(
            HealthEvaluator::default().evaluate(&snapshot),
            Err(SnapshotError::MissingPods)
        );
    }

    #[test]
    fn test_healthy_cluster_scores_full() {
        // 3 ready nodes, 48 running pods, usage 65% CPU / 72% memory
        let snapshot = SnapshotBuilder::healthy_cluster(3, 48).with_usage(0.65, 0.72).build();

        let health = HealthEvaluator::default().evaluate(&snapshot).unwrap();

        assert!((96..=100).contains(&health.score));
        assert_eq!(health.scores.resource_usage, Some(100.0));
        assert!(health.scores.unknown().is_empty());
    }

    #[test]
    fn test_one_pressured_not_ready_node() {
        let snapshot = SnapshotBuilder::healthy_cluster(2, 6)
            .with_node(node("node-2").not_ready().memory_pressure().build())
            .build();

        let health = HealthEvaluator::default().evaluate(&snapshot).unwrap();

        assert!((health.scores.node - 61.666_666).abs() < 0.01);
        assert!(health.score == 88 || health.score == 89, "score {}", health.score);
        assert_eq!(
            health.nodes.node_conditions["node-2"],
            vec![NodeConditionType::MemoryPressure]
        );
    }

    #[test]
    fn test_adding_not_ready_node_never_raises_score() {
        let base = SnapshotBuilder::healthy_cluster(3, 9);
        let before = HealthEvaluator::default().evaluate(&base.clone().build()).unwrap();
        let after = HealthEvaluator::default()
            .evaluate(&base.with_node(node("extra").not_ready().build()).build())
            .unwrap();

        assert!(after.scores.node <= before.scores.node);
        assert!(after.score <= before.score);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let snapshot = SnapshotBuilder::healthy_cluster(4, 20)
            .with_node(node("flaky").disk_pressure().build())
            .build();
        let evaluator = HealthEvaluator::default();

        assert_eq!(evaluator.evaluate(&snapshot), evaluator.evaluate(&snapshot));
    }

    #[test]
    fn test_degraded_categories_renormalize() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(3, 3).build();
        snapshot.system_pods = None;
        snapshot.node_metrics = None;

        let health = HealthEvaluator::default().evaluate(&snapshot).unwrap();

        assert!(health.control_plane.is_none());
        assert!(health.network.is_none());
        assert!(health.resource_usage.is_none());
        assert_eq!(health.score, 100);
        assert_eq!(health.scores.unknown().len(), 3);
    }

    #[derive(Clone, Copy)]
    enum NodeShape {
        Healthy,
        NotReady,
        Pressured,
        Broken,
    }

    #[derive(Clone, Copy)]
    enum Listings {
        Healthy,
        Failing,
        Missing,
    }

    fn grid_snapshot(
        nodes: usize,
        shape: NodeShape,
        crash_looping: bool,
        listings: Listings,
        usage: f64,
    ) -> ClusterSnapshot {
        let pods = nodes * 3;
        let mut snapshot = SnapshotBuilder::healthy_cluster(nodes, pods)
            .with_usage(usage, usage)
            .with_pod_usage(usage * 2.0)
            .build();

        for n in snapshot.nodes.iter_mut().flatten() {
            let builder = node(&n.name);
            *n = match shape {
                NodeShape::Healthy => builder.build(),
                NodeShape::NotReady => builder.not_ready().build(),
                NodeShape::Pressured => builder.memory_pressure().disk_pressure().build(),
                NodeShape::Broken => builder.not_ready().memory_pressure().disk_pressure().build(),
            };
        }
        if crash_looping {
            snapshot.pods = Some(
                (0..pods)
                    .map(|i| {
                        pod("default", &format!("app-{i}"))
                            .on_node(&format!("node-{}", i % nodes))
                            .requests(500, GIB)
                            .crash_looping()
                            .restarts(50)
                            .build()
                    })
                    .collect(),
            );
        }
        match listings {
            Listings::Healthy => {}
            Listings::Failing => {
                snapshot.api_server = Some(ApiServerProbe {
                    reachable: true,
                    latency_ms: 60_000.0,
                });
                for p in snapshot.system_pods.iter_mut().flatten() {
                    p.phase = PodPhase::Failed;
                }
                for d in snapshot.ingress_controllers.iter_mut().flatten() {
                    d.ready_replicas = 0;
                }
                for e in snapshot.endpoints.iter_mut().flatten() {
                    e.subsets = 0;
                }
            }
            Listings::Missing => {
                snapshot.api_server = None;
                snapshot.system_pods = None;
                snapshot.services = None;
                snapshot.endpoints = None;
                snapshot.ingress_controllers = None;
                snapshot.network_policies = None;
                snapshot.node_metrics = None;
                snapshot.pod_metrics = None;
                snapshot.config_maps = None;
            }
        }
        snapshot
    }

    #[test]
    fn test_scores_stay_within_bounds() {
        let evaluator = HealthEvaluator::default();
        let in_range = |score: f64| (0.0..=100.0).contains(&score);

        for nodes in [1, 4, 25] {
            for shape in [NodeShape::Healthy, NodeShape::NotReady, NodeShape::Pressured, NodeShape::Broken] {
                for crash_looping in [false, true] {
                    for listings in [Listings::Healthy, Listings::Failing, Listings::Missing] {
                        for usage in [0.0, 0.5, 1.0] {
                            let snapshot = grid_snapshot(nodes, shape, crash_looping, listings, usage);
                            let health = evaluator.evaluate(&snapshot).unwrap();
                            let scores = &health.scores;

                            assert!(health.score <= 100);
                            assert!(in_range(scores.node), "node score {}", scores.node);
                            assert!(in_range(scores.pod), "pod score {}", scores.pod);
                            for score in [scores.control_plane, scores.network, scores.resource_usage]
                                .into_iter()
                                .flatten()
                            {
                                assert!(in_range(score), "category score {}", score);
                            }
                            for ns in health.namespaces.values() {
                                assert!(ns.score <= 100);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_every_node_under_pressure_scores_zero() {
        let snapshot = grid_snapshot(25, NodeShape::Pressured, false, Listings::Healthy, 0.5);

        let health = HealthEvaluator::default().evaluate(&snapshot).unwrap();

        assert_eq!(health.nodes.ready_nodes, 25);
        assert_eq!(health.nodes.memory_pressure_nodes, 25);
        assert_eq!(health.scores.node, 0.0);
    }

    #[test]
    fn test_worst_case_cluster_keeps_only_usage_points() {
        let snapshot = grid_snapshot(25, NodeShape::Broken, true, Listings::Failing, 1.0);

        let health = HealthEvaluator::default().evaluate(&snapshot).unwrap();

        assert_eq!(health.scores.node, 0.0);
        assert_eq!(health.scores.pod, 0.0);
        assert_eq!(health.scores.control_plane, Some(0.0));
        assert_eq!(health.scores.network, Some(0.0));
        // only resource usage keeps points: 100 - 2 * 20 - 2 * 20
        assert_eq!(health.scores.resource_usage, Some(20.0));
        assert_eq!(health.score, 2);
    }
}
