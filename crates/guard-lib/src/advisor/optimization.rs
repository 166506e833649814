//! Rightsizing and idle-resource recommendations
//!
//! Utilization is the higher of CPU and memory. Nodes compare usage against
//! allocatable, pods compare usage against their requests. Usage is the peak
//! over the snapshot's usage window, so a single quiet sample never marks a
//! busy resource idle. Savings are monthly.

use crate::cost::{CostReport, NodeCost, PodCost, HOURS_PER_MONTH};
use crate::models::{ClusterSnapshot, NodeResources, Pod, ResourceUsage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Utilization below which a resource is rightsized
    pub low_utilization_threshold: f64,
    /// Utilization at or below which a resource counts as idle
    pub idle_utilization_threshold: f64,
    /// Extra capacity kept above observed usage when resizing
    pub headroom: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            low_utilization_threshold: 0.30,
            idle_utilization_threshold: 0.05,
            headroom: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    RightsizeNode,
    RightsizePod,
    IdleNode,
    IdlePod,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationKind::RightsizeNode => "rightsize_node",
            RecommendationKind::RightsizePod => "rightsize_pod",
            RecommendationKind::IdleNode => "idle_node",
            RecommendationKind::IdlePod => "idle_pod",
        }
    }
}

impl fmt::Display for RecommendationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    /// Absent for nodes
    pub namespace: Option<String>,
    pub name: String,
    pub description: String,
    pub utilization: f64,
    pub current_monthly: f64,
    pub potential_saving: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Sum of monthly savings over all recommendations
    pub potential_savings: f64,
    /// Largest saving first
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Default)]
pub struct Advisor {
    config: AdvisorConfig,
}

impl Advisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Derive recommendations from a snapshot and its cost report. Pods on
    /// an idle node are left out since the node's saving already covers them.
    pub fn optimize(&self, snapshot: &ClusterSnapshot, costs: &CostReport) -> OptimizationReport {
        let allocatable: HashMap<&str, &NodeResources> = snapshot
            .nodes
            .iter()
            .flatten()
            .filter_map(|n| n.allocatable.as_ref().map(|a| (n.name.as_str(), a)))
            .collect();
        let window = &snapshot.usage_window;

        let mut recommendations: Vec<Recommendation> = costs
            .nodes
            .iter()
            .filter_map(|n| {
                let peak = window.node_peak(&n.node);
                self.review_node(n, peak, allocatable.get(n.node.as_str()).copied())
            })
            .collect();

        let idle_nodes: HashSet<&str> = recommendations
            .iter()
            .filter(|r| r.kind == RecommendationKind::IdleNode)
            .map(|r| r.name.as_str())
            .collect();

        let pods: HashMap<String, &Pod> = snapshot
            .pods
            .iter()
            .flatten()
            .map(|p| (p.key(), p))
            .collect();
        let pod_usage = snapshot.pod_usage_index().unwrap_or_default();

        let pod_recommendations: Vec<Recommendation> = costs
            .pods
            .iter()
            .filter(|c| !idle_nodes.contains(c.node.as_str()))
            .filter_map(|c| {
                let key = crate::models::object_key(&c.namespace, &c.name);
                let pod = pods.get(&key)?;
                let current = pod_usage.get(&key).map(|u| **u);
                let usage = highest(current, window.pod_peak(&key))?;
                self.review_pod(c, pod, &usage)
            })
            .collect();
        recommendations.extend(pod_recommendations);

        recommendations.sort_by(|a, b| {
            b.potential_saving
                .partial_cmp(&a.potential_saving)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
                .then_with(|| a.namespace.cmp(&b.namespace))
                .then_with(|| a.name.cmp(&b.name))
        });
        let potential_savings = recommendations.iter().map(|r| r.potential_saving).sum();

        debug!(
            recommendations = recommendations.len(),
            potential_savings = potential_savings,
            "Optimization analysis complete"
        );

        OptimizationReport {
            potential_savings,
            recommendations,
        }
    }

    fn review_node(
        &self,
        cost: &NodeCost,
        window_peak: Option<ResourceUsage>,
        allocatable: Option<&NodeResources>,
    ) -> Option<Recommendation> {
        let hourly = cost.hourly.as_ref()?;
        let ratio = |used: u64, total: u64| (total > 0).then(|| used as f64 / total as f64);
        let (peak_cpu, peak_memory) = match (window_peak, allocatable) {
            (Some(u), Some(a)) => (
                ratio(u.cpu_millicores, a.cpu_millicores),
                ratio(u.memory_bytes, a.memory_bytes),
            ),
            _ => (None, None),
        };
        let cpu_utilization = max_of(cost.cpu_utilization, peak_cpu);
        let memory_utilization = max_of(cost.memory_utilization, peak_memory);
        let utilization = max_of(cpu_utilization, memory_utilization)?;
        let current_monthly = hourly.total * HOURS_PER_MONTH;
        let percent = utilization * 100.0;

        if utilization <= self.config.idle_utilization_threshold {
            return Some(Recommendation {
                kind: RecommendationKind::IdleNode,
                namespace: None,
                name: cost.node.clone(),
                description: format!(
                    "Node {} is idle at {:.1}% utilization; drain and remove it",
                    cost.node, percent
                ),
                utilization,
                current_monthly,
                potential_saving: current_monthly,
            });
        }

        if utilization < self.config.low_utilization_threshold {
            let saving = (self.resize_saving(hourly.cpu, cpu_utilization)
                + self.resize_saving(hourly.memory, memory_utilization))
                * HOURS_PER_MONTH;
            return Some(Recommendation {
                kind: RecommendationKind::RightsizeNode,
                namespace: None,
                name: cost.node.clone(),
                description: format!(
                    "Node {} runs at {:.1}% utilization; move to a smaller instance type",
                    cost.node, percent
                ),
                utilization,
                current_monthly,
                potential_saving: saving,
            });
        }

        None
    }

    fn review_pod(&self, cost: &PodCost, pod: &Pod, usage: &ResourceUsage) -> Option<Recommendation> {
        let ratio = |used: u64, requested: Option<u64>| {
            requested
                .filter(|r| *r > 0)
                .map(|r| used as f64 / r as f64)
        };
        let cpu_utilization = ratio(usage.cpu_millicores, pod.cpu_request());
        let memory_utilization = ratio(usage.memory_bytes, pod.memory_request());
        let utilization = max_of(cpu_utilization, memory_utilization)?;
        let percent = utilization * 100.0;

        if utilization <= self.config.idle_utilization_threshold {
            return Some(Recommendation {
                kind: RecommendationKind::IdlePod,
                namespace: Some(cost.namespace.clone()),
                name: cost.name.clone(),
                description: format!(
                    "Pod {}/{} uses {:.1}% of its requests; scale it down or remove it",
                    cost.namespace, cost.name, percent
                ),
                utilization,
                current_monthly: cost.monthly,
                potential_saving: cost.monthly,
            });
        }

        if utilization < self.config.low_utilization_threshold {
            let saving = (self.resize_saving(cost.cpu_hourly, cpu_utilization)
                + self.resize_saving(cost.memory_hourly, memory_utilization))
                * HOURS_PER_MONTH;
            return Some(Recommendation {
                kind: RecommendationKind::RightsizePod,
                namespace: Some(cost.namespace.clone()),
                name: cost.name.clone(),
                description: format!(
                    "Pod {}/{} uses {:.1}% of its requests; lower requests to observed usage plus {:.0}% headroom",
                    cost.namespace,
                    cost.name,
                    percent,
                    self.config.headroom * 100.0
                ),
                utilization,
                current_monthly: cost.monthly,
                potential_saving: saving,
            });
        }

        None
    }

    /// Hourly saving from shrinking one resource to usage plus headroom
    fn resize_saving(&self, hourly: f64, utilization: Option<f64>) -> f64 {
        match utilization {
            Some(u) => hourly * (1.0 - (u * (1.0 + self.config.headroom)).min(1.0)),
            None => 0.0,
        }
    }
}

fn max_of(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Per-resource maximum of the current sample and the window peak
fn highest(current: Option<ResourceUsage>, peak: Option<ResourceUsage>) -> Option<ResourceUsage> {
    match (current, peak) {
        (Some(a), Some(b)) => Some(ResourceUsage {
            cpu_millicores: a.cpu_millicores.max(b.cpu_millicores),
            memory_bytes: a.memory_bytes.max(b.memory_bytes),
        }),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostAggregator;
    use crate::pricing::PricingConfig;
    use crate::models::UsageWindow;
    use crate::testing::{node, SnapshotBuilder};
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn report_for(snapshot: &ClusterSnapshot) -> CostReport {
        let pricing = PricingConfig::from_json(r#"{"defaults": {"cpu": 0.04, "memory": 0.005}}"#).unwrap();
        CostAggregator::new(Arc::new(pricing)).compute(snapshot).unwrap()
    }

    #[test]
    fn test_busy_cluster_has_no_recommendations() {
        let snapshot = SnapshotBuilder::healthy_cluster(2, 4)
            .with_usage(0.6, 0.7)
            .with_pod_usage(0.8)
            .build();
        let report = Advisor::default().optimize(&snapshot, &report_for(&snapshot));

        assert!(report.recommendations.is_empty());
        assert_eq!(report.potential_savings, 0.0);
    }

    #[test]
    fn test_underused_node_rightsized_with_headroom() {
        let snapshot = SnapshotBuilder::healthy_cluster(1, 1)
            .with_usage(0.10, 0.20)
            .with_pod_usage(0.8)
            .build();
        let costs = report_for(&snapshot);
        let hourly = costs.node("node-0").unwrap().hourly.clone().unwrap();

        let report = Advisor::default().optimize(&snapshot, &costs);
        let rec = &report.recommendations[0];

        assert_eq!(rec.kind, RecommendationKind::RightsizeNode);
        assert!((rec.utilization - 0.20).abs() < 1e-9);
        // resized to 12% CPU and 24% memory of allocatable
        let expected = (hourly.cpu * 0.88 + hourly.memory * 0.76) * HOURS_PER_MONTH;
        assert!((rec.potential_saving - expected).abs() < 1e-6);
        assert!(rec.potential_saving < rec.current_monthly);
    }

    #[test]
    fn test_idle_node_saves_full_cost_and_hides_its_pods() {
        let snapshot = SnapshotBuilder::healthy_cluster(1, 2)
            .with_usage(0.01, 0.02)
            .with_pod_usage(0.01)
            .build();
        let costs = report_for(&snapshot);

        let report = Advisor::default().optimize(&snapshot, &costs);

        assert_eq!(report.recommendations.len(), 1);
        let rec = &report.recommendations[0];
        assert_eq!(rec.kind, RecommendationKind::IdleNode);
        assert!((rec.potential_saving - costs.total_monthly).abs() < 1e-9);
        assert!((report.potential_savings - rec.potential_saving).abs() < 1e-12);
    }

    #[test]
    fn test_overprovisioned_pods_recommended() {
        let snapshot = SnapshotBuilder::healthy_cluster(1, 2)
            .with_usage(0.5, 0.5)
            .with_pod_usage(0.10)
            .build();
        let costs = report_for(&snapshot);

        let report = Advisor::default().optimize(&snapshot, &costs);

        assert_eq!(report.recommendations.len(), 2);
        for rec in &report.recommendations {
            assert_eq!(rec.kind, RecommendationKind::RightsizePod);
            assert_eq!(rec.namespace.as_deref(), Some("default"));
            assert!(rec.potential_saving > 0.0);
            assert!(rec.potential_saving < rec.current_monthly);
        }
    }

    #[test]
    fn test_unmetered_and_unpriced_nodes_skipped() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0)
            .with_node(node("bare").no_allocatable().build())
            .build();
        snapshot.node_metrics = None;

        let report = Advisor::default().optimize(&snapshot, &report_for(&snapshot));

        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_sorted_by_saving_descending() {
        let snapshot = SnapshotBuilder::healthy_cluster(3, 3)
            .with_usage(0.10, 0.10)
            .with_pod_usage(0.10)
            .build();

        let report = Advisor::default().optimize(&snapshot, &report_for(&snapshot));

        assert!(report
            .recommendations
            .windows(2)
            .all(|w| w[0].potential_saving >= w[1].potential_saving));
    }

    /// Window with `samples` readings per node of the given allocatable fraction
    fn busy_window(snapshot: &ClusterSnapshot, fraction: f64, samples: usize) -> UsageWindow {
        let mut window = UsageWindow::default();
        for n in snapshot.nodes.iter().flatten() {
            let a = n.allocatable.as_ref().unwrap();
            let usage = ResourceUsage {
                cpu_millicores: (a.cpu_millicores as f64 * fraction) as u64,
                memory_bytes: (a.memory_bytes as f64 * fraction) as u64,
            };
            window.nodes.insert(n.name.clone(), VecDeque::from(vec![usage; samples]));
        }
        window
    }

    #[test]
    fn test_quiet_sample_after_busy_window_is_not_idle() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 2)
            .with_usage(0.01, 0.02)
            .with_pod_usage(0.8)
            .build();
        snapshot.usage_window = busy_window(&snapshot, 0.9, 6);

        let report = Advisor::default().optimize(&snapshot, &report_for(&snapshot));

        assert!(report
            .recommendations
            .iter()
            .all(|r| r.kind != RecommendationKind::IdleNode));
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_rightsizing_uses_window_peak() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 1)
            .with_usage(0.02, 0.02)
            .with_pod_usage(0.8)
            .build();
        snapshot.usage_window = busy_window(&snapshot, 0.20, 3);
        let costs = report_for(&snapshot);
        let hourly = costs.node("node-0").unwrap().hourly.clone().unwrap();

        let report = Advisor::default().optimize(&snapshot, &costs);
        let rec = &report.recommendations[0];

        assert_eq!(rec.kind, RecommendationKind::RightsizeNode);
        assert!((rec.utilization - 0.20).abs() < 1e-6);
        // peak 20% plus 20% headroom keeps 24% of each resource
        let expected = (hourly.cpu + hourly.memory) * 0.76 * HOURS_PER_MONTH;
        assert!((rec.potential_saving - expected).abs() < 1e-3);
    }

    #[test]
    fn test_pod_window_peak_prevents_idle_pod() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 1)
            .with_usage(0.5, 0.5)
            .with_pod_usage(0.01)
            .build();
        // requests are 500m / 1GiB; the pod peaked at its full request
        snapshot.usage_window.pods.insert(
            "default/app-0".to_string(),
            VecDeque::from(vec![ResourceUsage {
                cpu_millicores: 500,
                memory_bytes: crate::testing::GIB,
            }]),
        );

        let report = Advisor::default().optimize(&snapshot, &report_for(&snapshot));

        assert!(report.recommendations.is_empty());
    }
}
