//! Cost computation and attribution
//!
//! Prices every node through the [`PricingConfig`], attributes each node's
//! cost to its resident pods and sums pods into namespaces. A node without
//! allocatable data is reported with unknown cost and left out of the
//! cluster totals.

mod attribution;
mod forecast;

pub use attribution::{attribute_node, AttributionBasis, PodCost};
pub use forecast::{forecast, CostForecast, Forecast, FORECAST_HORIZON_DAYS, MIN_HISTORY_SAMPLES};

use crate::error::SnapshotError;
use crate::models::{ClusterSnapshot, Node, Pod, ResourceUsage, UtilizationSample};
use crate::observability::StructuredLogger;
use crate::pricing::{PricingConfig, ResolvedPrices};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Fixed hourly to monthly conversion
pub const HOURS_PER_MONTH: f64 = 720.0;

const MILLICORES_PER_CORE: f64 = 1000.0;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Hourly cost of one node split by resource type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub network: f64,
    pub gpu: f64,
    pub total: f64,
}

impl CostBreakdown {
    fn new(cpu: f64, memory: f64, storage: f64, network: f64, gpu: f64) -> Self {
        Self {
            cpu,
            memory,
            storage,
            network,
            gpu,
            total: cpu + memory + storage + network + gpu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCost {
    pub node: String,
    pub instance_type: Option<String>,
    pub region: Option<String>,
    pub prices: ResolvedPrices,
    /// `None` when the node reports no allocatable resources
    pub hourly: Option<CostBreakdown>,
    pub monthly: Option<f64>,
    pub cpu_utilization: Option<f64>,
    pub memory_utilization: Option<f64>,
    /// Sum of the costs attributed to resident pods
    pub attributed_hourly: f64,
}

impl NodeCost {
    pub fn hourly_total(&self) -> Option<f64> {
        self.hourly.as_ref().map(|h| h.total)
    }

    /// Highest of CPU and memory utilization, when metrics were observed
    pub fn peak_utilization(&self) -> Option<f64> {
        match (self.cpu_utilization, self.memory_utilization) {
            (Some(cpu), Some(memory)) => Some(cpu.max(memory)),
            (cpu, memory) => cpu.or(memory),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceCost {
    pub namespace: String,
    pub pod_count: usize,
    pub hourly: f64,
    pub monthly: f64,
}

/// Cost attribution of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub timestamp: DateTime<Utc>,
    pub nodes: Vec<NodeCost>,
    pub pods: Vec<PodCost>,
    pub namespaces: Vec<NamespaceCost>,
    /// Totals over nodes with known cost
    pub total_hourly: f64,
    pub total_monthly: f64,
    /// Nodes whose cost is unknown
    pub unpriced_nodes: Vec<String>,
    /// Nodes advertising a GPU model missing from the pricing table
    pub unrecognized_gpu_nodes: Vec<String>,
    /// Cluster utilization at capture time, when metrics were observed
    pub utilization: Option<f64>,
    pub forecast: Forecast,
}

impl CostReport {
    pub fn node(&self, name: &str) -> Option<&NodeCost> {
        self.nodes.iter().find(|n| n.node == name)
    }

    pub fn namespace(&self, namespace: &str) -> Option<&NamespaceCost> {
        self.namespaces.iter().find(|n| n.namespace == namespace)
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<&PodCost> {
        self.pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
    }

    pub fn pods_on<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a PodCost> + 'a {
        self.pods.iter().filter(move |p| p.node == node)
    }
}

/// Computes cost reports against an immutable pricing table
#[derive(Clone)]
pub struct CostAggregator {
    pricing: Arc<PricingConfig>,
    logger: StructuredLogger,
}

impl CostAggregator {
    pub fn new(pricing: Arc<PricingConfig>) -> Self {
        Self {
            pricing,
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn compute(&self, snapshot: &ClusterSnapshot) -> Result<CostReport, SnapshotError> {
        let nodes = snapshot.nodes.as_deref().ok_or(SnapshotError::MissingNodes)?;
        let pods = snapshot.pods.as_deref().ok_or(SnapshotError::MissingPods)?;
        let node_usage = snapshot.node_usage_index();
        let pod_usage = snapshot.pod_usage_index();

        let mut ordered: Vec<&Node> = nodes.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let mut node_costs = Vec::with_capacity(ordered.len());
        let mut pod_costs = Vec::new();
        let mut unpriced_nodes = Vec::new();
        let mut unrecognized_gpu_nodes = Vec::new();

        for node in ordered {
            let prices = self.pricing.resolve(node);
            if let Some(gpu) = prices.gpu.as_ref().filter(|g| !g.recognized) {
                self.logger
                    .log_pricing_gap(&node.name, &format!("unrecognized GPU model '{}'", gpu.model));
                unrecognized_gpu_nodes.push(node.name.clone());
            }

            let usage = node_usage
                .as_ref()
                .and_then(|index| index.get(node.name.as_str()).copied());
            let mut cost = price_node(node, prices, usage);

            match &cost.hourly {
                Some(breakdown) => {
                    let resident: Vec<&Pod> = pods
                        .iter()
                        .filter(|p| p.node_name.as_deref() == Some(node.name.as_str()))
                        .filter(|p| !p.phase.is_terminal())
                        .collect();
                    let attributed = attribute_node(&node.name, breakdown, &resident, pod_usage.as_ref());
                    cost.attributed_hourly = attributed.iter().map(|p| p.hourly).sum();
                    pod_costs.extend(attributed);
                }
                None => {
                    self.logger
                        .log_pricing_gap(&node.name, "node reports no allocatable resources");
                    unpriced_nodes.push(node.name.clone());
                }
            }
            node_costs.push(cost);
        }

        let namespaces = sum_namespaces(&pod_costs);
        let total_hourly: f64 = node_costs.iter().filter_map(NodeCost::hourly_total).sum();
        let total_monthly = total_hourly * HOURS_PER_MONTH;
        let utilization = cluster_utilization(nodes, node_usage.as_ref());

        let mut history: Vec<UtilizationSample> = snapshot.utilization_history.clone();
        if let Some(utilization) = utilization {
            history.push(UtilizationSample {
                timestamp: snapshot.captured_at,
                utilization,
            });
        }
        let forecast = forecast(&history, total_monthly);

        debug!(
            nodes = node_costs.len(),
            pods = pod_costs.len(),
            total_hourly = total_hourly,
            unpriced = unpriced_nodes.len(),
            "Cost computation complete"
        );

        Ok(CostReport {
            timestamp: snapshot.captured_at,
            nodes: node_costs,
            pods: pod_costs,
            namespaces,
            total_hourly,
            total_monthly,
            unpriced_nodes,
            unrecognized_gpu_nodes,
            utilization,
            forecast,
        })
    }
}

fn price_node(node: &Node, prices: ResolvedPrices, usage: Option<&ResourceUsage>) -> NodeCost {
    let hourly = node.allocatable.as_ref().map(|a| {
        let gpu = prices
            .gpu
            .as_ref()
            .map(|g| g.unit_price * g.count as f64)
            .unwrap_or(0.0);
        CostBreakdown::new(
            a.cpu_millicores as f64 / MILLICORES_PER_CORE * prices.cpu,
            a.memory_bytes as f64 / BYTES_PER_GIB * prices.memory,
            a.storage_bytes as f64 / BYTES_PER_GIB * prices.storage,
            prices.network,
            gpu,
        )
    });

    let ratio = |used: u64, total: u64| (total > 0).then(|| used as f64 / total as f64);
    let (cpu_utilization, memory_utilization) = match (node.allocatable.as_ref(), usage) {
        (Some(a), Some(u)) => (
            ratio(u.cpu_millicores, a.cpu_millicores),
            ratio(u.memory_bytes, a.memory_bytes),
        ),
        _ => (None, None),
    };

    NodeCost {
        node: node.name.clone(),
        instance_type: node.instance_type().map(str::to_string),
        region: node.region().map(str::to_string),
        prices,
        monthly: hourly.as_ref().map(|h| h.total * HOURS_PER_MONTH),
        hourly,
        cpu_utilization,
        memory_utilization,
        attributed_hourly: 0.0,
    }
}

/// Namespace totals in pod order, so they equal the sum of the listed pods
fn sum_namespaces(pods: &[PodCost]) -> Vec<NamespaceCost> {
    let mut totals: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for pod in pods {
        let entry = totals.entry(pod.namespace.as_str()).or_default();
        entry.0 += 1;
        entry.1 += pod.hourly;
    }
    totals
        .into_iter()
        .map(|(namespace, (pod_count, hourly))| NamespaceCost {
            namespace: namespace.to_string(),
            pod_count,
            hourly,
            monthly: hourly * HOURS_PER_MONTH,
        })
        .collect()
}

/// Higher of cluster CPU and memory utilization over metered nodes
fn cluster_utilization(nodes: &[Node], usage: Option<&HashMap<&str, &ResourceUsage>>) -> Option<f64> {
    let usage = usage?;
    let (mut cpu_used, mut cpu_total, mut mem_used, mut mem_total) = (0u64, 0u64, 0u64, 0u64);
    for node in nodes {
        if let (Some(a), Some(u)) = (node.allocatable.as_ref(), usage.get(node.name.as_str())) {
            cpu_used += u.cpu_millicores;
            cpu_total += a.cpu_millicores;
            mem_used += u.memory_bytes;
            mem_total += a.memory_bytes;
        }
    }
    if cpu_total == 0 || mem_total == 0 {
        return None;
    }
    Some((cpu_used as f64 / cpu_total as f64).max(mem_used as f64 / mem_total as f64))
}
