//! Proportional attribution of node cost to resident pods
//!
//! CPU cost is split by CPU weight and memory cost by memory weight. A pod's
//! weight is its request, or its observed usage when it declares no request.
//! When no resident pod has any weight the cost is split equally. Storage,
//! network and GPU cost follow the mean of the CPU and memory shares, so the
//! attributed costs always add up to the node total.

use crate::models::{Pod, ResourceUsage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{CostBreakdown, HOURS_PER_MONTH};

/// What a pod's share was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionBasis {
    Request,
    Usage,
    EqualSplit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodCost {
    pub namespace: String,
    pub name: String,
    pub node: String,
    pub cpu_hourly: f64,
    pub memory_hourly: f64,
    /// Storage, network and GPU share
    pub other_hourly: f64,
    pub hourly: f64,
    pub monthly: f64,
    pub cpu_basis: AttributionBasis,
    pub memory_basis: AttributionBasis,
}

/// Attribute one node's hourly cost across the pods resident on it
pub fn attribute_node(
    node: &str,
    cost: &CostBreakdown,
    pods: &[&Pod],
    usage: Option<&HashMap<String, &ResourceUsage>>,
) -> Vec<PodCost> {
    if pods.is_empty() {
        return Vec::new();
    }

    let observed = |pod: &Pod| usage.and_then(|u| u.get(&pod.key()).copied());
    let cpu = shares(pods.iter().map(|p| (p.cpu_request(), observed(*p).map(|u| u.cpu_millicores))));
    let memory = shares(pods.iter().map(|p| (p.memory_request(), observed(*p).map(|u| u.memory_bytes))));
    let other = cost.storage + cost.network + cost.gpu;

    pods.iter()
        .zip(cpu.into_iter().zip(memory))
        .map(|(pod, ((cpu_share, cpu_basis), (memory_share, memory_basis)))| {
            let cpu_hourly = cost.cpu * cpu_share;
            let memory_hourly = cost.memory * memory_share;
            let other_hourly = other * (cpu_share + memory_share) / 2.0;
            let hourly = cpu_hourly + memory_hourly + other_hourly;
            PodCost {
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
                node: node.to_string(),
                cpu_hourly,
                memory_hourly,
                other_hourly,
                hourly,
                monthly: hourly * HOURS_PER_MONTH,
                cpu_basis,
                memory_basis,
            }
        })
        .collect()
}

/// Normalized shares from (request, usage) pairs
fn shares(weights: impl Iterator<Item = (Option<u64>, Option<u64>)>) -> Vec<(f64, AttributionBasis)> {
    let weighted: Vec<(f64, AttributionBasis)> = weights
        .map(|(request, usage)| match (request, usage) {
            (Some(r), _) => (r as f64, AttributionBasis::Request),
            (None, Some(u)) => (u as f64, AttributionBasis::Usage),
            (None, None) => (0.0, AttributionBasis::EqualSplit),
        })
        .collect();

    let total: f64 = weighted.iter().map(|(w, _)| w).sum();
    if total <= 0.0 {
        let equal = 1.0 / weighted.len() as f64;
        return weighted
            .iter()
            .map(|_| (equal, AttributionBasis::EqualSplit))
            .collect();
    }

    weighted.into_iter().map(|(w, basis)| (w / total, basis)).collect()
}
