//! Cluster snapshot data model
//!
//! A [`ClusterSnapshot`] is the read-only input of one evaluation cycle. A
//! listing the collector could not obtain is `None`: a missing node or pod
//! listing makes the snapshot unusable, every other missing listing only
//! leaves its category unknown.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Namespace hosting the control-plane and cluster add-on pods
pub const KUBE_SYSTEM: &str = "kube-system";

/// Well-known node labels
pub mod labels {
    pub const INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
    pub const INSTANCE_TYPE_BETA: &str = "beta.kubernetes.io/instance-type";
    pub const REGION: &str = "topology.kubernetes.io/region";
    pub const REGION_BETA: &str = "failure-domain.beta.kubernetes.io/region";
}

/// Point-in-time view of the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub captured_at: DateTime<Utc>,
    pub nodes: Option<Vec<Node>>,
    pub pods: Option<Vec<Pod>>,
    /// Result of the api-server round trip made while capturing
    pub api_server: Option<ApiServerProbe>,
    /// Pods of the kube-system namespace
    pub system_pods: Option<Vec<Pod>>,
    pub services: Option<Vec<Service>>,
    pub endpoints: Option<Vec<Endpoints>>,
    pub ingress_controllers: Option<Vec<Deployment>>,
    pub network_policies: Option<Vec<ObjectRef>>,
    pub node_metrics: Option<Vec<NodeMetrics>>,
    pub pod_metrics: Option<Vec<PodMetrics>>,
    pub config_maps: Option<Vec<ConfigMap>>,
    /// Recent cluster utilization, oldest first. Supplied by the caller.
    #[serde(default)]
    pub utilization_history: Vec<UtilizationSample>,
    /// Recent per-node and per-pod usage, including this snapshot's when
    /// the caller records it
    #[serde(default)]
    pub usage_window: UsageWindow,
}

impl ClusterSnapshot {
    /// Node usage keyed by node name, `None` when metrics were not collected
    pub fn node_usage_index(&self) -> Option<HashMap<&str, &ResourceUsage>> {
        self.node_metrics
            .as_ref()
            .map(|metrics| metrics.iter().map(|m| (m.name.as_str(), &m.usage)).collect())
    }

    /// Pod usage keyed by `namespace/name`, `None` when metrics were not collected
    pub fn pod_usage_index(&self) -> Option<HashMap<String, &ResourceUsage>> {
        self.pod_metrics.as_ref().map(|metrics| {
            metrics
                .iter()
                .map(|m| (object_key(&m.namespace, &m.name), &m.usage))
                .collect()
        })
    }

    /// Replace the utilization history, keeping everything else
    pub fn with_history(mut self, history: Vec<UtilizationSample>) -> Self {
        self.utilization_history = history;
        self
    }
}

/// Composite `namespace/name` key used for set and map lookups
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// `None` when the node did not report allocatable capacity
    pub allocatable: Option<NodeResources>,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

impl Node {
    pub fn instance_type(&self) -> Option<&str> {
        self.labels
            .get(labels::INSTANCE_TYPE)
            .or_else(|| self.labels.get(labels::INSTANCE_TYPE_BETA))
            .map(String::as_str)
    }

    pub fn region(&self) -> Option<&str> {
        self.labels
            .get(labels::REGION)
            .or_else(|| self.labels.get(labels::REGION_BETA))
            .map(String::as_str)
    }

    pub fn has_condition(&self, kind: NodeConditionType) -> bool {
        self.conditions.iter().any(|c| c.kind == kind && c.status)
    }

    pub fn is_ready(&self) -> bool {
        self.has_condition(NodeConditionType::Ready)
    }

    /// Pressure and availability conditions currently true on the node
    pub fn pressure_conditions(&self) -> Vec<NodeConditionType> {
        self.conditions
            .iter()
            .filter(|c| c.status && c.kind.is_pressure())
            .map(|c| c.kind)
            .collect()
    }
}

/// Allocatable node capacity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub storage_bytes: u64,
    #[serde(default)]
    pub gpu: Option<GpuResources>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuResources {
    pub count: u32,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: NodeConditionType,
    pub status: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeConditionType {
    Ready,
    MemoryPressure,
    DiskPressure,
    #[serde(rename = "PIDPressure")]
    PidPressure,
    NetworkUnavailable,
}

impl NodeConditionType {
    pub fn is_pressure(&self) -> bool {
        !matches!(self, NodeConditionType::Ready)
    }
}

impl std::fmt::Display for NodeConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeConditionType::Ready => write!(f, "Ready"),
            NodeConditionType::MemoryPressure => write!(f, "MemoryPressure"),
            NodeConditionType::DiskPressure => write!(f, "DiskPressure"),
            NodeConditionType::PidPressure => write!(f, "PIDPressure"),
            NodeConditionType::NetworkUnavailable => write!(f, "NetworkUnavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PodPhase {
    Running,
    Pending,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Running => "Running",
            PodPhase::Pending => "Pending",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }

    /// Succeeded and Failed pods no longer hold node resources
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waiting reason reported by a container stuck restarting
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Pod {
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }

    pub fn is_crash_looping(&self) -> bool {
        self.containers
            .iter()
            .any(|c| c.waiting_reason.as_deref() == Some(CRASH_LOOP_BACK_OFF))
    }

    pub fn max_restart_count(&self) -> u32 {
        self.containers.iter().map(|c| c.restart_count).max().unwrap_or(0)
    }

    /// Sum of declared CPU requests, `None` if no container declares one
    pub fn cpu_request(&self) -> Option<u64> {
        sum_declared(self.containers.iter().map(|c| c.requests.cpu_millicores))
    }

    /// Sum of declared memory requests, `None` if no container declares one
    pub fn memory_request(&self) -> Option<u64> {
        sum_declared(self.containers.iter().map(|c| c.requests.memory_bytes))
    }

    /// Names of ConfigMaps referenced through volumes or container environment
    pub fn config_map_references(&self) -> impl Iterator<Item = &str> {
        self.volumes
            .iter()
            .filter_map(|v| v.config_map.as_deref())
            .chain(
                self.containers
                    .iter()
                    .flat_map(|c| c.config_map_refs.iter().map(String::as_str)),
            )
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

fn sum_declared(values: impl Iterator<Item = Option<u64>>) -> Option<u64> {
    values.fold(None, |acc, value| match (acc, value) {
        (None, v) => v,
        (Some(a), Some(v)) => Some(a + v),
        (a, None) => a,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub waiting_reason: Option<String>,
    #[serde(default)]
    pub requests: ResourceRequests,
    /// ConfigMaps named by `env[].valueFrom.configMapKeyRef` or `envFrom`
    #[serde(default)]
    pub config_map_refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequests {
    pub cpu_millicores: Option<u64>,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(default)]
    pub config_map: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApiServerProbe {
    pub reachable: bool,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub subsets: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub desired_replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub name: String,
    pub usage: ResourceUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    pub namespace: String,
    pub name: String,
    pub usage: ResourceUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMap {
    pub namespace: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Cluster-wide utilization ratio (0.0-1.0) observed at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub timestamp: DateTime<Utc>,
    pub utilization: f64,
}

/// Bounded usage samples per node (by name) and per pod (by `namespace/name`),
/// oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    #[serde(default)]
    pub nodes: BTreeMap<String, VecDeque<ResourceUsage>>,
    #[serde(default)]
    pub pods: BTreeMap<String, VecDeque<ResourceUsage>>,
}

impl UsageWindow {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.pods.is_empty()
    }

    /// Append the snapshot's metrics, keeping at most `capacity` samples per
    /// object. Objects absent from the snapshot's metrics are forgotten; a
    /// listing that was not collected leaves its side untouched.
    pub fn record(&mut self, snapshot: &ClusterSnapshot, capacity: usize) {
        if let Some(metrics) = &snapshot.node_metrics {
            let current: Vec<(String, ResourceUsage)> =
                metrics.iter().map(|m| (m.name.clone(), m.usage)).collect();
            push_samples(&mut self.nodes, current, capacity);
        }
        if let Some(metrics) = &snapshot.pod_metrics {
            let current: Vec<(String, ResourceUsage)> = metrics
                .iter()
                .map(|m| (object_key(&m.namespace, &m.name), m.usage))
                .collect();
            push_samples(&mut self.pods, current, capacity);
        }
    }

    /// Highest CPU and highest memory seen for a node across the window
    pub fn node_peak(&self, name: &str) -> Option<ResourceUsage> {
        self.nodes.get(name).and_then(peak)
    }

    pub fn pod_peak(&self, key: &str) -> Option<ResourceUsage> {
        self.pods.get(key).and_then(peak)
    }
}

fn push_samples(
    window: &mut BTreeMap<String, VecDeque<ResourceUsage>>,
    current: Vec<(String, ResourceUsage)>,
    capacity: usize,
) {
    let live: HashSet<&str> = current.iter().map(|(k, _)| k.as_str()).collect();
    window.retain(|key, _| live.contains(key.as_str()));

    for (key, usage) in current {
        let samples = window.entry(key).or_default();
        samples.push_back(usage);
        while samples.len() > capacity.max(1) {
            samples.pop_front();
        }
    }
}

fn peak(samples: &VecDeque<ResourceUsage>) -> Option<ResourceUsage> {
    samples.iter().copied().reduce(|a, b| ResourceUsage {
        cpu_millicores: a.cpu_millicores.max(b.cpu_millicores),
        memory_bytes: a.memory_bytes.max(b.memory_bytes),
    })
}
