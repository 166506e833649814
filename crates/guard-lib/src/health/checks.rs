//! Per-category health checks
//!
//! Each check reads only the snapshot listings it needs and returns a fresh
//! status. Checks whose inputs were not collected return `None`.

use crate::models::{
    object_key, ApiServerProbe, ClusterSnapshot, Node, NodeConditionType, Pod, PodPhase,
    ResourceUsage,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::HealthConfig;

/// Points removed per node carrying any pressure condition
const PRESSURE_PENALTY: f64 = 5.0;

/// Points removed per crash-looping pod
const CRASH_LOOP_PENALTY: f64 = 2.0;

/// Points removed per pod with excessive restarts
const RESTART_PENALTY: f64 = 1.0;

/// Cap on the api-server latency penalty
const MAX_LATENCY_PENALTY: f64 = 20.0;

/// Milliseconds of api-server latency per penalty point
const LATENCY_PENALTY_DIVISOR: f64 = 50.0;

/// Control-plane components tracked by the control-plane check
const CONTROL_PLANE_COMPONENTS: usize = 5;

/// `k8s-app` label values of the supported CNI daemonsets
const CNI_APPS: &[&str] = &["calico-node", "flannel", "weave-net", "cilium"];

/// `k8s-app` label value of cluster DNS pods
const DNS_APP: &str = "kube-dns";

/// `app` label values of the supported ingress controllers
const INGRESS_APPS: &[&str] = &["ingress-nginx", "traefik", "istio-ingressgateway"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeHealthStatus {
    pub total_nodes: usize,
    pub ready_nodes: usize,
    pub memory_pressure_nodes: usize,
    pub disk_pressure_nodes: usize,
    pub pid_pressure_nodes: usize,
    pub network_unavailable_nodes: usize,
    pub not_ready_nodes: Vec<String>,
    /// Conditions currently true, per node
    pub node_conditions: BTreeMap<String, Vec<NodeConditionType>>,
    pub score: f64,
}

pub fn check_nodes(nodes: &[Node]) -> NodeHealthStatus {
    let mut status = NodeHealthStatus {
        total_nodes: nodes.len(),
        ..Default::default()
    };
    let mut pressured = 0usize;

    for node in nodes {
        if node.is_ready() {
            status.ready_nodes += 1;
        } else {
            status.not_ready_nodes.push(node.name.clone());
        }

        let pressure = node.pressure_conditions();
        for condition in &pressure {
            match condition {
                NodeConditionType::MemoryPressure => status.memory_pressure_nodes += 1,
                NodeConditionType::DiskPressure => status.disk_pressure_nodes += 1,
                NodeConditionType::PidPressure => status.pid_pressure_nodes += 1,
                NodeConditionType::NetworkUnavailable => status.network_unavailable_nodes += 1,
                NodeConditionType::Ready => {}
            }
        }
        if !pressure.is_empty() {
            pressured += 1;
        }

        let mut active: Vec<NodeConditionType> = node
            .conditions
            .iter()
            .filter(|c| c.status)
            .map(|c| c.kind)
            .collect();
        active.sort();
        status.node_conditions.insert(node.name.clone(), active);
    }

    status.not_ready_nodes.sort();
    status.score = if status.total_nodes == 0 {
        100.0
    } else {
        let ready = 100.0 * status.ready_nodes as f64 / status.total_nodes as f64;
        (ready - PRESSURE_PENALTY * pressured as f64).max(0.0)
    };

    status
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodHealthStatus {
    pub total_pods: usize,
    pub running_pods: usize,
    pub pending_pods: usize,
    pub succeeded_pods: usize,
    pub failed_pods: usize,
    pub unknown_pods: usize,
    /// `namespace/name` of pods with a container over the restart threshold
    pub restarting_pods: Vec<String>,
    pub crash_looping_pods: Vec<String>,
    pub pending: Vec<String>,
    pub failed: Vec<String>,
    pub unknown: Vec<String>,
    pub pods_per_node: BTreeMap<String, usize>,
    pub score: f64,
}

/// Pod health over any subset of pods (whole cluster or one namespace)
pub fn check_pods<'a>(pods: impl IntoIterator<Item = &'a Pod>, restart_threshold: u32) -> PodHealthStatus {
    let mut status = PodHealthStatus::default();

    for pod in pods {
        status.total_pods += 1;

        if let Some(node) = &pod.node_name {
            *status.pods_per_node.entry(node.clone()).or_insert(0) += 1;
        }

        match pod.phase {
            PodPhase::Running => status.running_pods += 1,
            PodPhase::Pending => {
                status.pending_pods += 1;
                status.pending.push(pod.key());
            }
            PodPhase::Succeeded => status.succeeded_pods += 1,
            PodPhase::Failed => {
                status.failed_pods += 1;
                status.failed.push(pod.key());
            }
            PodPhase::Unknown => {
                status.unknown_pods += 1;
                status.unknown.push(pod.key());
            }
        }

        if pod.max_restart_count() > restart_threshold {
            status.restarting_pods.push(pod.key());
        }
        if pod.is_crash_looping() {
            status.crash_looping_pods.push(pod.key());
        }
    }

    for list in [
        &mut status.restarting_pods,
        &mut status.crash_looping_pods,
        &mut status.pending,
        &mut status.failed,
        &mut status.unknown,
    ] {
        list.sort();
    }

    status.score = if status.total_pods == 0 {
        100.0
    } else {
        let running = 100.0 * status.running_pods as f64 / status.total_pods as f64;
        (running
            - CRASH_LOOP_PENALTY * status.crash_looping_pods.len() as f64
            - RESTART_PENALTY * status.restarting_pods.len() as f64)
            .max(0.0)
    };

    status
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneStatus {
    pub api_server_reachable: bool,
    pub api_server_healthy: bool,
    pub api_server_latency_ms: f64,
    pub controller_healthy: bool,
    pub scheduler_healthy: bool,
    pub etcd_healthy: bool,
    pub core_dns_healthy: bool,
    pub overall_healthy: bool,
    pub score: f64,
}

impl ControlPlaneStatus {
    /// Unhealthy components by display name
    pub fn unhealthy_components(&self) -> Vec<&'static str> {
        [
            ("kube-controller-manager", self.controller_healthy),
            ("kube-scheduler", self.scheduler_healthy),
            ("etcd", self.etcd_healthy),
            ("coredns", self.core_dns_healthy),
        ]
        .into_iter()
        .filter(|(_, healthy)| !healthy)
        .map(|(name, _)| name)
        .collect()
    }
}

pub fn check_control_plane(
    probe: Option<&ApiServerProbe>,
    system_pods: Option<&[Pod]>,
    config: &HealthConfig,
) -> Option<ControlPlaneStatus> {
    let probe = probe?;
    let system_pods = system_pods?;

    // A component without any matching pod (managed control plane) counts as healthy
    let component_healthy = |needle: &str| {
        system_pods
            .iter()
            .filter(|p| p.name.contains(needle))
            .all(|p| p.phase == PodPhase::Running)
    };

    let slow = probe.latency_ms >= config.api_latency_threshold_ms;
    let mut status = ControlPlaneStatus {
        api_server_reachable: probe.reachable,
        api_server_healthy: probe.reachable && !slow,
        api_server_latency_ms: probe.latency_ms,
        controller_healthy: component_healthy("kube-controller-manager"),
        scheduler_healthy: component_healthy("kube-scheduler"),
        etcd_healthy: component_healthy("etcd"),
        core_dns_healthy: component_healthy("coredns"),
        ..Default::default()
    };

    let healthy = [
        status.api_server_healthy,
        status.controller_healthy,
        status.scheduler_healthy,
        status.etcd_healthy,
        status.core_dns_healthy,
    ]
    .iter()
    .filter(|h| **h)
    .count();

    status.overall_healthy = healthy == CONTROL_PLANE_COMPONENTS;
    status.score = if status.overall_healthy {
        100.0
    } else {
        let mut score = 100.0 * healthy as f64 / CONTROL_PLANE_COMPONENTS as f64;
        if probe.reachable && slow {
            score -= (probe.latency_ms / LATENCY_PENALTY_DIVISOR).min(MAX_LATENCY_PENALTY);
        }
        score.max(0.0)
    };

    Some(status)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub cni_healthy: bool,
    pub dns_resolution_ok: bool,
    pub service_endpoints_healthy: bool,
    pub ingress_healthy: bool,
    /// Selector-bearing services with no ready endpoint subset
    pub services_without_endpoints: Vec<String>,
    /// Ingress controllers with fewer ready replicas than desired
    pub degraded_ingress_controllers: Vec<String>,
    /// `None` when network policies were not listed
    pub network_policies_count: Option<usize>,
    pub score: f64,
}

pub fn check_network(snapshot: &ClusterSnapshot) -> Option<NetworkStatus> {
    let system_pods = snapshot.system_pods.as_deref()?;
    let services = snapshot.services.as_deref()?;
    let endpoints = snapshot.endpoints.as_deref()?;
    let ingress_controllers = snapshot.ingress_controllers.as_deref()?;

    let labelled_running = |values: &[&str]| {
        system_pods
            .iter()
            .filter(|p| {
                p.labels
                    .get("k8s-app")
                    .is_some_and(|app| values.contains(&app.as_str()))
            })
            .all(|p| p.phase == PodPhase::Running)
    };

    let subsets: HashMap<String, u32> = endpoints
        .iter()
        .map(|e| (object_key(&e.namespace, &e.name), e.subsets))
        .collect();

    let mut services_without_endpoints: Vec<String> = services
        .iter()
        .filter(|svc| !svc.selector.is_empty())
        .map(|svc| object_key(&svc.namespace, &svc.name))
        .filter(|key| subsets.get(key).copied().unwrap_or(0) == 0)
        .collect();
    services_without_endpoints.sort();

    let mut degraded_ingress_controllers: Vec<String> = ingress_controllers
        .iter()
        .filter(|d| {
            d.labels
                .get("app")
                .is_some_and(|app| INGRESS_APPS.contains(&app.as_str()))
        })
        .filter(|d| d.ready_replicas < d.desired_replicas)
        .map(|d| object_key(&d.namespace, &d.name))
        .collect();
    degraded_ingress_controllers.sort();

    let mut status = NetworkStatus {
        cni_healthy: labelled_running(CNI_APPS),
        dns_resolution_ok: labelled_running(&[DNS_APP]),
        service_endpoints_healthy: services_without_endpoints.is_empty(),
        ingress_healthy: degraded_ingress_controllers.is_empty(),
        services_without_endpoints,
        degraded_ingress_controllers,
        network_policies_count: snapshot.network_policies.as_ref().map(Vec::len),
        score: 0.0,
    };

    let passed = [
        status.cni_healthy,
        status.dns_resolution_ok,
        status.service_endpoints_healthy,
        status.ingress_healthy,
    ]
    .iter()
    .filter(|ok| **ok)
    .count();
    status.score = 100.0 * passed as f64 / 4.0;

    Some(status)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageStatus {
    /// Percent of allocatable CPU in use across measured nodes, `None` when
    /// their allocatable CPU sums to zero
    pub cluster_cpu_usage: Option<f64>,
    pub cluster_memory_usage: Option<f64>,
    pub high_cpu_nodes: Vec<String>,
    pub high_memory_nodes: Vec<String>,
    /// Nodes present in the listing but absent from metrics
    pub nodes_without_metrics: Vec<String>,
    /// Metered nodes that did not report allocatable capacity
    pub nodes_without_allocatable: Vec<String>,
    pub high_usage_namespaces: Vec<String>,
    pub score: f64,
}

/// `100 - 2 * excess` for each resource above the threshold
pub fn usage_score(cpu_percent: f64, memory_percent: f64, threshold: f64) -> f64 {
    (100.0 - (cpu_percent - threshold).max(0.0) * 2.0 - (memory_percent - threshold).max(0.0) * 2.0)
        .max(0.0)
}

pub fn check_resource_usage(
    nodes: &[Node],
    node_usage: Option<&HashMap<&str, &ResourceUsage>>,
    namespaces: &BTreeMap<String, NamespaceHealth>,
    config: &HealthConfig,
) -> Option<ResourceUsageStatus> {
    let node_usage = node_usage?;
    let mut status = ResourceUsageStatus::default();
    let (mut cpu_used, mut cpu_total, mut mem_used, mut mem_total) = (0u64, 0u64, 0u64, 0u64);
    let mut measured = 0usize;

    for node in nodes {
        let Some(usage) = node_usage.get(node.name.as_str()) else {
            status.nodes_without_metrics.push(node.name.clone());
            continue;
        };
        let Some(allocatable) = &node.allocatable else {
            status.nodes_without_allocatable.push(node.name.clone());
            continue;
        };
        measured += 1;
        cpu_used += usage.cpu_millicores;
        cpu_total += allocatable.cpu_millicores;
        mem_used += usage.memory_bytes;
        mem_total += allocatable.memory_bytes;

        let above = |p: Option<f64>| p.is_some_and(|p| p > config.usage_threshold_percent);
        if above(percent(usage.cpu_millicores, allocatable.cpu_millicores)) {
            status.high_cpu_nodes.push(node.name.clone());
        }
        if above(percent(usage.memory_bytes, allocatable.memory_bytes)) {
            status.high_memory_nodes.push(node.name.clone());
        }
    }

    // Metrics exist but cover none of the nodes: usage is unknown, not 0%
    if measured == 0 && !nodes.is_empty() {
        return None;
    }

    status.cluster_cpu_usage = percent(cpu_used, cpu_total);
    status.cluster_memory_usage = percent(mem_used, mem_total);
    if status.cluster_cpu_usage.is_none() && status.cluster_memory_usage.is_none() {
        return None;
    }
    status.high_usage_namespaces = namespaces
        .iter()
        .filter(|(_, ns)| {
            ns.resource_usage.as_ref().is_some_and(|u| {
                u.cpu_percent.unwrap_or(0.0) > config.usage_threshold_percent
                    || u.memory_percent.unwrap_or(0.0) > config.usage_threshold_percent
            })
        })
        .map(|(name, _)| name.clone())
        .collect();
    // An unknown resource adds no penalty
    status.score = usage_score(
        status.cluster_cpu_usage.unwrap_or(0.0),
        status.cluster_memory_usage.unwrap_or(0.0),
        config.usage_threshold_percent,
    );

    Some(status)
}

fn percent(used: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| 100.0 * used as f64 / total as f64)
}

/// Usage of a namespace's live pods against their requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceUsage {
    pub cpu_usage_millicores: u64,
    pub memory_usage_bytes: u64,
    pub cpu_requests_millicores: u64,
    pub memory_requests_bytes: u64,
    /// Usage as a percent of requests, `None` when nothing is requested
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    /// `None` when no resource has requests to compare against
    pub score: Option<f64>,
}

impl NamespaceUsage {
    /// Usage divided by requests (1.0 means requests match usage)
    pub fn cpu_efficiency(&self) -> Option<f64> {
        self.cpu_percent.map(|p| p / 100.0)
    }

    pub fn memory_efficiency(&self) -> Option<f64> {
        self.memory_percent.map(|p| p / 100.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceHealth {
    pub pod_status: PodHealthStatus,
    /// `None` when pod metrics were not collected
    pub resource_usage: Option<NamespaceUsage>,
    pub score: u8,
}

pub fn check_namespaces(
    pods: &[Pod],
    pod_usage: Option<&HashMap<String, &ResourceUsage>>,
    config: &HealthConfig,
) -> BTreeMap<String, NamespaceHealth> {
    let mut by_namespace: BTreeMap<&str, Vec<&Pod>> = BTreeMap::new();
    for pod in pods {
        by_namespace.entry(pod.namespace.as_str()).or_default().push(pod);
    }

    by_namespace
        .into_iter()
        .map(|(namespace, pods)| {
            let pod_status = check_pods(pods.iter().copied(), config.restart_threshold);
            let resource_usage = pod_usage.map(|usage| namespace_usage(&pods, usage, config));
            let score = super::score::weighted_score([
                (super::Category::Pod.weight(), Some(pod_status.score)),
                (
                    super::Category::ResourceUsage.weight(),
                    resource_usage.as_ref().and_then(|u| u.score),
                ),
            ]);
            (
                namespace.to_string(),
                NamespaceHealth {
                    pod_status,
                    resource_usage,
                    score,
                },
            )
        })
        .collect()
}

fn namespace_usage(
    pods: &[&Pod],
    usage: &HashMap<String, &ResourceUsage>,
    config: &HealthConfig,
) -> NamespaceUsage {
    let mut ns = NamespaceUsage::default();
    for pod in pods.iter().filter(|p| !p.phase.is_terminal()) {
        if let Some(u) = usage.get(&pod.key()) {
            ns.cpu_usage_millicores += u.cpu_millicores;
            ns.memory_usage_bytes += u.memory_bytes;
        }
        ns.cpu_requests_millicores += pod.cpu_request().unwrap_or(0);
        ns.memory_requests_bytes += pod.memory_request().unwrap_or(0);
    }

    ns.cpu_percent = percent(ns.cpu_usage_millicores, ns.cpu_requests_millicores);
    ns.memory_percent = percent(ns.memory_usage_bytes, ns.memory_requests_bytes);
    if ns.cpu_percent.is_some() || ns.memory_percent.is_some() {
        ns.score = Some(usage_score(
            ns.cpu_percent.unwrap_or(0.0),
            ns.memory_percent.unwrap_or(0.0),
            config.usage_threshold_percent,
        ));
    }
    ns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, pod, SnapshotBuilder, GIB};

    #[test]
    fn test_node_score_ready_ratio_minus_pressure() {
        let nodes = vec![
            node("a").build(),
            node("b").build(),
            node("c").not_ready().memory_pressure().build(),
        ];

        let status = check_nodes(&nodes);

        assert_eq!(status.ready_nodes, 2);
        assert_eq!(status.memory_pressure_nodes, 1);
        assert_eq!(status.not_ready_nodes, vec!["c".to_string()]);
        assert!((status.score - (100.0 * 2.0 / 3.0 - 5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_node_score_empty_cluster_is_full() {
        assert_eq!(check_nodes(&[]).score, 100.0);
    }

    #[test]
    fn test_node_score_floors_at_zero() {
        let nodes: Vec<Node> = (0..30)
            .map(|i| node(&format!("n{i}")).not_ready().disk_pressure().build())
            .collect();
        assert_eq!(check_nodes(&nodes).score, 0.0);
    }

    #[test]
    fn test_pod_score_penalties() {
        let pods = vec![
            pod("default", "a").build(),
            pod("default", "b").crash_looping().build(),
            pod("default", "c").restarts(6).build(),
            pod("default", "d").phase(PodPhase::Pending).build(),
        ];

        let status = check_pods(&pods, 5);

        assert_eq!(status.running_pods, 3);
        assert_eq!(status.crash_looping_pods, vec!["default/b".to_string()]);
        assert_eq!(status.restarting_pods, vec!["default/c".to_string()]);
        assert_eq!(status.pending, vec!["default/d".to_string()]);
        assert!((status.score - (75.0 - 2.0 - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_restart_threshold_is_exclusive() {
        let pods = vec![pod("default", "a").restarts(5).build()];
        assert!(check_pods(&pods, 5).restarting_pods.is_empty());
    }

    #[test]
    fn test_control_plane_all_healthy() {
        let snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        let status = check_control_plane(
            snapshot.api_server.as_ref(),
            snapshot.system_pods.as_deref(),
            &HealthConfig::default(),
        )
        .unwrap();

        assert!(status.overall_healthy);
        assert_eq!(status.score, 100.0);
    }

    #[test]
    fn test_control_plane_slow_api_server_penalized() {
        let probe = ApiServerProbe {
            reachable: true,
            latency_ms: 1500.0,
        };
        let system_pods = vec![pod("kube-system", "etcd-master").phase(PodPhase::Failed).build()];

        let status = check_control_plane(Some(&probe), Some(&system_pods), &HealthConfig::default()).unwrap();

        assert!(!status.api_server_healthy);
        assert!(!status.etcd_healthy);
        assert_eq!(status.unhealthy_components(), vec!["etcd"]);
        // 3 of 5 healthy, minus min(20, 1500 / 50)
        assert!((status.score - (60.0 - 20.0)).abs() < 1e-9);
    }

    #[test]
    fn test_control_plane_unknown_without_system_pods() {
        let probe = ApiServerProbe {
            reachable: true,
            latency_ms: 10.0,
        };
        assert!(check_control_plane(Some(&probe), None, &HealthConfig::default()).is_none());
    }

    #[test]
    fn test_network_detects_service_without_endpoints() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        snapshot
            .services
            .as_mut()
            .unwrap()
            .push(crate::testing::service("shop", "checkout"));

        let status = check_network(&snapshot).unwrap();

        assert!(!status.service_endpoints_healthy);
        assert_eq!(status.services_without_endpoints, vec!["shop/checkout".to_string()]);
        assert_eq!(status.score, 75.0);
    }

    #[test]
    fn test_network_unknown_without_services() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        snapshot.services = None;
        assert!(check_network(&snapshot).is_none());
    }

    #[test]
    fn test_usage_score_penalizes_above_threshold() {
        assert_eq!(usage_score(65.0, 72.0, 80.0), 100.0);
        assert_eq!(usage_score(90.0, 85.0, 80.0), 70.0);
        assert_eq!(usage_score(100.0, 100.0, 80.0), 20.0);
    }

    #[test]
    fn test_resource_usage_unknown_when_metrics_cover_no_node() {
        let nodes = vec![node("a").build()];
        let empty = HashMap::new();
        let status = check_resource_usage(&nodes, Some(&empty), &BTreeMap::new(), &HealthConfig::default());
        assert!(status.is_none());
    }

    #[test]
    fn test_namespace_usage_against_requests() {
        let pods = vec![pod("shop", "api").requests(1000, 1 << 30).build()];
        let usage = ResourceUsage {
            cpu_millicores: 900,
            memory_bytes: 1 << 29,
        };
        let mut index = HashMap::new();
        index.insert("shop/api".to_string(), &usage);

        let namespaces = check_namespaces(&pods, Some(&index), &HealthConfig::default());
        let shop = &namespaces["shop"];
        let usage = shop.resource_usage.as_ref().unwrap();

        assert_eq!(usage.cpu_percent, Some(90.0));
        assert_eq!(usage.memory_percent, Some(50.0));
        assert_eq!(usage.score, Some(80.0));
        assert_eq!(usage.cpu_efficiency(), Some(0.9));
    }

    fn set_system_pod_phase(snapshot: &mut ClusterSnapshot, prefix: &str, phase: PodPhase) {
        for p in snapshot.system_pods.iter_mut().flatten() {
            if p.name.starts_with(prefix) {
                p.phase = phase;
            }
        }
    }

    fn control_plane(snapshot: &ClusterSnapshot, config: &HealthConfig) -> ControlPlaneStatus {
        check_control_plane(snapshot.api_server.as_ref(), snapshot.system_pods.as_deref(), config).unwrap()
    }

    #[test]
    fn test_network_cni_not_running() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        set_system_pod_phase(&mut snapshot, "calico-node", PodPhase::Failed);

        let status = check_network(&snapshot).unwrap();

        assert!(!status.cni_healthy);
        assert!(status.dns_resolution_ok);
        assert_eq!(status.score, 75.0);
    }

    #[test]
    fn test_network_dns_not_running() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        set_system_pod_phase(&mut snapshot, "coredns", PodPhase::Pending);

        let status = check_network(&snapshot).unwrap();

        assert!(status.cni_healthy);
        assert!(!status.dns_resolution_ok);
        assert_eq!(status.score, 75.0);
    }

    #[test]
    fn test_network_ingress_below_desired_replicas() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        snapshot.ingress_controllers.as_mut().unwrap()[0].ready_replicas = 1;

        let status = check_network(&snapshot).unwrap();

        assert!(!status.ingress_healthy);
        assert_eq!(
            status.degraded_ingress_controllers,
            vec!["ingress-nginx/ingress-nginx-controller".to_string()]
        );
        assert_eq!(status.score, 75.0);
    }

    #[test]
    fn test_network_without_cni_pods_is_healthy() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        snapshot
            .system_pods
            .as_mut()
            .unwrap()
            .retain(|p| !p.name.starts_with("calico-node"));

        let status = check_network(&snapshot).unwrap();

        assert!(status.cni_healthy);
        assert_eq!(status.score, 100.0);
    }

    #[test]
    fn test_control_plane_api_server_unreachable() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        snapshot.api_server = Some(ApiServerProbe {
            reachable: false,
            latency_ms: 0.0,
        });

        let status = control_plane(&snapshot, &HealthConfig::default());

        assert!(!status.api_server_reachable);
        assert!(!status.api_server_healthy);
        assert!(!status.overall_healthy);
        // 4 of 5 healthy, no latency penalty without a round trip
        assert_eq!(status.score, 80.0);
        assert!(status.unhealthy_components().is_empty());
    }

    #[test]
    fn test_control_plane_latency_threshold_is_inclusive() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        let config = HealthConfig::default();

        snapshot.api_server = Some(ApiServerProbe {
            reachable: true,
            latency_ms: 999.0,
        });
        assert_eq!(control_plane(&snapshot, &config).score, 100.0);

        snapshot.api_server = Some(ApiServerProbe {
            reachable: true,
            latency_ms: 1000.0,
        });
        let status = control_plane(&snapshot, &config);
        assert!(status.api_server_reachable);
        assert!(!status.api_server_healthy);
        // 80 minus min(20, 1000 / 50)
        assert_eq!(status.score, 60.0);
    }

    #[test]
    fn test_control_plane_latency_penalty_below_cap() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        snapshot.api_server = Some(ApiServerProbe {
            reachable: true,
            latency_ms: 600.0,
        });
        let config = HealthConfig {
            api_latency_threshold_ms: 500.0,
            ..Default::default()
        };

        let status = control_plane(&snapshot, &config);

        // 80 minus 600 / 50
        assert!((status.score - 68.0).abs() < 1e-9);
    }

    #[test]
    fn test_control_plane_scheduler_not_running() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        set_system_pod_phase(&mut snapshot, "kube-scheduler", PodPhase::Pending);

        let status = control_plane(&snapshot, &HealthConfig::default());

        assert!(!status.scheduler_healthy);
        assert!(status.controller_healthy);
        assert_eq!(status.unhealthy_components(), vec!["kube-scheduler"]);
        assert_eq!(status.score, 80.0);
    }

    #[test]
    fn test_control_plane_controller_manager_not_running() {
        let mut snapshot = SnapshotBuilder::healthy_cluster(1, 0).build();
        set_system_pod_phase(&mut snapshot, "kube-controller-manager", PodPhase::Failed);

        let status = control_plane(&snapshot, &HealthConfig::default());

        assert!(!status.controller_healthy);
        assert_eq!(status.unhealthy_components(), vec!["kube-controller-manager"]);
        assert_eq!(status.score, 80.0);
    }

    fn usage_of(cpu_millicores: u64, memory_bytes: u64) -> ResourceUsage {
        ResourceUsage {
            cpu_millicores,
            memory_bytes,
        }
    }

    #[test]
    fn test_metered_node_without_allocatable_reported_separately() {
        let nodes = vec![node("a").build(), node("b").no_allocatable().build(), node("c").build()];
        let (a, b) = (usage_of(2000, 8 * GIB), usage_of(100, GIB));
        let index: HashMap<&str, &ResourceUsage> = [("a", &a), ("b", &b)].into_iter().collect();

        let status = check_resource_usage(&nodes, Some(&index), &BTreeMap::new(), &HealthConfig::default()).unwrap();

        assert_eq!(status.nodes_without_allocatable, vec!["b".to_string()]);
        assert_eq!(status.nodes_without_metrics, vec!["c".to_string()]);
        assert_eq!(status.cluster_cpu_usage, Some(50.0));
        assert_eq!(status.cluster_memory_usage, Some(50.0));
    }

    #[test]
    fn test_zero_allocatable_cpu_is_unknown_not_idle() {
        let mut a = node("a").build();
        a.allocatable.as_mut().unwrap().cpu_millicores = 0;
        let usage = usage_of(3000, 8 * GIB);
        let index: HashMap<&str, &ResourceUsage> = [("a", &usage)].into_iter().collect();

        let status = check_resource_usage(&[a.clone()], Some(&index), &BTreeMap::new(), &HealthConfig::default())
            .unwrap();

        assert_eq!(status.cluster_cpu_usage, None);
        assert_eq!(status.cluster_memory_usage, Some(50.0));
        assert!(status.high_cpu_nodes.is_empty());
        assert_eq!(status.score, 100.0);

        a.allocatable.as_mut().unwrap().memory_bytes = 0;
        assert!(check_resource_usage(&[a], Some(&index), &BTreeMap::new(), &HealthConfig::default()).is_none());
    }
}
