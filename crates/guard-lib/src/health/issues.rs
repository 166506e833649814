//! Issue identification over computed health statuses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Category, ClusterHealth, HealthConfig};

/// Usage percent above which high usage is a warning rather than info
const CRITICAL_USAGE_PERCENT: f64 = 95.0;

/// Issue severity. Ordering ranks critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: Severity,
    /// Kind of the affected resource (Node, Pod, Service, ...)
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub timestamp: DateTime<Utc>,
}

struct IssueSink {
    timestamp: DateTime<Utc>,
    issues: Vec<HealthIssue>,
}

impl IssueSink {
    fn push(
        &mut self,
        severity: Severity,
        resource: &str,
        object: Option<&str>,
        message: String,
        suggestion: &str,
    ) {
        // `namespace/name` keys are split back into their parts
        let (namespace, name) = match object.map(|o| o.split_once('/')) {
            Some(Some((ns, name))) => (Some(ns.to_string()), Some(name.to_string())),
            Some(None) => (None, object.map(str::to_string)),
            None => (None, None),
        };
        self.issues.push(HealthIssue {
            severity,
            resource: resource.to_string(),
            namespace,
            name,
            message,
            suggestion: Some(suggestion.to_string()),
            timestamp: self.timestamp,
        });
    }
}

/// Derive the severity-ranked issue list from a health report
pub fn identify_issues(health: &ClusterHealth, config: &HealthConfig) -> Vec<HealthIssue> {
    let mut sink = IssueSink {
        timestamp: health.timestamp,
        issues: Vec::new(),
    };

    node_issues(health, &mut sink);
    pod_issues(health, config, &mut sink);
    control_plane_issues(health, &mut sink);
    network_issues(health, &mut sink);
    usage_issues(health, config, &mut sink);

    for category in health.scores.unknown() {
        sink.push(
            Severity::Warning,
            "Cluster",
            None,
            format!("{} health could not be evaluated; excluded from the score", category),
            unknown_suggestion(category),
        );
    }
    if health.namespaces.values().any(|ns| ns.resource_usage.is_none()) {
        sink.push(
            Severity::Info,
            "Cluster",
            None,
            "Namespace resource usage is unknown: pod metrics unavailable".to_string(),
            "Verify that metrics-server is installed and serving pod metrics",
        );
    }

    let mut issues = sink.issues;
    issues.sort_by(|a, b| {
        (a.severity, &a.resource, &a.namespace, &a.name, &a.message)
            .cmp(&(b.severity, &b.resource, &b.namespace, &b.name, &b.message))
    });
    issues
}

fn unknown_suggestion(category: Category) -> &'static str {
    match category {
        Category::ControlPlane => "Verify API access to kube-system pods",
        Category::Network => "Verify API access to services, endpoints and deployments",
        Category::ResourceUsage => "Verify that metrics-server is installed and serving node metrics",
        Category::Node | Category::Pod => "Verify API access to the cluster",
    }
}

fn node_issues(health: &ClusterHealth, sink: &mut IssueSink) {
    for name in &health.nodes.not_ready_nodes {
        sink.push(
            Severity::Critical,
            "Node",
            Some(name.as_str()),
            format!("Node {} is not Ready", name),
            "Check kubelet status and node events",
        );
    }
    for (name, conditions) in &health.nodes.node_conditions {
        for condition in conditions.iter().filter(|c| c.is_pressure()) {
            sink.push(
                Severity::Critical,
                "Node",
                Some(name.as_str()),
                format!("Node {} reports {}", name, condition),
                "Drain or resize the node and investigate resource consumers",
            );
        }
    }
}

fn pod_issues(health: &ClusterHealth, config: &HealthConfig, sink: &mut IssueSink) {
    let pods = &health.pods;
    for key in &pods.crash_looping_pods {
        sink.push(
            Severity::Critical,
            "Pod",
            Some(key.as_str()),
            format!("Pod {} is in CrashLoopBackOff", key),
            "Inspect container logs and recent configuration changes",
        );
    }
    for key in &pods.restarting_pods {
        sink.push(
            Severity::Warning,
            "Pod",
            Some(key.as_str()),
            format!("Pod {} has a container restarted more than {} times", key, config.restart_threshold),
            "Check liveness probes and memory limits",
        );
    }
    for (keys, state) in [(&pods.failed, "Failed"), (&pods.pending, "Pending"), (&pods.unknown, "Unknown")] {
        for key in keys {
            sink.push(
                Severity::Warning,
                "Pod",
                Some(key.as_str()),
                format!("Pod {} is {}", key, state),
                "Describe the pod to find the scheduling or runtime cause",
            );
        }
    }
    if pods.succeeded_pods > 0 {
        sink.push(
            Severity::Info,
            "Pod",
            None,
            format!("{} completed pods lower the running ratio", pods.succeeded_pods),
            "Remove completed pods or set a TTL on finished jobs",
        );
    }
}

fn control_plane_issues(health: &ClusterHealth, sink: &mut IssueSink) {
    let Some(cp) = &health.control_plane else {
        return;
    };
    if !cp.api_server_reachable {
        sink.push(
            Severity::Warning,
            "ControlPlane",
            Some("kube-apiserver"),
            "API server is unreachable".to_string(),
            "Check api-server pods and load balancer health",
        );
    } else if !cp.api_server_healthy {
        sink.push(
            Severity::Warning,
            "ControlPlane",
            Some("kube-apiserver"),
            format!("API server responded slowly ({:.0} ms)", cp.api_server_latency_ms),
            "Check api-server load and etcd latency",
        );
    }
    for component in cp.unhealthy_components() {
        sink.push(
            Severity::Warning,
            "ControlPlane",
            Some(component),
            format!("Control-plane component {} is not running", component),
            "Inspect the component's pods in kube-system",
        );
    }
}

fn network_issues(health: &ClusterHealth, sink: &mut IssueSink) {
    let Some(net) = &health.network else {
        return;
    };
    if !net.cni_healthy {
        sink.push(
            Severity::Warning,
            "Network",
            Some("cni"),
            "CNI pods are not all running".to_string(),
            "Inspect the CNI daemonset in kube-system",
        );
    }
    if !net.dns_resolution_ok {
        sink.push(
            Severity::Warning,
            "Network",
            Some("kube-dns"),
            "Cluster DNS pods are not all running".to_string(),
            "Inspect CoreDNS pods and their logs",
        );
    }
    for key in &net.services_without_endpoints {
        sink.push(
            Severity::Warning,
            "Service",
            Some(key.as_str()),
            format!("Service {} has no endpoints", key),
            "Check that the selector matches ready pods",
        );
    }
    for key in &net.degraded_ingress_controllers {
        sink.push(
            Severity::Warning,
            "Deployment",
            Some(key.as_str()),
            format!("Ingress controller {} has fewer ready replicas than desired", key),
            "Inspect the ingress controller rollout",
        );
    }
}

fn usage_issues(health: &ClusterHealth, config: &HealthConfig, sink: &mut IssueSink) {
    let Some(usage) = &health.resource_usage else {
        return;
    };
    for (resource, percent) in [("CPU", usage.cluster_cpu_usage), ("memory", usage.cluster_memory_usage)] {
        let Some(percent) = percent else {
            continue;
        };
        if percent > config.usage_threshold_percent {
            let severity = if percent > CRITICAL_USAGE_PERCENT {
                Severity::Warning
            } else {
                Severity::Info
            };
            sink.push(
                severity,
                "Cluster",
                None,
                format!("Cluster {} usage at {:.1}%", resource, percent),
                "Add capacity or rightsize workloads",
            );
        }
    }
    for (nodes, resource) in [(&usage.high_cpu_nodes, "CPU"), (&usage.high_memory_nodes, "memory")] {
        for name in nodes {
            sink.push(
                Severity::Info,
                "Node",
                Some(name.as_str()),
                format!("Node {} {} usage above {:.0}%", name, resource, config.usage_threshold_percent),
                "Spread workloads or add nodes",
            );
        }
    }
    for namespace in &usage.high_usage_namespaces {
        sink.push(
            Severity::Info,
            "Namespace",
            Some(namespace.as_str()),
            format!("Namespace {} uses more than {:.0}% of its requests", namespace, config.usage_threshold_percent),
            "Raise resource requests to match observed usage",
        );
    }
}
