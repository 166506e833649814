//! Observability infrastructure for the guard agent
//!
//! Provides:
//! - Prometheus gauges exported from each cycle report
//! - Structured JSON logging of domain events with tracing

use crate::cycle::CycleReport;
use crate::health::{HealthIssue, Severity};
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter, Gauge, GaugeVec,
    Histogram, IntCounter,
};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::{info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<ClusterMetricsInner> = OnceLock::new();

/// Gauge family whose label sets are replaced as a whole by every cycle
struct ReplacedGaugeVec {
    gauges: GaugeVec,
    exported: Mutex<HashSet<Vec<String>>>,
}

impl ReplacedGaugeVec {
    fn new(gauges: GaugeVec) -> Self {
        Self {
            gauges,
            exported: Mutex::new(HashSet::new()),
        }
    }

    /// Set every series in `values`, then remove the label sets of the
    /// previous call that are absent now. A concurrent scrape sees either
    /// the old or the new value of a series, never an empty family.
    fn replace(&self, values: Vec<(Vec<String>, f64)>) {
        let mut exported = self.exported.lock().unwrap_or_else(PoisonError::into_inner);
        let mut current = HashSet::with_capacity(values.len());

        for (labels, value) in values {
            let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
            self.gauges.with_label_values(&label_refs).set(value);
            current.insert(labels);
        }
        for stale in exported.difference(&current) {
            let label_refs: Vec<&str> = stale.iter().map(String::as_str).collect();
            // Already gone is fine
            let _ = self.gauges.remove_label_values(&label_refs);
        }

        *exported = current;
    }
}

fn series<const N: usize>(labels: [&str; N], value: f64) -> (Vec<String>, f64) {
    (labels.iter().map(|l| l.to_string()).collect(), value)
}

struct ClusterMetricsInner {
    node_ready: ReplacedGaugeVec,
    pod_status: ReplacedGaugeVec,
    namespace_resource_usage: ReplacedGaugeVec,
    namespace_cost_per_hour: ReplacedGaugeVec,
    resource_efficiency_ratio: ReplacedGaugeVec,
    cluster_health_score: Gauge,
    potential_monthly_savings: Gauge,
    cycle_duration_seconds: Histogram,
    cycle_failures_total: IntCounter,
}

impl ClusterMetricsInner {
    fn new() -> Self {
        Self {
            node_ready: ReplacedGaugeVec::new(register_gauge_vec!(
                "kubeguard_node_ready",
                "Whether the node reports Ready (1) or not (0)",
                &["node"]
            )
            .expect("Failed to register node_ready")),

            pod_status: ReplacedGaugeVec::new(register_gauge_vec!(
                "kubeguard_pod_status",
                "Number of pods per namespace and phase",
                &["namespace", "phase"]
            )
            .expect("Failed to register pod_status")),

            namespace_resource_usage: ReplacedGaugeVec::new(register_gauge_vec!(
                "kubeguard_namespace_resource_usage",
                "Observed namespace usage (CPU millicores, memory bytes)",
                &["namespace", "resource"]
            )
            .expect("Failed to register namespace_resource_usage")),

            namespace_cost_per_hour: ReplacedGaugeVec::new(register_gauge_vec!(
                "kubeguard_namespace_cost_per_hour",
                "Hourly cost attributed to the namespace",
                &["namespace"]
            )
            .expect("Failed to register namespace_cost_per_hour")),

            resource_efficiency_ratio: ReplacedGaugeVec::new(register_gauge_vec!(
                "kubeguard_resource_efficiency_ratio",
                "Namespace usage divided by requests",
                &["namespace", "resource"]
            )
            .expect("Failed to register resource_efficiency_ratio")),

            cluster_health_score: register_gauge!(
                "kubeguard_cluster_health_score",
                "Composite cluster health score (0-100)"
            )
            .expect("Failed to register cluster_health_score"),

            potential_monthly_savings: register_gauge!(
                "kubeguard_potential_monthly_savings",
                "Monthly savings available from optimization recommendations"
            )
            .expect("Failed to register potential_monthly_savings"),

            cycle_duration_seconds: register_histogram!(
                "kubeguard_cycle_duration_seconds",
                "Time spent on one evaluation cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycle_failures_total: register_int_counter!(
                "kubeguard_cycle_failures_total",
                "Evaluation cycles that failed or timed out"
            )
            .expect("Failed to register cycle_failures_total"),
        }
    }
}

/// Handle to the process-wide cluster gauges. Clones share the same metrics.
#[derive(Clone)]
pub struct ClusterMetrics {
    _private: (),
}

impl Default for ClusterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ClusterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ClusterMetricsInner {
        GLOBAL_METRICS.get_or_init(ClusterMetricsInner::new)
    }

    /// Replace every gauge with the values of one cycle report. Label sets
    /// of earlier cycles that this report no longer carries are removed so
    /// deleted objects stop being exported.
    pub fn record_cycle(&self, report: &CycleReport) {
        let m = self.inner();
        let health = &report.health;

        let not_ready: HashSet<&str> = health.nodes.not_ready_nodes.iter().map(String::as_str).collect();
        m.node_ready.replace(
            report
                .costs
                .nodes
                .iter()
                .map(|node| {
                    let ready = if not_ready.contains(node.node.as_str()) { 0.0 } else { 1.0 };
                    series([node.node.as_str()], ready)
                })
                .collect(),
        );

        let mut pod_status = Vec::new();
        let mut resource_usage = Vec::new();
        let mut efficiency = Vec::new();
        for (namespace, ns) in &health.namespaces {
            let pods = &ns.pod_status;
            for (phase, count) in [
                ("Running", pods.running_pods),
                ("Pending", pods.pending_pods),
                ("Succeeded", pods.succeeded_pods),
                ("Failed", pods.failed_pods),
                ("Unknown", pods.unknown_pods),
            ] {
                pod_status.push(series([namespace.as_str(), phase], count as f64));
            }

            if let Some(usage) = &ns.resource_usage {
                resource_usage.push(series([namespace.as_str(), "cpu"], usage.cpu_usage_millicores as f64));
                resource_usage.push(series([namespace.as_str(), "memory"], usage.memory_usage_bytes as f64));
                if let Some(ratio) = usage.cpu_efficiency() {
                    efficiency.push(series([namespace.as_str(), "cpu"], ratio));
                }
                if let Some(ratio) = usage.memory_efficiency() {
                    efficiency.push(series([namespace.as_str(), "memory"], ratio));
                }
            }
        }
        m.pod_status.replace(pod_status);
        m.namespace_resource_usage.replace(resource_usage);
        m.resource_efficiency_ratio.replace(efficiency);

        m.namespace_cost_per_hour.replace(
            report
                .costs
                .namespaces
                .iter()
                .map(|ns| series([ns.namespace.as_str()], ns.hourly))
                .collect(),
        );

        m.cluster_health_score.set(f64::from(health.score));
        m.potential_monthly_savings
            .set(report.optimization.potential_savings);
        m.cycle_duration_seconds
            .observe(report.duration.as_secs_f64());
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures_total.inc();
    }
}

/// Structured logger for domain events
///
/// Every event carries an `event` field and the cluster name so log
/// pipelines can filter on them.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("default")
    }
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64) {
        info!(
            event = "agent_started",
            cluster = %self.cluster,
            agent_version = %version,
            interval_secs = interval_secs,
            "Guard agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Guard agent shutting down"
        );
    }

    pub fn log_cycle_completed(&self, report: &CycleReport) {
        info!(
            event = "cycle_completed",
            cluster = %self.cluster,
            score = report.health.score,
            issues = report.health.issues.len(),
            total_hourly = report.costs.total_hourly,
            potential_savings = report.optimization.potential_savings,
            cleanup_candidates = report.cleanup.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Evaluation cycle completed"
        );
    }

    pub fn log_cycle_failed(&self, error: &str, consecutive_failures: u32) {
        warn!(
            event = "cycle_failed",
            cluster = %self.cluster,
            error = %error,
            consecutive_failures = consecutive_failures,
            "Evaluation cycle failed"
        );
    }

    /// Critical issues log at warn, everything else at info
    pub fn log_health_issue(&self, issue: &HealthIssue) {
        let object = match (&issue.namespace, &issue.name) {
            (Some(ns), Some(name)) => format!("{}/{}", ns, name),
            (None, Some(name)) => name.clone(),
            _ => String::new(),
        };
        match issue.severity {
            Severity::Critical => {
                warn!(
                    event = "health_issue",
                    cluster = %self.cluster,
                    severity = %issue.severity,
                    resource = %issue.resource,
                    object = %object,
                    message = %issue.message,
                    "Critical health issue"
                );
            }
            _ => {
                info!(
                    event = "health_issue",
                    cluster = %self.cluster,
                    severity = %issue.severity,
                    resource = %issue.resource,
                    object = %object,
                    message = %issue.message,
                    "Health issue"
                );
            }
        }
    }

    pub fn log_cleanup_deleted(&self, resource_type: &str, namespace: &str, name: &str) {
        info!(
            event = "cleanup_deleted",
            cluster = %self.cluster,
            resource_type = %resource_type,
            namespace = %namespace,
            name = %name,
            "Deleted unused resource"
        );
    }

    pub fn log_cleanup_failed(&self, resource_type: &str, namespace: &str, name: &str, error: &str) {
        warn!(
            event = "cleanup_failed",
            cluster = %self.cluster,
            resource_type = %resource_type,
            namespace = %namespace,
            name = %name,
            error = %error,
            "Failed to delete resource, continuing"
        );
    }

    pub fn log_pricing_gap(&self, node: &str, detail: &str) {
        warn!(
            event = "pricing_gap",
            cluster = %self.cluster,
            node = %node,
            detail = %detail,
            "Node cost degraded by a pricing gap"
        );
    }
}
