//! Agent configuration

use anyhow::Result;
use guard_lib::{AdvisorConfig, CleanupConfig, HealthConfig, MonitorConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration, read from `KUBEGUARD_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Cluster name attached to every log event
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON snapshot read at the start of every cycle
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// JSON pricing document
    #[serde(default = "default_pricing_path")]
    pub pricing_path: PathBuf,

    /// Seconds between evaluation cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Seconds before a running cycle is abandoned
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    /// Utilization samples kept for the cost forecast
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default = "default_low_utilization_threshold")]
    pub low_utilization_threshold: f64,

    #[serde(default = "default_idle_utilization_threshold")]
    pub idle_utilization_threshold: f64,

    /// Age in days after which finished pods are cleanup candidates
    #[serde(default = "default_stale_pod_retention_days")]
    pub stale_pod_retention_days: u32,

    /// Comma-separated namespaces excluded from cleanup
    #[serde(default)]
    pub protected_namespaces: Vec<String>,

    /// Container restarts above which a pod counts as restarting
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: u32,

    /// Api-server round trip (ms) at or above which it counts as unhealthy
    #[serde(default = "default_api_latency_threshold_ms")]
    pub api_latency_threshold_ms: f64,

    #[serde(default = "default_usage_threshold_percent")]
    pub usage_threshold_percent: f64,
}

fn default_cluster_name() -> String {
    "default".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/var/lib/kubeguard/snapshot.json")
}

fn default_pricing_path() -> PathBuf {
    PathBuf::from("/etc/kubeguard/pricing.json")
}

fn default_interval() -> u64 {
    300
}

fn default_cycle_timeout() -> u64 {
    60
}

fn default_history_window() -> usize {
    24
}

fn default_low_utilization_threshold() -> f64 {
    0.30
}

fn default_idle_utilization_threshold() -> f64 {
    0.05
}

fn default_stale_pod_retention_days() -> u32 {
    7
}

fn default_restart_threshold() -> u32 {
    5
}

fn default_api_latency_threshold_ms() -> f64 {
    1000.0
}

fn default_usage_threshold_percent() -> f64 {
    80.0
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("KUBEGUARD"))
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                environment
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("protected_namespaces"),
            )
            .build()?;

        let agent: AgentConfig = config.try_deserialize()?;
        agent.validate()?;
        Ok(agent)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            anyhow::bail!("interval_secs must be positive");
        }
        if self.cycle_timeout_secs == 0 {
            anyhow::bail!("cycle_timeout_secs must be positive");
        }
        if !(0.0..=1.0).contains(&self.idle_utilization_threshold)
            || !(0.0..=1.0).contains(&self.low_utilization_threshold)
            || self.idle_utilization_threshold > self.low_utilization_threshold
        {
            anyhow::bail!(
                "utilization thresholds must satisfy 0 <= idle ({}) <= low ({}) <= 1",
                self.idle_utilization_threshold,
                self.low_utilization_threshold
            );
        }
        if self.api_latency_threshold_ms <= 0.0 {
            anyhow::bail!("api_latency_threshold_ms must be positive");
        }
        if !(0.0..=100.0).contains(&self.usage_threshold_percent) {
            anyhow::bail!(
                "usage_threshold_percent must be within 0-100, got {}",
                self.usage_threshold_percent
            );
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.interval_secs),
            cycle_timeout: Duration::from_secs(self.cycle_timeout_secs),
            history_window: self.history_window,
            ..Default::default()
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            restart_threshold: self.restart_threshold,
            api_latency_threshold_ms: self.api_latency_threshold_ms,
            usage_threshold_percent: self.usage_threshold_percent,
        }
    }

    pub fn advisor_config(&self) -> AdvisorConfig {
        AdvisorConfig {
            low_utilization_threshold: self.low_utilization_threshold,
            idle_utilization_threshold: self.idle_utilization_threshold,
            ..Default::default()
        }
    }

    pub fn cleanup_config(&self) -> CleanupConfig {
        CleanupConfig {
            retention_days: self.stale_pod_retention_days,
            protected_namespaces: self.protected_namespaces.clone(),
        }
    }
}
