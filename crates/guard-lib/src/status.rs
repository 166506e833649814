//! Agent status tracking for liveness and readiness probes
//!
//! The agent is ready once a first evaluation cycle has completed and turns
//! unhealthy after several consecutive failed cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed cycles after which the agent reports unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Healthy,
    /// Recent cycles failed but fewer than the unhealthy threshold
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: AgentState,
    pub completed_cycles: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct StatusState {
    completed_cycles: u64,
    consecutive_failures: u32,
    last_cycle_at: Option<DateTime<Utc>>,
    last_score: Option<u8>,
    last_error: Option<String>,
}

/// Shared record of cycle outcomes. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct AgentStatus {
    state: Arc<RwLock<StatusState>>,
}

impl AgentStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, captured_at: DateTime<Utc>, score: u8) {
        let mut state = self.state.write().await;
        state.completed_cycles += 1;
        state.consecutive_failures = 0;
        state.last_cycle_at = Some(captured_at);
        state.last_score = Some(score);
        state.last_error = None;
    }

    /// Returns the number of consecutive failures including this one
    pub async fn record_failure(&self, error: impl Into<String>) -> u32 {
        let mut state = self.state.write().await;
        state.consecutive_failures += 1;
        state.last_error = Some(error.into());
        state.consecutive_failures
    }

    pub async fn health(&self) -> StatusResponse {
        let state = self.state.read().await;
        let status = match state.consecutive_failures {
            0 => AgentState::Healthy,
            n if n < UNHEALTHY_AFTER_FAILURES => AgentState::Degraded,
            _ => AgentState::Unhealthy,
        };
        StatusResponse {
            status,
            completed_cycles: state.completed_cycles,
            consecutive_failures: state.consecutive_failures,
            last_cycle_at: state.last_cycle_at,
            last_score: state.last_score,
            last_error: state.last_error.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let health = self.health().await;

        if health.completed_cycles == 0 {
            ReadinessResponse {
                ready: false,
                reason: Some("No evaluation cycle completed yet".to_string()),
            }
        } else if health.status == AgentState::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{} consecutive evaluation cycles failed",
                    health.consecutive_failures
                )),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}
