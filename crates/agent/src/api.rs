//! HTTP API for probes, Prometheus metrics and the latest cycle report

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use guard_lib::{AgentState, AgentStatus, CycleReport};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub status: AgentStatus,
    latest_report: Arc<RwLock<Option<Arc<CycleReport>>>>,
}

impl AppState {
    pub fn new(status: AgentStatus) -> Self {
        Self {
            status,
            latest_report: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_latest_report(&self, report: Arc<CycleReport>) {
        *self.latest_report.write().await = Some(report);
    }

    pub async fn latest_report(&self) -> Option<Arc<CycleReport>> {
        self.latest_report.read().await.clone()
    }
}

/// Health check response - returns 200 unless too many cycles failed in a row
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.status.health().await;

    let status_code = match health.status {
        AgentState::Healthy => StatusCode::OK,
        AgentState::Degraded => StatusCode::OK,
        AgentState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a cycle has completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.status.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Latest cycle report as JSON, 404 until the first cycle completes
async fn report(State(state): State<Arc<AppState>>) -> Response {
    match state.latest_report().await {
        Some(report) => (StatusCode::OK, Json(report.as_ref().clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no evaluation cycle completed yet" })),
        )
            .into_response(),
    }
}

/// Prometheus metrics endpoint, served from the default registry the
/// monitoring loop records into
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/report", get(report))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
