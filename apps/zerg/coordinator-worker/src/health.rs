//! Health and admin HTTP endpoints.
//!
//! - `/health`, `/healthz`: liveness
//! - `/ready`, `/readyz`: coordinator health report, 503 when degraded
//! - `/stats`: aggregate subsystem counters
//! - `/metrics`: Prometheus text format

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use domain_coordination::{Coordinator, CoordinatorStats, HealthReport};
use serde::Serialize;
use serde_json::{json, Value};

use crate::metrics;

#[derive(Clone)]
pub struct HealthState {
    pub coordinator: Arc<Coordinator>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        coordinator: Arc<Coordinator>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe backed by [`Coordinator::health_check`]
pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.coordinator.health_check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn stats_handler(
    State(state): State<HealthState>,
) -> Result<Json<CoordinatorStats>, (StatusCode, Json<Value>)> {
    state.coordinator.get_stats().await.map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
    })
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        )
            .into_response(),
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
