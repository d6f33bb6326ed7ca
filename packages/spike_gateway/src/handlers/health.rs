use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics::{EngineHealth, HealthStatus};

/// Health check endpoint - reports gateway and engine-link status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let known = state.registry.count().await as u64;
    let connected = state.registry.connected_count().await as u64;
    let metrics = state.metrics.snapshot();

    // Engines are expected to come and go; the gateway itself is degraded
    // only when every known engine is unreachable.
    let status = if known == 0 || connected > 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        engines: EngineHealth { known, connected },
        subscribers: metrics.subscribers.active,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Metrics endpoint - returns detailed gateway metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
