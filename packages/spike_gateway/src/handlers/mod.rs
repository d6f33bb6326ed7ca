pub mod engine;
pub mod health;

// Re-export all handlers for easy route registration
pub use engine::{
    engine_connection, engine_full_status, engine_passthrough, engine_select, engine_status,
};
pub use health::{health_handler, health_live_handler, metrics_handler};

use axum::{
    Router,
    routing::{get, post},
};

/// All gateway routes, before layers and the static-file fallback.
pub(crate) fn routes() -> Router<crate::AppState> {
    Router::new()
        // Engine routes
        .route("/api/engine/{engine}/status", get(engine_status))
        .route("/api/engine/{engine}/fullstatus", get(engine_full_status))
        .route("/api/engine/{engine}/connection", post(engine_connection))
        .route("/api/engine/{engine}/passthrough", post(engine_passthrough))
        .route("/api/engine/{engine}/select", post(engine_select))
        // Status feed
        .route("/api/ws", get(crate::ws::status_feed_handler))
        // Health endpoints
        .route("/health", get(health_handler))
        .route("/health/live", get(health_live_handler))
        .route("/metrics", get(metrics_handler))
}
