//! Engine-facing gateway routes: cached status reads, connection toggles,
//! and verbatim passthrough commands.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use engine_link::{ConnectionAction, passthrough_failure};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::AppState;

/// Synchronous status read from the cache; never touches the engine.
pub async fn engine_status(
    State(state): State<AppState>,
    Path(engine): Path<String>,
) -> impl IntoResponse {
    state.metrics.status_request();
    let manager = state.registry.get_or_connect(&engine).await;
    let status = manager.status_snapshot().await;
    Json(json!({
        "query": { "query": "dynamicstatus" },
        "response": { "result": "ok", "status": status },
    }))
}

/// Poll the engine for a full status report and wait for its reply.
///
/// The reply slot survives reconnects: if the link is down now, the response
/// arrives once the engine answers after the driver restores the session.
pub async fn engine_full_status(
    State(state): State<AppState>,
    Path(engine): Path<String>,
) -> impl IntoResponse {
    state.metrics.full_status_request();
    let manager = state.registry.get_or_connect(&engine).await;
    let reply = manager.request_full_status().await;
    match reply.await {
        Ok(response) => Json(response),
        // A newer request took over the reply slot.
        Err(_) => {
            state.metrics.passthrough_failure();
            Json(passthrough_failure("full status request superseded"))
        }
    }
}

/// Apply a connect/disconnect request to one engine's link.
pub async fn engine_connection(
    State(state): State<AppState>,
    Path(engine): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.metrics.connection_request();
    let action = body.get("query").and_then(Value::as_str);
    info!(engine = %engine, action = ?action, "connection request");

    match action.map(|a| a.parse::<ConnectionAction>()) {
        Some(Ok(action)) => {
            let manager = state.registry.get_or_connect(&engine).await;
            let result = manager.toggle_connection(action).await;
            Json(json!({ "query": body, "response": { "result": result } }))
        }
        Some(Err(())) => {
            state.metrics.bad_request();
            let detail = format!(
                "unrecognized connection query {}",
                action.unwrap_or_default()
            );
            Json(bad_request(body, &detail))
        }
        None => {
            state.metrics.bad_request();
            Json(bad_request(body, "invalid request format"))
        }
    }
}

/// Forward an arbitrary command body to the engine and relay its reply.
/// The command queues behind the link coming up; once sent, the engine's
/// response object comes back verbatim.
pub async fn engine_passthrough(
    State(state): State<AppState>,
    Path(engine): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.metrics.passthrough_request();
    let manager = state.registry.get_or_connect(&engine).await;
    manager.wait_until_connected().await;

    match manager.send_passthrough(body).await {
        Ok(reply) => match reply.await {
            Ok(response) => Json(response),
            Err(_) => {
                state.metrics.passthrough_failure();
                Json(passthrough_failure("passthrough request superseded"))
            }
        },
        Err(failure) => {
            state.metrics.passthrough_failure();
            Json(failure)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub selected: bool,
}

/// Choose which engine's status updates reach WebSocket subscribers.
/// Selecting one engine deselects every other.
pub async fn engine_select(
    State(state): State<AppState>,
    Path(engine): Path<String>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    if req.selected {
        state.registry.select_engine(&engine).await;
    } else {
        state.registry.deselect_engine(&engine).await;
    }
    Json(json!({ "engine": engine, "selected": req.selected }))
}

fn bad_request(body: Value, detail: &str) -> Value {
    json!({
        "query": body,
        "response": { "result": "fail", "error": "bad request", "errordetail": detail },
    })
}
