//! Axum handlers for the plain-HTTP health routes.
//!
//! All handlers read the current snapshot from the store; none of them
//! probes anything.  `/health` answers 200 even when every service is down.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

use super::AxumState;

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /health
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    let snapshot = state.dispatcher.store().current();
    Json(snapshot.as_ref()).into_response()
}

/// GET /health/{service}
pub(super) async fn service_health(
    State(state): State<AxumState>,
    Path(service): Path<String>,
) -> Response {
    let snapshot = state.dispatcher.store().current();
    match snapshot.get(&service) {
        Some(entry) => Json(entry).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            json_error("not_found", format!("unknown service '{service}'")),
        )
            .into_response(),
    }
}

/// GET /ready: 200 only when every monitored service is healthy.
pub(super) async fn ready(State(state): State<AxumState>) -> Response {
    let snapshot = state.dispatcher.store().current();
    if snapshot.all_healthy() {
        (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "unhealthy": snapshot.not_healthy() })),
        )
            .into_response()
    }
}

/// POST /health/refresh: asks the scheduler for an immediate cycle.
pub(super) async fn refresh(State(state): State<AxumState>) -> Response {
    debug!(channel_id = %state.channel_id, "health refresh requested over http");
    state.refresh.trigger();
    (StatusCode::ACCEPTED, Json(json!({ "status": "refresh scheduled" }))).into_response()
}
