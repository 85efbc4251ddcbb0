//! Request guard: the seam where rate limiting and authentication plug in.
//!
//! The guard runs as axum middleware in front of every route, the WebSocket
//! upgrade included.  The monitor never sees a request the guard denied.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use super::AxumState;

/// Verdict of a [`RequestGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Deny { status: StatusCode, reason: String },
}

impl GuardDecision {
    pub fn deny(status: StatusCode, reason: impl Into<String>) -> Self {
        Self::Deny { status, reason: reason.into() }
    }
}

/// Inspect a request before it reaches any handler.
///
/// `check` runs on the request path, so it must be cheap and non-blocking.
///
/// For `/ws/health` the `client_id` query parameter is the reconnect key: a
/// second socket with the same id evicts the first.  An authenticating guard
/// should bind that id to the caller (deny upgrades whose `client_id` is not
/// one the principal owns).
pub trait RequestGuard: Send + Sync + 'static {
    fn check(&self, request: &Request) -> GuardDecision;
}

/// Lets every request through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl RequestGuard for AllowAll {
    fn check(&self, _request: &Request) -> GuardDecision {
        GuardDecision::Allow
    }
}

pub(super) async fn enforce(State(state): State<AxumState>, request: Request, next: Next) -> Response {
    match state.guard.check(&request) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::Deny { status, reason } => {
            warn!(
                channel_id = %state.channel_id,
                path = %request.uri().path(),
                status = status.as_u16(),
                "request denied by guard: {reason}"
            );
            (status, Json(json!({ "error": "denied", "message": reason }))).into_response()
        }
    }
}
