//! Axum-based HTTP channel: health routes and the WebSocket stream.
//!
//! Implements [`Component`] so it runs next to the poll scheduler: `run()`
//! drives the axum event loop and the shared [`CancellationToken`] is wired
//! to axum's graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET  /health             : current snapshot (always 200)
//! GET  /health/{service}   : one entry, 404 for unknown names
//! GET  /ready              : 200 when all healthy, 503 otherwise
//! POST /health/refresh     : request an immediate poll cycle (202)
//! GET  /ws/health          : WebSocket stream (snapshot, then updates)
//! ```
//!
//! Every route sits behind the [`RequestGuard`] middleware.

mod api;
pub mod guard;
mod ws;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::subsystems::monitor::{BroadcastDispatcher, RefreshTrigger};
use crate::subsystems::runtime::{Component, ComponentFuture};

pub use guard::{AllowAll, GuardDecision, RequestGuard};

// ── Shared request state ──────────────────────────────────────────────────────

/// Axum router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone: all fields are reference-counted.
#[derive(Clone)]
pub(crate) struct AxumState {
    /// Channel identifier used in log spans.
    pub channel_id: Arc<str>,
    pub dispatcher: BroadcastDispatcher,
    pub refresh: RefreshTrigger,
    /// Outbound queue depth per WebSocket client.
    pub client_buffer: usize,
    pub guard: Arc<dyn RequestGuard>,
    /// Cancelled on shutdown; open sockets close when it fires.
    pub shutdown: CancellationToken,
}

// ── AxumChannel ───────────────────────────────────────────────────────────────

pub struct AxumChannel {
    channel_id: String,
    bind_addr: String,
    dispatcher: BroadcastDispatcher,
    refresh: RefreshTrigger,
    client_buffer: usize,
    guard: Arc<dyn RequestGuard>,
}

impl AxumChannel {
    pub fn new(
        channel_id: impl Into<String>,
        bind_addr: impl Into<String>,
        dispatcher: BroadcastDispatcher,
        refresh: RefreshTrigger,
        client_buffer: usize,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            dispatcher,
            refresh,
            client_buffer,
            guard: Arc::new(AllowAll),
        }
    }

    /// Replace the default [`AllowAll`] guard.
    pub fn with_guard(mut self, guard: Arc<dyn RequestGuard>) -> Self {
        self.guard = guard;
        self
    }
}

impl Component for AxumChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(*self, shutdown))
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

async fn run_axum(channel: AxumChannel, shutdown: CancellationToken) -> Result<(), AppError> {
    let AxumChannel { channel_id, bind_addr, dispatcher, refresh, client_buffer, guard } = channel;

    let axum_state = AxumState {
        channel_id: Arc::from(channel_id.as_str()),
        dispatcher,
        refresh,
        client_buffer,
        guard,
        shutdown: shutdown.clone(),
    };

    let router = build_router(axum_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("axum bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "axum channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("axum server error: {e}")))?;

    info!(%channel_id, "axum channel shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/health",           get(api::health))
        .route("/health/refresh",   post(api::refresh))
        .route("/health/{service}", get(api::service_health))
        .route("/ready",            get(api::ready))
        .route("/ws/health",        get(ws::upgrade))
        .layer(middleware::from_fn_with_state(state.clone(), guard::enforce))
        .with_state(state)
}
