//! WebSocket streaming endpoint.
//!
//! ```text
//! GET /ws/health?client_id=<id>&services=auth,llm
//! ```
//!
//! Each socket is served by one task.  The task owns the socket and drains a
//! bounded outbound queue; the dispatcher only ever touches the queue.  The
//! registry holds the queue's only sender, so once the client is dropped
//! (evicted for backpressure, or replaced by a reconnect with the same
//! `client_id`) the queue closes and the task closes the socket.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::subsystems::monitor::{ServerMessage, ServiceScope, SubscriptionId};

use super::AxumState;

#[derive(Debug, Default, Deserialize)]
pub(super) struct StreamParams {
    client_id: Option<String>,
    /// Comma-separated service names; absent or blank follows everything.
    services: Option<String>,
}

/// Text frames a client may send.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum ClientFrame {
    HealthCheck,
    Ping,
    Other,
}

#[derive(Deserialize)]
struct TypedFrame {
    #[serde(rename = "type")]
    kind: String,
}

impl ClientFrame {
    /// Accepts the bare event name or a JSON object carrying it in `type`.
    pub(super) fn parse(text: &str) -> Self {
        let text = text.trim();
        let kind = match serde_json::from_str::<TypedFrame>(text) {
            Ok(frame) => frame.kind,
            Err(_) => text.to_string(),
        };
        match kind.as_str() {
            "request-health-check" => Self::HealthCheck,
            "ping" => Self::Ping,
            _ => Self::Other,
        }
    }
}

/// Connection key: the client-supplied id, or a fresh one per socket.
///
/// A new socket with an existing key replaces the old one, so anyone who
/// knows a `client_id` can disconnect its owner.  Deployments that expose
/// the stream beyond trusted callers should install a [`RequestGuard`] that
/// rejects upgrades whose `client_id` does not belong to the authenticated
/// principal.
///
/// [`RequestGuard`]: super::RequestGuard
fn connection_key(params: &StreamParams) -> String {
    params
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// GET /ws/health
pub(super) async fn upgrade(
    State(state): State<AxumState>,
    Query(params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let connection = connection_key(&params);
    let scope = params.services.as_deref().and_then(ServiceScope::parse_csv);
    ws.on_upgrade(move |socket| serve_socket(state, socket, connection, scope))
}

async fn serve_socket(
    state: AxumState,
    mut socket: WebSocket,
    connection: String,
    scope: Option<ServiceScope>,
) {
    let (tx, mut rx) = mpsc::channel::<Arc<ServerMessage>>(state.client_buffer);

    let id = match state.dispatcher.join(connection.clone(), scope, Arc::new(tx)).await {
        Ok(subscription) => subscription.id,
        Err(e) => {
            warn!(channel_id = %state.channel_id, %connection, "join failed: {e}");
            return;
        }
    };
    info!(channel_id = %state.channel_id, %connection, subscription_id = %id, "stream client connected");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            outbound = rx.recv() => match outbound {
                Some(message) => {
                    if let Err(e) = send_message(&mut socket, &message).await {
                        debug!(subscription_id = %id, "socket write failed: {e}");
                        break;
                    }
                }
                None => {
                    debug!(subscription_id = %id, "dropped by dispatcher, closing socket");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },

            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => handle_text(&state, id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscription_id = %id, "socket read failed: {e}");
                    break;
                }
            },
        }
    }

    state.dispatcher.registry().unregister(id).await;
    info!(channel_id = %state.channel_id, %connection, subscription_id = %id, "stream client disconnected");
}

async fn handle_text(state: &AxumState, id: SubscriptionId, text: &str) {
    match ClientFrame::parse(text) {
        ClientFrame::HealthCheck => {
            // A replaced or evicted client is no longer registered; its
            // queue is about to close, so there is nothing to answer.
            if let Some(subscription) = state.dispatcher.registry().get(id).await {
                let _ = state.dispatcher.send_current(&subscription).await;
            }
        }
        ClientFrame::Ping => {}
        ClientFrame::Other => debug!(subscription_id = %id, frame = %text, "ignoring client frame"),
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    match message.to_json() {
        Ok(text) => socket.send(Message::Text(text.into())).await,
        Err(e) => {
            error!("failed to serialize server message: {e}");
            Ok(())
        }
    }
}
