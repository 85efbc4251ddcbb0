//! Subscription registry: the set of connected streaming clients.
//!
//! Each client is registered under a *connection key*: the identity of the
//! physical connection as the transport sees it.  Registering a key that is
//! already present replaces the old entry instead of adding a second one, so
//! a client that reconnects with the same key never leaves a stale entry
//! behind.
//!
//! All mutations go through one `RwLock` write guard and therefore never
//! interleave.  Readers take a cheap copy of the member list
//! ([`SubscriptionRegistry::members`]) and iterate that, so a broadcast is
//! unaffected by joins and leaves that happen while it runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

use super::dispatch::ServerMessage;
use super::types::{ServiceScope, now_ms};

// ── Delivery ──────────────────────────────────────────────────────────────────

/// Why a message could not be handed to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("client connection closed")]
    Closed,

    #[error("client send buffer full")]
    Backpressure,
}

/// Outbound side of one client connection.
///
/// `deliver` must not wait on the network: it either queues the message or
/// fails immediately.  Whatever writes to the socket drains the queue on its
/// own task.
pub trait ClientSink: Send + Sync {
    fn deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError>;
}

impl ClientSink for mpsc::Sender<Arc<ServerMessage>> {
    fn deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        self.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

// ── Subscription ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One connected client.
pub struct ClientSubscription {
    pub id: SubscriptionId,
    /// Physical connection identity used for duplicate detection.
    pub connection: String,
    /// Join time, unix ms.
    pub joined_at: u64,
    /// `None` follows every service.
    pub scope: Option<ServiceScope>,
    sink: Arc<dyn ClientSink>,
}

impl ClientSubscription {
    pub fn deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        self.sink.deliver(message)
    }

    pub fn follows(&self, service: &str) -> bool {
        self.scope.as_ref().is_none_or(|s| s.contains(service))
    }
}

impl fmt::Debug for ClientSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSubscription")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("joined_at", &self.joined_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    by_id: HashMap<SubscriptionId, Arc<ClientSubscription>>,
    by_connection: HashMap<String, SubscriptionId>,
}

/// Shared registry of streaming clients.
///
/// Clone freely: it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under `connection`, replacing any entry that was
    /// registered under the same key.
    pub async fn register(
        &self,
        connection: impl Into<String>,
        scope: Option<ServiceScope>,
        sink: Arc<dyn ClientSink>,
    ) -> Arc<ClientSubscription> {
        let subscription = Arc::new(ClientSubscription {
            id: SubscriptionId::new(),
            connection: connection.into(),
            joined_at: now_ms(),
            scope,
            sink,
        });

        let mut inner = self.inner.write().await;
        if let Some(stale) = inner
            .by_connection
            .insert(subscription.connection.clone(), subscription.id)
        {
            inner.by_id.remove(&stale);
            debug!(
                connection = %subscription.connection,
                stale_id = %stale,
                "replaced existing subscription"
            );
        }
        inner.by_id.insert(subscription.id, subscription.clone());
        info!(
            subscription_id = %subscription.id,
            connection = %subscription.connection,
            total = inner.by_id.len(),
            "client registered"
        );
        subscription
    }

    /// Remove a subscription.  Returns `true` only for the call that actually
    /// removed it; later calls (or calls with a replaced id) are no-ops.
    pub async fn unregister(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(removed) = inner.by_id.remove(&id) else {
            return false;
        };
        if inner.by_connection.get(&removed.connection) == Some(&id) {
            inner.by_connection.remove(&removed.connection);
        }
        info!(
            subscription_id = %id,
            connection = %removed.connection,
            total = inner.by_id.len(),
            "client unregistered"
        );
        true
    }

    /// Copy of the current member list, ordered by join time.
    pub async fn members(&self) -> Vec<Arc<ClientSubscription>> {
        let inner = self.inner.read().await;
        let mut members: Vec<_> = inner.by_id.values().cloned().collect();
        members.sort_by_key(|s| s.joined_at);
        members
    }

    /// Call `f` for every member of a point-in-time copy of the registry.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ClientSubscription),
    {
        for member in self.members().await {
            f(&member);
        }
    }

    pub async fn get(&self, id: SubscriptionId) -> Option<Arc<ClientSubscription>> {
        self.inner.read().await.by_id.get(&id).cloned()
    }

    pub async fn contains(&self, id: SubscriptionId) -> bool {
        self.inner.read().await.by_id.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
