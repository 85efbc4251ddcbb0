//! Broadcast dispatcher: fans snapshot and update messages out to every
//! registered client.
//!
//! Delivery is per client and non-blocking (see [`ClientSink`]).  A client
//! whose delivery fails is unregistered on the spot; the remaining clients
//! are served regardless.  Each broadcast works on a copy of the member list
//! taken when it starts.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::aggregate::SnapshotStore;
use super::registry::{ClientSink, ClientSubscription, DeliveryError, SubscriptionRegistry};
use super::types::{ServiceScope, Snapshot, Transition};

// ── Wire messages ─────────────────────────────────────────────────────────────

/// Messages pushed to streaming clients.
///
/// ```text
/// {"type":"snapshot","services":[...],"lastCheck":1700000000000}
/// {"type":"update","transitions":[{"service":"auth","from":"healthy","to":"unhealthy","at":...}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Snapshot(Snapshot),
    Update { transitions: Vec<Transition> },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Outcome counts of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Clients that accepted the message.
    pub delivered: usize,
    /// Clients whose delivery failed and were unregistered.
    pub dropped: usize,
    /// Scoped clients for which nothing in the message applied.
    pub skipped: usize,
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Clone freely: both fields are shared handles.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    registry: SubscriptionRegistry,
    store: SnapshotStore,
}

impl BroadcastDispatcher {
    pub fn new(registry: SubscriptionRegistry, store: SnapshotStore) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Admit a new client: queue the current full snapshot into its sink,
    /// then register it.
    ///
    /// Queueing first guarantees the snapshot precedes any update on this
    /// connection.  If a cycle completed while the client was being
    /// registered, a fresher snapshot is queued as well.
    pub async fn join(
        &self,
        connection: impl Into<String>,
        scope: Option<ServiceScope>,
        sink: Arc<dyn ClientSink>,
    ) -> Result<Arc<ClientSubscription>, DeliveryError> {
        let connection = connection.into();
        let initial = self.store.current();
        sink.deliver(Arc::new(snapshot_message(&initial, scope.as_ref())))
            .inspect_err(|e| warn!(%connection, "initial snapshot not delivered: {e}"))?;

        let subscription = self.registry.register(connection, scope, sink).await;

        let latest = self.store.current();
        if latest.cycle() != initial.cycle() {
            debug!(
                subscription_id = %subscription.id,
                cycle = latest.cycle(),
                "cycle completed during join, resending snapshot"
            );
            self.send_snapshot(&subscription, &latest).await?;
        }
        Ok(subscription)
    }

    /// Send a full snapshot to one client, honouring its scope.
    pub async fn send_snapshot(
        &self,
        subscription: &ClientSubscription,
        snapshot: &Snapshot,
    ) -> Result<(), DeliveryError> {
        let message = Arc::new(snapshot_message(snapshot, subscription.scope.as_ref()));
        self.deliver_or_evict(subscription, message).await
    }

    /// Send the current snapshot to one client (client-requested refresh).
    pub async fn send_current(&self, subscription: &ClientSubscription) -> Result<(), DeliveryError> {
        let snapshot = self.store.current();
        self.send_snapshot(subscription, &snapshot).await
    }

    /// Push a full snapshot to every registered client.
    pub async fn broadcast_snapshot(&self, snapshot: &Snapshot) -> DispatchReport {
        let members = self.registry.members().await;
        let shared = Arc::new(ServerMessage::Snapshot(snapshot.clone()));
        let mut report = DispatchReport::default();

        for subscription in &members {
            let message = match &subscription.scope {
                None => shared.clone(),
                Some(scope) => Arc::new(ServerMessage::Snapshot(snapshot.scoped(scope))),
            };
            self.tally(&mut report, subscription, message).await;
        }
        debug!(?report, "snapshot broadcast");
        report
    }

    /// Push an update message to every client that follows at least one of
    /// the transitioned services.  An empty slice sends nothing.
    pub async fn broadcast_transitions(&self, transitions: &[Transition]) -> DispatchReport {
        let mut report = DispatchReport::default();
        if transitions.is_empty() {
            return report;
        }

        let members = self.registry.members().await;
        let shared = Arc::new(ServerMessage::Update { transitions: transitions.to_vec() });

        for subscription in &members {
            let message = match &subscription.scope {
                None => shared.clone(),
                Some(scope) => {
                    let relevant: Vec<Transition> = transitions
                        .iter()
                        .filter(|t| scope.contains(&t.service))
                        .cloned()
                        .collect();
                    if relevant.is_empty() {
                        report.skipped += 1;
                        continue;
                    }
                    Arc::new(ServerMessage::Update { transitions: relevant })
                }
            };
            self.tally(&mut report, subscription, message).await;
        }
        debug!(?report, transitions = transitions.len(), "update broadcast");
        report
    }

    async fn tally(
        &self,
        report: &mut DispatchReport,
        subscription: &ClientSubscription,
        message: Arc<ServerMessage>,
    ) {
        match self.deliver_or_evict(subscription, message).await {
            Ok(()) => report.delivered += 1,
            Err(_) => report.dropped += 1,
        }
    }

    async fn deliver_or_evict(
        &self,
        subscription: &ClientSubscription,
        message: Arc<ServerMessage>,
    ) -> Result<(), DeliveryError> {
        match subscription.deliver(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    connection = %subscription.connection,
                    "delivery failed, dropping client: {e}"
                );
                self.registry.unregister(subscription.id).await;
                Err(e)
            }
        }
    }
}

fn snapshot_message(snapshot: &Snapshot, scope: Option<&ServiceScope>) -> ServerMessage {
    match scope {
        None => ServerMessage::Snapshot(snapshot.clone()),
        Some(scope) => ServerMessage::Snapshot(snapshot.scoped(scope)),
    }
}
