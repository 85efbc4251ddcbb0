//! Integration tests for the monitor pipeline: scheduler → aggregation →
//! change detection → snapshot store → dispatcher → client sinks.
//!
//! Time is paused, so every latency and interval below is exact.
//!
//! Run with:
//!   cargo test --test test_monitor_pipeline

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use pulsegate::subsystems::monitor::{
    AggregationEngine, BroadcastDispatcher, ClientSink, DeliveryError, HealthStatus,
    PollScheduler, ProbeFailure, ProbeRunner, ServerMessage, ServiceEndpoint, ServiceScope,
    Snapshot, SnapshotStore, SubscriptionRegistry, Transport, TransportFuture,
};

// ── helpers ──────────────────────────────────────────────────────────────────

/// Fake downstream fleet: each URL answers with a fixed status after a fixed
/// delay until the test flips it.
#[derive(Default)]
struct Fleet {
    replies: Mutex<HashMap<String, (Result<u16, ProbeFailure>, Duration)>>,
}

impl Fleet {
    fn set(&self, name: &str, reply: Result<u16, ProbeFailure>, delay_ms: u64) {
        self.replies
            .lock()
            .unwrap()
            .insert(url(name), (reply, Duration::from_millis(delay_ms)));
    }
}

impl Transport for Fleet {
    fn get<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        let (reply, delay) = self
            .replies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or((Err(ProbeFailure::Connection("no route".into())), Duration::ZERO));
        Box::pin(async move {
            sleep(delay).await;
            reply
        })
    }
}

fn url(name: &str) -> String {
    format!("http://{name}.internal/health")
}

fn endpoint(name: &str) -> ServiceEndpoint {
    ServiceEndpoint::new(name, url(name), Duration::from_millis(500), Duration::from_secs(1))
}

struct Pipeline {
    fleet: Arc<Fleet>,
    store: SnapshotStore,
    dispatcher: BroadcastDispatcher,
    scheduler: PollScheduler,
}

fn pipeline(names: &[&str]) -> Pipeline {
    let fleet = Arc::new(Fleet::default());
    for name in names {
        fleet.set(name, Ok(200), 20);
    }
    let endpoints: Vec<_> = names.iter().map(|n| endpoint(n)).collect();
    let store = SnapshotStore::new(Snapshot::pending(&endpoints));
    let dispatcher = BroadcastDispatcher::new(SubscriptionRegistry::new(), store.clone());
    let engine = AggregationEngine::new(ProbeRunner::new(fleet.clone()));
    let scheduler = PollScheduler::new(engine, dispatcher.clone(), endpoints).unwrap();
    Pipeline { fleet, store, dispatcher, scheduler }
}

fn client(buffer: usize) -> (Arc<dyn ClientSink>, mpsc::Receiver<Arc<ServerMessage>>) {
    let (tx, rx) = mpsc::channel(buffer);
    (Arc::new(tx), rx)
}

fn drain(rx: &mut mpsc::Receiver<Arc<ServerMessage>>) -> Vec<Arc<ServerMessage>> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// `(service, from, to)` of every transition in the update messages.
fn transitions(messages: &[Arc<ServerMessage>]) -> Vec<(String, HealthStatus, HealthStatus)> {
    messages
        .iter()
        .filter_map(|m| match &**m {
            ServerMessage::Update { transitions } => Some(transitions.clone()),
            ServerMessage::Snapshot(_) => None,
        })
        .flatten()
        .map(|t| (t.service, t.from, t.to))
        .collect()
}

// ── scenarios ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn outage_and_recovery_reach_every_client_once() {
    let p = pipeline(&["auth", "llm", "policy"]);
    let (sink_a, mut rx_a) = client(16);
    let (sink_b, mut rx_b) = client(16);
    p.dispatcher.join("a", None, sink_a).await.unwrap();
    p.dispatcher.join("b", None, sink_b).await.unwrap();

    let handle = p.scheduler.spawn();
    sleep(Duration::from_millis(500)).await; // cycle 1 done

    p.fleet.set("llm", Err(ProbeFailure::Timeout), 0);
    sleep(Duration::from_millis(1000)).await; // cycle 2 done

    p.fleet.set("llm", Ok(200), 20);
    sleep(Duration::from_millis(1100)).await; // cycle 3 done
    handle.stop().await;

    for rx in [&mut rx_a, &mut rx_b] {
        let messages = drain(rx);
        assert!(matches!(&*messages[0], ServerMessage::Snapshot(s) if s.is_pending()));

        let seen = transitions(&messages);
        assert_eq!(seen.len(), 5, "{seen:?}");
        assert!(seen[..3].iter().all(|(_, from, to)| {
            *from == HealthStatus::Unknown && *to == HealthStatus::Healthy
        }));
        assert_eq!(seen[3], ("llm".into(), HealthStatus::Healthy, HealthStatus::Unhealthy));
        assert_eq!(seen[4], ("llm".into(), HealthStatus::Unhealthy, HealthStatus::Healthy));
    }
    assert!(p.store.current().all_healthy());
}

#[tokio::test(start_paused = true)]
async fn timed_out_service_has_no_latency_and_others_are_unaffected() {
    let p = pipeline(&["auth", "llm"]);
    p.fleet.set("llm", Ok(200), 60_000); // never answers within the timeout

    let handle = p.scheduler.spawn();
    sleep(Duration::from_millis(600)).await;
    handle.stop().await;

    let snap = p.store.current();
    let auth = snap.get("auth").unwrap();
    let llm = snap.get("llm").unwrap();
    assert_eq!(auth.status, HealthStatus::Healthy);
    assert_eq!(auth.latency, Some(Duration::from_millis(20)));
    assert_eq!(llm.status, HealthStatus::Unhealthy);
    assert_eq!(llm.error.as_deref(), Some("timeout"));
    assert_eq!(llm.latency, None);
}

#[tokio::test(start_paused = true)]
async fn scoped_client_only_hears_about_its_services() {
    let p = pipeline(&["auth", "llm"]);
    let (sink, mut rx) = client(16);
    p.dispatcher
        .join("scoped", Some(ServiceScope::new(["auth"])), sink)
        .await
        .unwrap();

    let handle = p.scheduler.spawn();
    sleep(Duration::from_millis(500)).await;
    p.fleet.set("llm", Err(ProbeFailure::Protocol(503)), 5);
    sleep(Duration::from_millis(1000)).await;
    handle.stop().await;

    let messages = drain(&mut rx);
    match &*messages[0] {
        ServerMessage::Snapshot(s) => {
            assert_eq!(s.len(), 1);
            assert!(s.get("llm").is_none());
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
    let seen = transitions(&messages);
    assert_eq!(seen, vec![("auth".into(), HealthStatus::Unknown, HealthStatus::Healthy)]);
}

/// Sink that refuses everything, standing in for a dead socket.
struct Dead;

impl ClientSink for Dead {
    fn deliver(&self, _message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        Err(DeliveryError::Closed)
    }
}

#[tokio::test(start_paused = true)]
async fn slow_and_dead_clients_are_dropped_without_stalling_the_rest() {
    let p = pipeline(&["auth"]);
    let (healthy_sink, mut healthy_rx) = client(16);
    let (slow_sink, _slow_rx) = client(1); // never drained
    p.dispatcher.join("healthy", None, healthy_sink).await.unwrap();
    p.dispatcher.join("slow", None, slow_sink).await.unwrap();
    let registry = p.dispatcher.registry().clone();

    // A dead sink cannot even take the initial snapshot.
    assert_eq!(
        p.dispatcher.join("dead", None, Arc::new(Dead)).await.unwrap_err(),
        DeliveryError::Closed
    );
    assert_eq!(registry.len().await, 2);

    let handle = p.scheduler.spawn();
    sleep(Duration::from_millis(500)).await;
    handle.stop().await;

    // The slow client's single slot already held its snapshot.
    assert_eq!(registry.len().await, 1);
    let seen = transitions(&drain(&mut healthy_rx));
    assert_eq!(seen.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_with_same_key_replaces_the_old_connection() {
    let p = pipeline(&["auth"]);
    let (first_sink, mut first_rx) = client(16);
    let (second_sink, mut second_rx) = client(16);

    p.dispatcher.join("tab-1", None, first_sink).await.unwrap();
    p.dispatcher.join("tab-1", None, second_sink).await.unwrap();
    assert_eq!(p.dispatcher.registry().len().await, 1);

    let handle = p.scheduler.spawn();
    sleep(Duration::from_millis(500)).await;
    handle.stop().await;

    // Old connection got its snapshot, then its queue closed.
    assert_eq!(drain(&mut first_rx).len(), 1);
    assert!(first_rx.recv().await.is_none());
    // New connection got snapshot + first-cycle update.
    assert_eq!(drain(&mut second_rx).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_through_the_runtime_drains_the_cycle() {
    use pulsegate::subsystems::runtime::{Component, spawn_components};
    use tokio_util::sync::CancellationToken;

    let p = pipeline(&["auth"]);
    p.fleet.set("auth", Ok(200), 300);
    let shutdown = CancellationToken::new();
    let components: Vec<Box<dyn Component>> = vec![Box::new(p.scheduler)];
    let handle = spawn_components(components, shutdown.clone());

    sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    handle.join().await.unwrap();

    let snap = p.store.current();
    assert_eq!(snap.cycle(), 1);
    assert_eq!(snap.get("auth").unwrap().status, HealthStatus::Healthy);
}
