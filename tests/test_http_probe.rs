//! Integration tests for the real HTTP path: `HttpTransport` against a local
//! downstream, and the pulsegate HTTP channel serving the result.
//!
//! Run with:
//!   cargo test --test test_http_probe

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, http::StatusCode, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use pulsegate::subsystems::comms::axum_channel::AxumChannel;
use pulsegate::subsystems::monitor::{
    AggregationEngine, BroadcastDispatcher, HealthStatus, HttpTransport, PollScheduler,
    ProbeRunner, ServiceEndpoint, Snapshot, SnapshotStore, SubscriptionRegistry,
};
use pulsegate::subsystems::runtime::{Component, spawn_components};

// ── helpers ──────────────────────────────────────────────────────────────────

/// Local stand-in for a downstream service.
async fn spawn_downstream() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route("/down", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }))
        .route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn endpoint(name: &str, url: String) -> ServiceEndpoint {
    ServiceEndpoint::new(name, url, Duration::from_millis(500), Duration::from_secs(60))
}

/// Plain client that ignores any proxy settings in the test environment.
fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn runner() -> ProbeRunner {
    ProbeRunner::new(Arc::new(HttpTransport::with_client(local_client())))
}

// ── HttpTransport ────────────────────────────────────────────────────────────

#[tokio::test]
async fn classifies_real_replies() {
    let addr = spawn_downstream().await;
    let dead = closed_addr().await;
    let runner = runner();

    let ok = runner.probe(&endpoint("ok", format!("http://{addr}/ok"))).await;
    assert_eq!(ok.status, HealthStatus::Healthy);
    assert!(ok.latency.is_some());
    assert!(ok.error.is_none());

    let down = runner.probe(&endpoint("down", format!("http://{addr}/down"))).await;
    assert_eq!(down.status, HealthStatus::Unhealthy);
    assert_eq!(down.error.as_deref(), Some("unexpected status 503"));
    assert!(down.latency.is_some());

    let hang = runner.probe(&endpoint("hang", format!("http://{addr}/hang"))).await;
    assert_eq!(hang.status, HealthStatus::Unhealthy);
    assert_eq!(hang.error.as_deref(), Some("timeout"));
    assert!(hang.latency.is_none());

    let refused = runner.probe(&endpoint("refused", format!("http://{dead}/health"))).await;
    assert_eq!(refused.status, HealthStatus::Unhealthy);
    assert!(refused.error.as_deref().unwrap().starts_with("connection failed"));
    assert!(refused.latency.is_none());
}

#[tokio::test]
async fn hanging_probe_returns_near_its_timeout() {
    let addr = spawn_downstream().await;
    let started = std::time::Instant::now();
    runner().probe(&endpoint("hang", format!("http://{addr}/hang"))).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_routes_serve_probed_state() {
    let downstream = spawn_downstream().await;
    let bind = closed_addr().await;

    let endpoints = vec![
        endpoint("auth", format!("http://{downstream}/ok")),
        endpoint("policy", format!("http://{downstream}/down")),
    ];
    let store = SnapshotStore::new(Snapshot::pending(&endpoints));
    let dispatcher = BroadcastDispatcher::new(SubscriptionRegistry::new(), store.clone());
    let engine = AggregationEngine::new(runner());
    let scheduler = PollScheduler::new(engine, dispatcher.clone(), endpoints).unwrap();
    let channel = AxumChannel::new("http", bind.to_string(), dispatcher, scheduler.refresh_trigger(), 8);

    let shutdown = CancellationToken::new();
    let components: Vec<Box<dyn Component>> = vec![Box::new(scheduler), Box::new(channel)];
    let handle = spawn_components(components, shutdown.clone());

    let mut watch = store.subscribe();
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| !s.is_pending()))
        .await
        .expect("first cycle should complete")
        .unwrap();

    let client = local_client();
    let base = format!("http://{bind}");

    // The listener may come up a moment after the first cycle.
    let mut health = None;
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{base}/health")).send().await {
            health = Some(resp);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let health = health.expect("server should be listening");
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = health.json().await.unwrap();
    assert_eq!(body["services"][0]["name"], "auth");
    assert_eq!(body["services"][0]["status"], "healthy");
    assert_eq!(body["services"][1]["status"], "unhealthy");
    assert!(body["lastCheck"].is_u64());

    let ready = client.get(format!("{base}/ready")).send().await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = ready.json().await.unwrap();
    assert_eq!(body["unhealthy"], serde_json::json!(["policy"]));

    let missing = client.get(format!("{base}/health/billing")).send().await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let refresh = client.post(format!("{base}/health/refresh")).send().await.unwrap();
    assert_eq!(refresh.status(), reqwest::StatusCode::ACCEPTED);
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| s.cycle() >= 2))
        .await
        .expect("refresh should run another cycle")
        .unwrap();

    drop(client);
    shutdown.cancel();
    handle.join().await.unwrap();
}
