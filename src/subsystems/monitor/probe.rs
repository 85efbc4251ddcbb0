//! Probe runner: one health check against one downstream endpoint.
//!
//! The network call goes through the [`Transport`] trait so the runner can be
//! exercised without sockets.  [`HttpTransport`] is the production
//! implementation over `reqwest`.
//!
//! The timeout is enforced from the outside: the transport future is raced
//! against `tokio::time::timeout` and simply dropped when the timer wins.  A
//! transport that never yields still cannot hold the caller past
//! `endpoint.timeout`.
//!
//! Endpoints that name a container get a second check after a 2xx reply: the
//! runner asks its [`ContainerInspector`] whether the container is running,
//! within whatever is left of the same timeout.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::container::ContainerInspector;
use super::types::{ProbeResult, ServiceEndpoint};

// ── Failure taxonomy ──────────────────────────────────────────────────────────

/// Why a probe did not report healthy.  Never propagated: the `Display`
/// text becomes the `error` field of the [`ProbeResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected status {0}")]
    Protocol(u16),

    #[error("container {0} not running")]
    ContainerStopped(String),
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Boxed future returned by [`Transport::get`]: the HTTP status code of the
/// reply, or a transport-level failure.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<u16, ProbeFailure>> + Send + 'a>>;

/// Issues the GET request behind a probe.
pub trait Transport: Send + Sync + 'static {
    fn get<'a>(&'a self, url: &'a str) -> TransportFuture<'a>;
}

/// `reqwest`-backed transport.  Cheap to clone: `Client` is an `Arc`
/// internally.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("pulsegate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            let resp = self.client.get(url).send().await.map_err(|e| {
                if e.is_timeout() {
                    ProbeFailure::Timeout
                } else {
                    ProbeFailure::Connection(e.to_string())
                }
            })?;
            Ok(resp.status().as_u16())
        })
    }
}

// ── ProbeRunner ───────────────────────────────────────────────────────────────

/// Runs single probes.  Clone freely: the transport is shared.
#[derive(Clone)]
pub struct ProbeRunner {
    transport: Arc<dyn Transport>,
    inspector: Option<Arc<dyn ContainerInspector>>,
}

impl ProbeRunner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, inspector: None }
    }

    /// Enable the container check for endpoints that name a container.
    pub fn with_inspector(mut self, inspector: Arc<dyn ContainerInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Probe `endpoint` once.  Never fails: every failure mode is reported
    /// as an `unhealthy` result carrying the reason.
    pub async fn probe(&self, endpoint: &ServiceEndpoint) -> ProbeResult {
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(endpoint.timeout, self.transport.get(&endpoint.url)).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Err(_) => Err((ProbeFailure::Timeout, None)),
            Ok(Err(failure)) => Err((failure, None)),
            Ok(Ok(code)) if (200..300).contains(&code) => self
                .check_container(endpoint, started)
                .await
                .map(|()| elapsed)
                .map_err(|failure| (failure, Some(elapsed))),
            // The downstream answered, so the latency is meaningful.
            Ok(Ok(code)) => Err((ProbeFailure::Protocol(code), Some(elapsed))),
        };

        match result {
            Ok(latency) => {
                debug!(
                    service = %endpoint.name,
                    latency_ms = latency.as_millis() as u64,
                    "probe healthy"
                );
                ProbeResult::healthy(&endpoint.name, latency)
            }
            Err((failure, latency)) => {
                warn!(
                    service = %endpoint.name,
                    url = %endpoint.url,
                    reason = %failure,
                    "probe unhealthy"
                );
                ProbeResult::unhealthy(&endpoint.name, failure.to_string(), latency)
            }
        }
    }

    /// Only a definite "not running" fails the probe.  Inspection errors and
    /// an exhausted time budget leave the HTTP verdict in place.
    async fn check_container(
        &self,
        endpoint: &ServiceEndpoint,
        started: Instant,
    ) -> Result<(), ProbeFailure> {
        let (Some(inspector), Some(container)) = (&self.inspector, endpoint.container.as_deref())
        else {
            return Ok(());
        };

        let budget = endpoint.timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(budget, inspector.is_running(container)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ProbeFailure::ContainerStopped(container.to_string())),
            Ok(Err(e)) => {
                debug!(service = %endpoint.name, %container, "container check skipped: {e}");
                Ok(())
            }
            Err(_) => {
                debug!(service = %endpoint.name, %container, "container check timed out");
                Ok(())
            }
        }
    }
}
