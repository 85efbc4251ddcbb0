//! Health data model: endpoints, probe results, snapshots, transitions.
//!
//! Everything here is immutable once built.  A [`Snapshot`] is shared as
//! `Arc<Snapshot>` between the poll loop and every reader; it is replaced,
//! never edited.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

/// Current wall-clock time as unix-epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// ── ServiceEndpoint ───────────────────────────────────────────────────────────

/// Static descriptor of one downstream dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Unique service name, used as the key everywhere else.
    pub name: String,
    /// Probe URL (`http` or `https`).
    pub url: String,
    /// Upper bound for one probe, enforced by racing a timer.
    pub timeout: Duration,
    /// Desired polling interval.
    pub interval: Duration,
    /// Container that must be running for the service to count as healthy.
    pub container: Option<String>,
}

impl ServiceEndpoint {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self { name: name.into(), url: url.into(), timeout, interval, container: None }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

// ── HealthStatus ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ProbeResult ───────────────────────────────────────────────────────────────

/// Outcome of one probe execution.
///
/// Serializes to the wire entry
/// `{ name, url, status, latencyMs, error, checkedAt }`.  `url` is filled in
/// when the result is folded into a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    #[serde(rename = "name")]
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: HealthStatus,
    /// Present only when the downstream replied (any status code).
    #[serde(rename = "latencyMs", serialize_with = "serialize_latency_ms")]
    pub latency: Option<Duration>,
    /// Present only on failure.
    pub error: Option<String>,
    /// Completion time, unix ms.
    pub checked_at: u64,
}

impl ProbeResult {
    pub fn healthy(service: impl Into<String>, latency: Duration) -> Self {
        Self {
            service: service.into(),
            url: None,
            status: HealthStatus::Healthy,
            latency: Some(latency),
            error: None,
            checked_at: now_ms(),
        }
    }

    pub fn unhealthy(
        service: impl Into<String>,
        reason: impl Into<String>,
        latency: Option<Duration>,
    ) -> Self {
        Self {
            service: service.into(),
            url: None,
            status: HealthStatus::Unhealthy,
            latency,
            error: Some(reason.into()),
            checked_at: now_ms(),
        }
    }

    pub fn unknown(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            url: None,
            status: HealthStatus::Unknown,
            latency: None,
            error: Some(reason.into()),
            checked_at: now_ms(),
        }
    }

    /// Placeholder entry used before the first poll cycle completes.
    pub fn pending(service: impl Into<String>) -> Self {
        Self::unknown(service, "pending")
    }

    fn for_endpoint(mut self, endpoint: &ServiceEndpoint) -> Self {
        self.url = Some(endpoint.url.clone());
        self
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency.map(|d| d.as_millis() as u64)
    }
}

fn serialize_latency_ms<S: Serializer>(
    latency: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match latency {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Aggregated health state of every configured service.
///
/// Holds exactly one entry per configured endpoint, in configuration order.
/// Serializes to `{ services: [...], lastCheck }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(skip)]
    cycle: u64,
    services: Vec<ProbeResult>,
    #[serde(rename = "lastCheck")]
    last_check: Option<u64>,
}

impl Snapshot {
    /// Snapshot published before any cycle has run: every service `unknown`.
    pub fn pending(endpoints: &[ServiceEndpoint]) -> Self {
        let mut services: Vec<ProbeResult> = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if !services.iter().any(|r| r.service == endpoint.name) {
                services.push(ProbeResult::pending(&endpoint.name).for_endpoint(endpoint));
            }
        }
        Self { cycle: 0, services, last_check: None }
    }

    /// Fold the probe results of one cycle into a snapshot.
    ///
    /// `results` may arrive in any order and may hold several results for
    /// the same service; the one with the latest `checked_at` wins, and on
    /// equal timestamps the one that appears later in `results`.  A service
    /// with no result at all gets an `unknown` entry.
    pub fn assemble(
        cycle: u64,
        endpoints: &[ServiceEndpoint],
        results: Vec<ProbeResult>,
        taken_at: u64,
    ) -> Self {
        let mut services: Vec<ProbeResult> = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if services.iter().any(|r| r.service == endpoint.name) {
                continue;
            }
            let latest = results
                .iter()
                .filter(|r| r.service == endpoint.name)
                .fold(None, |best: Option<&ProbeResult>, r| match best {
                    Some(b) if b.checked_at > r.checked_at => Some(b),
                    _ => Some(r),
                });
            services.push(
                latest
                    .cloned()
                    .unwrap_or_else(|| ProbeResult::unknown(&endpoint.name, "probe task failed"))
                    .for_endpoint(endpoint),
            );
        }
        Self { cycle, services, last_check: Some(taken_at) }
    }

    /// Poll cycle that produced this snapshot; `0` for the pending snapshot.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_pending(&self) -> bool {
        self.cycle == 0
    }

    pub fn last_check(&self) -> Option<u64> {
        self.last_check
    }

    pub fn services(&self) -> &[ProbeResult] {
        &self.services
    }

    pub fn get(&self, service: &str) -> Option<&ProbeResult> {
        self.services.iter().find(|r| r.service == service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// `true` if every service is healthy.
    pub fn all_healthy(&self) -> bool {
        self.services.iter().all(|r| r.status == HealthStatus::Healthy)
    }

    /// Names of services that are not currently healthy.
    pub fn not_healthy(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|r| r.status != HealthStatus::Healthy)
            .map(|r| r.service.as_str())
            .collect()
    }

    /// Copy of this snapshot restricted to the services in `scope`.
    pub fn scoped(&self, scope: &ServiceScope) -> Snapshot {
        Snapshot {
            cycle: self.cycle,
            services: self
                .services
                .iter()
                .filter(|r| scope.contains(&r.service))
                .cloned()
                .collect(),
            last_check: self.last_check,
        }
    }
}

// ── Transition ────────────────────────────────────────────────────────────────

/// A status change of one service between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub service: String,
    pub from: HealthStatus,
    pub to: HealthStatus,
    /// Detection time, unix ms.
    pub at: u64,
}

// ── ServiceScope ──────────────────────────────────────────────────────────────

/// Subset of services a client asked to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceScope(HashSet<String>);

impl ServiceScope {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(services.into_iter().map(Into::into).collect())
    }

    /// Parse a comma-separated list (`"auth, llm"`).  Blank input yields
    /// `None`, meaning "all services".
    pub fn parse_csv(raw: &str) -> Option<Self> {
        let names: HashSet<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        if names.is_empty() { None } else { Some(Self(names)) }
    }

    pub fn contains(&self, service: &str) -> bool {
        self.0.contains(service)
    }
}
