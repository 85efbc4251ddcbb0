//! Aggregation engine (one poll cycle across every endpoint) and the
//! snapshot store that publishes its output.
//!
//! Each probe runs as its own task in a [`JoinSet`].  Isolation is
//! structural: a probe that fails, hangs until its timeout, or even panics
//! affects only its own entry in the resulting [`Snapshot`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::probe::ProbeRunner;
use super::types::{ProbeResult, ServiceEndpoint, Snapshot, now_ms};

// ── AggregationEngine ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AggregationEngine {
    runner: ProbeRunner,
    cycles: Arc<AtomicU64>,
}

impl AggregationEngine {
    pub fn new(runner: ProbeRunner) -> Self {
        Self { runner, cycles: Arc::new(AtomicU64::new(0)) }
    }

    /// Probe every endpoint concurrently and fold the results into a
    /// snapshot with exactly one entry per endpoint.
    ///
    /// Waits for all probes; each one is bounded by its own endpoint timeout,
    /// so the cycle takes as long as the slowest probe and no longer.
    pub async fn run_cycle(&self, endpoints: &[ServiceEndpoint]) -> Snapshot {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        let mut set: JoinSet<ProbeResult> = JoinSet::new();
        for endpoint in endpoints.iter().cloned() {
            let runner = self.runner.clone();
            set.spawn(async move { runner.probe(&endpoint).await });
        }

        // Completion order is preserved; `Snapshot::assemble` relies on it
        // for tie-breaks.
        let mut results = Vec::with_capacity(endpoints.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(cycle, "probe task failed: {e}"),
            }
        }

        let snapshot = Snapshot::assemble(cycle, endpoints, results, now_ms());
        debug!(
            cycle,
            services = snapshot.len(),
            not_healthy = ?snapshot.not_healthy(),
            "cycle complete"
        );
        snapshot
    }
}

// ── SnapshotStore ─────────────────────────────────────────────────────────────

/// The single shared reference to the current snapshot.
///
/// Readers get an `Arc<Snapshot>` and never lock anything while using it;
/// the poll loop swaps in a whole new snapshot per cycle.  Clone freely.
#[derive(Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new(initial: Snapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        self.tx.send_replace(snapshot);
    }

    /// Watch for newly published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }
}
