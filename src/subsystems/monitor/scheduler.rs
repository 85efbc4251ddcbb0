//! Poll scheduler: drives aggregation cycles on a fixed interval.
//!
//! One task, one cycle at a time.  Each cycle runs the aggregation engine,
//! diffs the result against the previous snapshot, publishes it, and
//! broadcasts the transitions, in that order.  The next cycle starts
//! `interval` after the previous one *completed*, so a slow cycle delays the
//! schedule but never causes overlap or a skipped cycle.
//!
//! Stopping cancels future ticks only.  A cycle already in flight runs to
//! completion and its snapshot is published whole.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

use super::aggregate::AggregationEngine;
use super::detect;
use super::dispatch::BroadcastDispatcher;
use super::types::{ServiceEndpoint, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Requests an immediate cycle.  Requests made while a cycle is running are
/// coalesced into one extra cycle right after it.
#[derive(Clone, Default)]
pub struct RefreshTrigger {
    notify: Arc<Notify>,
}

impl RefreshTrigger {
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Resolves once a refresh has been requested, consuming the request.
    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}

pub struct PollScheduler {
    engine: AggregationEngine,
    dispatcher: BroadcastDispatcher,
    endpoints: Vec<ServiceEndpoint>,
    interval: Duration,
    refresh: RefreshTrigger,
    state_tx: watch::Sender<SchedulerState>,
}

impl PollScheduler {
    /// Build a scheduler over `endpoints`.  The interval is the shortest
    /// endpoint interval.  Refuses an empty endpoint list.
    pub fn new(
        engine: AggregationEngine,
        dispatcher: BroadcastDispatcher,
        endpoints: Vec<ServiceEndpoint>,
    ) -> Result<Self, AppError> {
        let interval = endpoints
            .iter()
            .map(|e| e.interval)
            .min()
            .ok_or_else(|| AppError::Config("no service endpoints configured".into()))?;
        if interval.is_zero() {
            return Err(AppError::Config("poll interval must be greater than zero".into()));
        }
        let (state_tx, _) = watch::channel(SchedulerState::Stopped);
        Ok(Self {
            engine,
            dispatcher,
            endpoints,
            interval,
            refresh: RefreshTrigger::default(),
            state_tx,
        })
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero());
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Handle for requesting out-of-schedule cycles (e.g. from HTTP).
    pub fn refresh_trigger(&self) -> RefreshTrigger {
        self.refresh.clone()
    }

    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Spawn the poll loop on its own task.
    pub fn spawn(self) -> SchedulerHandle {
        let stop = CancellationToken::new();
        let refresh = self.refresh.clone();
        let state = self.state_tx.subscribe();
        self.state_tx.send_replace(SchedulerState::Running);
        let join = tokio::spawn(self.run_until(stop.clone()));
        SchedulerHandle { stop, refresh, state, join }
    }

    /// Run the poll loop until `stop` is cancelled, then finish the cycle in
    /// flight (if any) and return.
    pub async fn run_until(self, stop: CancellationToken) {
        self.state_tx.send_replace(SchedulerState::Running);
        info!(
            services = self.endpoints.len(),
            interval_ms = self.interval.as_millis() as u64,
            "poll scheduler running"
        );

        let mut previous: Option<Arc<Snapshot>> = None;
        while !stop.is_cancelled() {
            previous = Some(self.cycle(previous.as_deref()).await);

            tokio::select! {
                biased;

                _ = stop.cancelled() => break,

                _ = self.refresh.requested() => {
                    debug!("refresh requested, running cycle early");
                }

                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state_tx.send_replace(SchedulerState::Stopped);
        info!("poll scheduler stopped");
    }

    async fn cycle(&self, previous: Option<&Snapshot>) -> Arc<Snapshot> {
        let snapshot = Arc::new(self.engine.run_cycle(&self.endpoints).await);
        let transitions = detect::diff(previous, &snapshot);

        self.dispatcher.store().publish(snapshot.clone());

        if !transitions.is_empty() {
            for t in &transitions {
                info!(service = %t.service, from = %t.from, to = %t.to, "status changed");
            }
            self.dispatcher.broadcast_transitions(&transitions).await;
        }
        snapshot
    }
}

impl Component for PollScheduler {
    fn id(&self) -> &str {
        "monitor"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            (*self).run_until(shutdown).await;
            Ok(())
        })
    }
}

/// Control handle for a spawned [`PollScheduler`].
pub struct SchedulerHandle {
    stop: CancellationToken,
    refresh: RefreshTrigger,
    state: watch::Receiver<SchedulerState>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn refresh(&self) {
        self.refresh.trigger();
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Cancel future ticks and wait for the in-flight cycle to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.join.await {
            error!("poll scheduler task panicked: {e}");
        }
    }
}
