//! Monitor subsystem: polls downstream services and fans their health out
//! to streaming clients.
//!
//! # Pipeline
//!
//! ```text
//! PollScheduler ─▶ AggregationEngine ─▶ detect::diff ─▶ SnapshotStore
//!                        │                    │
//!                   ProbeRunner ×N            └──▶ BroadcastDispatcher ─▶ ClientSink ×M
//! ```
//!
//! Nothing here is global.  `main` builds one [`SnapshotStore`], one
//! [`SubscriptionRegistry`] and one [`BroadcastDispatcher`] and hands clones
//! to the scheduler and to the HTTP channel.
//!
//! - **types**: endpoints, probe results, snapshots, transitions.
//! - **probe**: single probe with timeout over a pluggable [`Transport`].
//! - **container**: optional "is the container running" follow-up check.
//! - **aggregate**: one concurrent cycle and the snapshot store.
//! - **detect**: transitions between consecutive snapshots.
//! - **registry**: connected clients and their delivery sinks.
//! - **dispatch**: wire messages and per-client isolated fan-out.
//! - **scheduler**: the periodic, serialized poll loop.

pub mod aggregate;
pub mod container;
pub mod detect;
pub mod dispatch;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregate::{AggregationEngine, SnapshotStore};
pub use container::{ContainerInspector, DockerInspector, InspectError, InspectFuture};
pub use dispatch::{BroadcastDispatcher, DispatchReport, ServerMessage};
pub use probe::{HttpTransport, ProbeFailure, ProbeRunner, Transport, TransportFuture};
pub use registry::{ClientSink, ClientSubscription, DeliveryError, SubscriptionId, SubscriptionRegistry};
pub use scheduler::{PollScheduler, RefreshTrigger, SchedulerHandle, SchedulerState};
pub use types::{HealthStatus, ProbeResult, ServiceEndpoint, ServiceScope, Snapshot, Transition};
