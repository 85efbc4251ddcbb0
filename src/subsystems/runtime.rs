//! Generic subsystem runtime: shared scaffolding for long-running tasks.
//!
//! # Component model
//!
//! A [`Component`] is any independently-runnable unit: the poll scheduler,
//! the HTTP/WebSocket channel.  Components are constructed with their shared
//! handles (snapshot store, dispatcher, …) already captured inside them and
//! are then handed to [`spawn_components`].
//!
//! # SubsystemHandle
//!
//! [`spawn_components`] returns a [`SubsystemHandle`] that the caller can
//! `.await` (blocking until all components finish) or hold onto while doing
//! other work.  Any component error cancels the shared
//! [`CancellationToken`] so sibling components shut down cleanly too.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;

// ── Component ─────────────────────────────────────────────────────────────────

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture =
    Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit.
///
/// [`Component::run`] is called once by [`spawn_components`] and should run
/// until `shutdown` is cancelled or the component's own work is done.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its run loop as a boxed future.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

// ── SubsystemHandle ───────────────────────────────────────────────────────────

/// An opaque handle to a running component set.
pub struct SubsystemHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl SubsystemHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Server(format!("runtime task panicked: {e}"))),
        }
    }
}

// ── spawn_components ──────────────────────────────────────────────────────────

/// Spawn each [`Component`] as an independent Tokio task and return a
/// [`SubsystemHandle`] that resolves when all of them have exited.
///
/// Behaviour on error:
/// - If any component returns `Err` or panics, `shutdown` is cancelled so
///   all siblings stop cooperatively.
/// - The manager task then drains the remaining components and returns the
///   first error encountered.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> SubsystemHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            let shutdown = shutdown.clone();
            debug!(component = %id, "spawning component");
            set.spawn(async move {
                let result = component.run(shutdown).await;
                match &result {
                    Ok(()) => info!(component = %id, "component exited"),
                    Err(e) => error!(component = %id, "component failed: {e}"),
                }
                result
            });
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| {
                        AppError::Server(format!("component panicked: {e}"))
                    });
                }
                Ok(Err(e)) => {
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    SubsystemHandle { inner: handle }
}
