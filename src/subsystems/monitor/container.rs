//! Container liveness check run after a successful HTTP probe.
//!
//! A service whose endpoint still answers while its container is stopped
//! (a proxy or a stale port forward in front of it) is reported unhealthy.
//! An inspection that cannot be carried out at all is not evidence either
//! way, so the HTTP verdict stands.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("inspect of '{container}' failed: {stderr}")]
    Failed { container: String, stderr: String },
}

pub type InspectFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, InspectError>> + Send + 'a>>;

/// Answers whether a named container is running.
pub trait ContainerInspector: Send + Sync + 'static {
    fn is_running<'a>(&'a self, container: &'a str) -> InspectFuture<'a>;
}

/// Shells out to `docker inspect --format {{.State.Running}} <name>`.
#[derive(Debug, Clone)]
pub struct DockerInspector {
    program: String,
}

impl DockerInspector {
    pub fn new() -> Self {
        Self { program: "docker".to_string() }
    }

    /// Use a different CLI binary (`podman` speaks the same inspect format).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for DockerInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerInspector for DockerInspector {
    fn is_running<'a>(&'a self, container: &'a str) -> InspectFuture<'a> {
        Box::pin(async move {
            let output = Command::new(&self.program)
                .args(["inspect", "--format", "{{.State.Running}}", container])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| InspectError::Spawn {
                    program: self.program.clone(),
                    reason: e.to_string(),
                })?;

            if !output.status.success() {
                return Err(InspectError::Failed {
                    container: container.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(parse_running(&String::from_utf8_lossy(&output.stdout)))
        })
    }
}

/// `docker inspect` prints `true`/`false`, sometimes quoted by shell habit.
fn parse_running(stdout: &str) -> bool {
    stdout.trim().trim_matches('\'').eq_ignore_ascii_case("true")
}
