//! Public configuration types.
//!
//! These are the resolved, validated structs that `main` and the subsystems
//! consume.  Raw TOML deserialization types live in `raw.rs`.

use std::path::PathBuf;
use std::time::Duration;

use crate::subsystems::monitor::ServiceEndpoint;

/// HTTP/WebSocket listener and process-level settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the axum listener binds to.
    pub bind: String,
    pub log_level: String,
    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

/// Health monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Default per-probe timeout for services that do not set their own.
    pub probe_timeout: Duration,
    /// Default polling interval for services that do not set their own.
    pub poll_interval: Duration,
    /// Outbound queue depth per streaming client.
    pub client_buffer: usize,
    /// Monitored services, in configuration order.
    pub services: Vec<ServiceEndpoint>,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub monitor: MonitorConfig,
}
