//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape: serde target before resolution.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub server: RawServer,
    #[serde(default)]
    pub monitor: RawMonitor,
}

impl RawConfig {
    /// Used when neither a config path nor `config/default.toml` exists.
    pub fn builtin() -> Self {
        Self {
            server: RawServer::default(),
            monitor: RawMonitor {
                services: builtin_services(),
                ..RawMonitor::default()
            },
        }
    }
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawServer {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

// ── Monitor ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawMonitor {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    #[serde(default)]
    pub services: Vec<RawService>,
}

impl Default for RawMonitor {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            client_buffer: default_client_buffer(),
            services: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub(super) struct RawService {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Container that must be running for the service to count as healthy.
    #[serde(default)]
    pub container: Option<String>,
}

impl RawService {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            timeout_ms: None,
            interval_ms: None,
            container: None,
        }
    }

    fn in_container(mut self, container: &str) -> Self {
        self.container = Some(container.to_string());
        self
    }
}

// ── Defaults ────────────────────────────────────────────────────────────────

pub(super) fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_probe_timeout_ms() -> u64 {
    5_000
}
pub(super) fn default_poll_interval_ms() -> u64 {
    30_000
}
pub(super) fn default_client_buffer() -> usize {
    32
}

/// The gateway's own downstream dependencies.
fn builtin_services() -> Vec<RawService> {
    vec![
        RawService::new("auth", "http://localhost:4001/health"),
        // auth runs as a host process, the rest in containers.
        RawService::new("llm", "http://localhost:11434/health").in_container("patriotchat-ollama"),
        RawService::new("analytics", "http://localhost:5000/health")
            .in_container("patriotchat-analytics"),
        RawService::new("policy", "http://localhost:4006/health").in_container("patriotchat-policy"),
        RawService::new("funding", "http://localhost:4007/health").in_container("patriotchat-funding"),
    ]
}
