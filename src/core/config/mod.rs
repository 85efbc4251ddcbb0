//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the file given with `-f`), then applies `PULSEGATE_*` env overrides.
//!
//! # Module layout
//!
//! - **types**: Resolved configuration structs (`Config`, `ServerConfig`,
//!   `MonitorConfig`).
//! - **raw**: Raw TOML deserialization types.  These mirror the file shape
//!   and use serde defaults; kept private.
//! - **load**: Loading logic: `merge_toml`, `load_raw_merged`, `load`,
//!   `load_from`, validation.

mod load;
mod raw;
mod types;

pub use load::{EnvOverrides, load, load_from};
pub use types::*;

#[cfg(test)]
impl Config {
    /// Safe `Config` for unit tests: one service on a closed local port.
    pub fn test_default() -> Self {
        use crate::subsystems::monitor::ServiceEndpoint;
        use std::time::Duration;

        Self {
            server: ServerConfig {
                bind: "127.0.0.1:0".into(),
                log_level: "info".into(),
                log_file: None,
            },
            monitor: MonitorConfig {
                probe_timeout: Duration::from_millis(raw::default_probe_timeout_ms()),
                poll_interval: Duration::from_millis(raw::default_poll_interval_ms()),
                client_buffer: raw::default_client_buffer(),
                services: vec![ServiceEndpoint::new(
                    "auth",
                    "http://127.0.0.1:9/health",
                    Duration::from_millis(raw::default_probe_timeout_ms()),
                    Duration::from_millis(raw::default_poll_interval_ms()),
                )],
            },
        }
    }
}
