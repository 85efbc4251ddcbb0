//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! applies `PULSEGATE_*` env overrides, then validates the result.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::subsystems::monitor::ServiceEndpoint;

use super::raw::{RawConfig, RawService};
use super::types::*;

/// Env-var overrides, captured once so tests can pass them explicitly
/// instead of mutating the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub bind: Option<String>,
    pub log_level: Option<String>,
    /// `name=url,name=url`; replaces the configured service list.
    pub services: Option<String>,
    pub probe_timeout_ms: Option<String>,
    pub poll_interval_ms: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            bind: env::var("PULSEGATE_BIND").ok(),
            log_level: env::var("PULSEGATE_LOG_LEVEL").ok(),
            services: env::var("PULSEGATE_SERVICES").ok(),
            probe_timeout_ms: env::var("PULSEGATE_PROBE_TIMEOUT_MS").ok(),
            poll_interval_ms: env::var("PULSEGATE_POLL_INTERVAL_MS").ok(),
        }
    }
}

/// Deep-merge two TOML values.
/// Tables are merged recursively: the overlay only needs to specify keys that
/// differ from the base. For every other type (string, integer, array, …)
/// the overlay value replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, the built-in
/// service list is used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = EnvOverrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        resolve_builtin(&overrides)
    }
}

/// Resolve the built-in service list with `overrides` applied.
pub(super) fn resolve_builtin(overrides: &EnvOverrides) -> Result<Config, AppError> {
    resolve(RawConfig::builtin(), overrides)
}

/// Internal loader: accepts an explicit path and overrides.
/// Follows `[meta] base = "..."` inheritance chains before resolving.
pub fn load_from(path: &Path, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let server = ServerConfig {
        bind: overrides.bind.clone().unwrap_or(parsed.server.bind),
        log_level: overrides.log_level.clone().unwrap_or(parsed.server.log_level),
        log_file: parsed.server.log_file.map(PathBuf::from),
    };

    let mut m = parsed.monitor;
    if let Some(v) = overrides.probe_timeout_ms.as_deref() {
        m.probe_timeout_ms = parse_ms("PULSEGATE_PROBE_TIMEOUT_MS", v)?;
    }
    if let Some(v) = overrides.poll_interval_ms.as_deref() {
        m.poll_interval_ms = parse_ms("PULSEGATE_POLL_INTERVAL_MS", v)?;
    }
    if let Some(list) = overrides.services.as_deref() {
        m.services = parse_service_list(list)?;
    }

    if m.probe_timeout_ms == 0 {
        return Err(AppError::Config("monitor.probe_timeout_ms must be greater than zero".into()));
    }
    if m.poll_interval_ms == 0 {
        return Err(AppError::Config("monitor.poll_interval_ms must be greater than zero".into()));
    }
    if m.client_buffer == 0 {
        return Err(AppError::Config("monitor.client_buffer must be greater than zero".into()));
    }

    let services = resolve_services(&m.services, m.probe_timeout_ms, m.poll_interval_ms)?;

    Ok(Config {
        server,
        monitor: MonitorConfig {
            probe_timeout: Duration::from_millis(m.probe_timeout_ms),
            poll_interval: Duration::from_millis(m.poll_interval_ms),
            client_buffer: m.client_buffer,
            services,
        },
    })
}

fn resolve_services(
    raw: &[RawService],
    default_timeout_ms: u64,
    default_interval_ms: u64,
) -> Result<Vec<ServiceEndpoint>, AppError> {
    if raw.is_empty() {
        return Err(AppError::Config("no services configured under [[monitor.services]]".into()));
    }

    let mut seen = HashSet::new();
    let mut endpoints = Vec::with_capacity(raw.len());
    for svc in raw {
        let name = svc.name.trim();
        if name.is_empty() {
            return Err(AppError::Config("service name must not be empty".into()));
        }
        if !seen.insert(name.to_string()) {
            return Err(AppError::Config(format!("duplicate service name '{name}'")));
        }
        validate_url(name, &svc.url)?;

        let timeout_ms = svc.timeout_ms.unwrap_or(default_timeout_ms);
        let interval_ms = svc.interval_ms.unwrap_or(default_interval_ms);
        if timeout_ms == 0 || interval_ms == 0 {
            return Err(AppError::Config(format!(
                "service '{name}': timeout_ms and interval_ms must be greater than zero"
            )));
        }

        let mut endpoint = ServiceEndpoint::new(
            name,
            svc.url.trim(),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        );
        match svc.container.as_deref().map(str::trim) {
            Some("") => {
                return Err(AppError::Config(format!(
                    "service '{name}': container must not be empty when set"
                )));
            }
            Some(container) => endpoint = endpoint.with_container(container),
            None => {}
        }
        endpoints.push(endpoint);
    }
    Ok(endpoints)
}

fn validate_url(name: &str, url: &str) -> Result<(), AppError> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| AppError::Config(format!("service '{name}': invalid url '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        "http" | "https" => Err(AppError::Config(format!("service '{name}': url '{url}' has no host"))),
        other => Err(AppError::Config(format!(
            "service '{name}': unsupported url scheme '{other}' (expected http or https)"
        ))),
    }
}

fn parse_ms(var: &str, value: &str) -> Result<u64, AppError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| AppError::Config(format!("{var}: '{value}' is not a number of milliseconds: {e}")))
}

/// Parse `name=url,name=url` into raw service entries.
fn parse_service_list(list: &str) -> Result<Vec<RawService>, AppError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(name, url)| RawService::new(name.trim(), url.trim()))
                .ok_or_else(|| {
                    AppError::Config(format!("PULSEGATE_SERVICES: expected name=url, got '{entry}'"))
                })
        })
        .collect()
}
