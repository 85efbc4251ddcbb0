//! Change detection between consecutive snapshots.

use super::types::{HealthStatus, Snapshot, Transition, now_ms};

/// Status transitions from `previous` to `current`, in configuration order.
///
/// With no previous snapshot (first cycle) every service is reported as a
/// transition from `unknown`.  Latency-only changes are not transitions.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> Vec<Transition> {
    let at = now_ms();
    current
        .services()
        .iter()
        .filter_map(|entry| {
            let from = previous
                .and_then(|prev| prev.get(&entry.service))
                .map_or(HealthStatus::Unknown, |r| r.status);
            let first_cycle = previous.is_none();
            (first_cycle || from != entry.status).then(|| Transition {
                service: entry.service.clone(),
                from,
                to: entry.status,
                at,
            })
        })
        .collect()
}
