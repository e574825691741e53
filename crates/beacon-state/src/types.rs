//! Domain types for the Beacon registry store.
//!
//! A `ServiceRecord` is the persisted row for one registered endpoint.
//! Records are JSON-serialized into the `services` redb table.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique name of a registered service.
pub type ServiceName = String;

// ── Service record ─────────────────────────────────────────────────

/// Persisted state for one registered endpoint.
///
/// `version` starts at 1 and is bumped by the store on every mutation.
/// Callers never set it; it is only readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: ServiceName,
    pub host: String,
    pub port: u16,
    /// Unix timestamp (milliseconds) of creation or the last accepted heartbeat.
    pub last_heartbeat: u64,
    pub is_healthy: bool,
    /// Unix timestamp (milliseconds) of the sweep that flagged this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_since: Option<u64>,
    pub version: u64,
}

impl ServiceRecord {
    /// Build a freshly registered record.
    pub(crate) fn new(name: &str, host: &str, port: u16, now_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            last_heartbeat: now_ms,
            is_healthy: true,
            unhealthy_since: None,
            version: 1,
        }
    }

    /// Whether the silence since the last heartbeat exceeds `threshold`.
    pub fn is_stale(&self, now_ms: u64, threshold: Duration) -> bool {
        now_ms.saturating_sub(self.last_heartbeat) > duration_ms(threshold)
    }

    /// Whether the record was flagged by a sweep that ran before `cutoff_ms`.
    pub fn flagged_before(&self, cutoff_ms: u64) -> bool {
        !self.is_healthy && self.unhealthy_since.is_some_and(|at| at < cutoff_ms)
    }

    /// Public `(name, host, port)` projection.
    pub fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// Record an accepted heartbeat.
    pub(crate) fn touch(&mut self, now_ms: u64) {
        self.last_heartbeat = now_ms;
        self.is_healthy = true;
        self.unhealthy_since = None;
        self.version += 1;
    }

    /// Flag the record unhealthy as part of the sweep at `now_ms`.
    pub(crate) fn flag_unhealthy(&mut self, now_ms: u64) {
        self.is_healthy = false;
        self.unhealthy_since = Some(now_ms);
        self.version += 1;
    }
}

// ── Listing ────────────────────────────────────────────────────────

/// What `list` exposes about a service. Health and version stay internal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceEndpoint {
    pub name: ServiceName,
    pub host: String,
    pub port: u16,
}

// ── Sweep ──────────────────────────────────────────────────────────

/// Result of one `mark_unhealthy_if_stale` sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    /// The single instant the staleness predicate was evaluated against.
    pub swept_at: u64,
    /// Names flagged unhealthy by this sweep.
    pub flagged: Vec<ServiceName>,
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
