//! Monitor timing parameters.

use std::time::Duration;

use crate::error::MonitorError;

/// Longest duration the monitor (or an agent) will schedule.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Timing parameters for the heartbeat monitor.
///
/// Worst-case detection latency is roughly `liveness_threshold + tick_period`;
/// a silent service is evicted one further tick after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Silence after which a healthy service is flagged unhealthy.
    pub liveness_threshold: Duration,
    /// Time between monitor ticks.
    pub tick_period: Duration,
    /// Upper bound on a single store call made by the monitor.
    pub store_deadline: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            liveness_threshold: Duration::from_secs(300),
            tick_period: Duration::from_secs(40),
            store_deadline: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.liveness_threshold.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "liveness_threshold must be non-zero".to_string(),
            ));
        }
        if self.tick_period.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "tick_period must be non-zero".to_string(),
            ));
        }
        if self.store_deadline.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "store_deadline must be non-zero".to_string(),
            ));
        }
        for (field, value) in [
            ("liveness_threshold", self.liveness_threshold),
            ("tick_period", self.tick_period),
            ("store_deadline", self.store_deadline),
        ] {
            if value > MAX_PERIOD {
                return Err(MonitorError::InvalidConfig(format!(
                    "{field} must be at most {}s",
                    MAX_PERIOD.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// Longest a silent service can stay flagged healthy.
    pub fn worst_case_detection(&self) -> Duration {
        self.liveness_threshold.saturating_add(self.tick_period)
    }

    /// Longest a silent service can stay registered.
    pub fn worst_case_eviction(&self) -> Duration {
        self.worst_case_detection().saturating_add(self.tick_period)
    }
}

/// Parse a duration string like "5s", "500ms", "1m", or bare seconds.
///
/// Returns `None` for malformed input and for minute counts that overflow.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
