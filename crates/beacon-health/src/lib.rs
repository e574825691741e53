//! beacon-health — liveness enforcement for the Beacon registry.
//!
//! A single background task sweeps the registry on a fixed period, flags
//! services that stopped sending heartbeats and evicts the ones that stay
//! silent for another tick.
//!
//! # Architecture
//!
//! ```text
//! HeartbeatMonitor
//!   ├── Ticker (IntervalTicker in production, ManualTicker in tests)
//!   ├── tick: mark_unhealthy_if_stale(threshold) → SweepOutcome
//!   │         evict_unhealthy(swept_at)          → evicted names
//!   └── every store call bounded by store_deadline
//! ```
//!
//! # Lifecycle of a record
//!
//! Healthy → Unhealthy when a sweep sees `now - last_heartbeat > threshold`.
//! Unhealthy → Healthy on any accepted heartbeat before the next tick.
//! Unhealthy → Evicted on the next tick's evict phase.

pub mod config;
pub mod error;
pub mod monitor;
pub mod ticker;

pub use config::{MAX_PERIOD, MonitorConfig, parse_duration};
pub use error::MonitorError;
pub use monitor::{HeartbeatMonitor, LivenessStore, TickReport};
pub use ticker::{IntervalTicker, ManualTicker, TickHandle, Ticker};
