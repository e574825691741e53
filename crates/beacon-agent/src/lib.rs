//! beacon-agent — client side of the Beacon registry.
//!
//! Registers a service and keeps it alive with periodic heartbeats.
//! A 404 on heartbeat means the registry evicted (or never knew) the
//! service; the agent re-registers on the same beat.

pub mod agent;
pub mod client;

pub use agent::{AgentConfig, HeartbeatAgent, HeartbeatOutcome, RegisterOutcome};
