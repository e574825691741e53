//! Error types for the heartbeat monitor.

use std::time::Duration;

use beacon_state::StateError;
use thiserror::Error;

/// Why a monitor tick (or its configuration) failed.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("registry store error: {0}")]
    Store(#[from] StateError),

    #[error("store call exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("store task failed: {0}")]
    TaskFailed(String),

    #[error("invalid monitor config: {0}")]
    InvalidConfig(String),
}
