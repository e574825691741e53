//! Heartbeat agent — keeps one service registered and alive.

use std::time::Duration;

use http::StatusCode;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::{HeartbeatBody, RegisterBody, post_json};

/// What the agent needs to know about itself and the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Registry address (`host:port`).
    pub server: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Time between heartbeats. Must stay well below the registry's
    /// liveness threshold.
    pub interval: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl AgentConfig {
    pub fn new(server: &str, name: &str, host: &str, port: u16) -> Self {
        Self {
            server: server.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// The name is already taken (409).
    AlreadyRegistered,
    /// Any other non-2xx status.
    Rejected(StatusCode),
    /// The request could not be completed.
    Failed,
}

/// Result of a heartbeat attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Accepted,
    /// The registry does not know this name (404), e.g. it was evicted.
    NotRegistered,
    Rejected(StatusCode),
    Failed,
}

/// Registers a service and sends periodic heartbeats for it.
pub struct HeartbeatAgent {
    config: AgentConfig,
}

impl HeartbeatAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// POST /register for this service.
    pub async fn register(&self) -> RegisterOutcome {
        let body = RegisterBody {
            name: &self.config.name,
            host: &self.config.host,
            port: self.config.port,
        };
        match post_json(&self.config.server, "/register", &body, self.config.timeout).await {
            Some(status) if status.is_success() => RegisterOutcome::Registered,
            Some(StatusCode::CONFLICT) => RegisterOutcome::AlreadyRegistered,
            Some(status) => RegisterOutcome::Rejected(status),
            None => RegisterOutcome::Failed,
        }
    }

    /// POST /heartbeat for this service.
    pub async fn heartbeat(&self) -> HeartbeatOutcome {
        let body = HeartbeatBody {
            name: &self.config.name,
        };
        match post_json(&self.config.server, "/heartbeat", &body, self.config.timeout).await {
            Some(status) if status.is_success() => HeartbeatOutcome::Accepted,
            Some(StatusCode::NOT_FOUND) => HeartbeatOutcome::NotRegistered,
            Some(status) => HeartbeatOutcome::Rejected(status),
            None => HeartbeatOutcome::Failed,
        }
    }

    /// Send one heartbeat, re-registering if the registry has forgotten us.
    pub async fn beat(&self) -> HeartbeatOutcome {
        let name = &self.config.name;
        let outcome = self.heartbeat().await;
        match outcome {
            HeartbeatOutcome::Accepted => debug!(%name, "heartbeat sent"),
            HeartbeatOutcome::NotRegistered => {
                warn!(%name, "registry does not know this service, re-registering");
                self.log_register(self.register().await);
            }
            HeartbeatOutcome::Rejected(status) => {
                warn!(%name, %status, "registry rejected heartbeat");
            }
            HeartbeatOutcome::Failed => warn!(%name, server = %self.config.server, "heartbeat failed"),
        }
        outcome
    }

    /// Register once, then heartbeat every `interval` until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            name = %self.config.name,
            server = %self.config.server,
            interval_secs = self.config.interval.as_secs(),
            "heartbeat agent started"
        );
        self.log_register(self.register().await);

        let period = self.config.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; registration covered it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.beat().await;
                }
                _ = shutdown.changed() => {
                    info!("heartbeat agent shutting down");
                    break;
                }
            }
        }
    }

    fn log_register(&self, outcome: RegisterOutcome) {
        let name = &self.config.name;
        match outcome {
            RegisterOutcome::Registered => info!(%name, "service registered"),
            RegisterOutcome::AlreadyRegistered => info!(%name, "service already registered"),
            RegisterOutcome::Rejected(status) => warn!(%name, %status, "registration rejected"),
            RegisterOutcome::Failed => warn!(%name, server = %self.config.server, "registration failed"),
        }
    }
}
