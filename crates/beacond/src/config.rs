//! beacon.toml configuration.
//!
//! Every field is optional; missing sections fall back to the defaults
//! below. Durations are strings such as `"300s"`, `"500ms"` or `"5m"`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use beacon_health::{MonitorConfig, parse_duration};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub monitor: MonitorSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/beacon/registry.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub liveness_threshold: String,
    pub tick_period: String,
    pub store_deadline: String,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            liveness_threshold: "300s".to_string(),
            tick_period: "40s".to_string(),
            store_deadline: "5s".to_string(),
        }
    }
}

impl BeaconConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.server.listen))
    }

    /// Parse and validate the monitor timings.
    pub fn monitor_config(&self) -> anyhow::Result<MonitorConfig> {
        let config = MonitorConfig {
            liveness_threshold: duration_field("liveness_threshold", &self.monitor.liveness_threshold)?,
            tick_period: duration_field("tick_period", &self.monitor.tick_period)?,
            store_deadline: duration_field("store_deadline", &self.monitor.store_deadline)?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn duration_field(field: &str, value: &str) -> anyhow::Result<std::time::Duration> {
    parse_duration(value).with_context(|| format!("monitor.{field}: invalid duration {value:?}"))
}
