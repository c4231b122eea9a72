//! Monitor configuration

use anyhow::{Context, Result};
use monitor_lib::collector::{default_services, ServiceSpec};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file, overridden by `MONITOR_CONFIG`
pub const DEFAULT_CONFIG_FILE: &str = "monitor.toml";

/// Monitor configuration
///
/// Read from an optional TOML file, then from `MONITOR_*` environment
/// variables (e.g. `MONITOR_API_PORT=9100`).
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Host name used in structured logs
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Collection interval in seconds
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    /// JSON file holding traffic totals and alerts
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// Report containers from the local Docker daemon
    #[serde(default = "default_docker_enabled")]
    pub docker_enabled: bool,

    /// Alerts older than this many days are pruned
    #[serde(default = "default_alert_retention_days")]
    pub alert_retention_days: u64,

    /// Seconds before a repeated alert may fire again
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_secs: u64,

    /// Host services reported next to containers
    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_collection_interval() -> u64 {
    5
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/monitor.json")
}

fn default_docker_enabled() -> bool {
    true
}

fn default_alert_retention_days() -> u64 {
    7
}

fn default_alert_cooldown() -> u64 {
    15 * 60
}

impl MonitorConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("MONITOR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load_from(&file)
    }

    /// Load with an explicit config file; a missing file is not an error
    pub fn load_from(file: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("MONITOR").try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read configuration from {file}"))?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid monitor configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.collection_interval_secs == 0 {
            anyhow::bail!("collection_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn alert_retention(&self) -> Duration {
        Duration::from_secs(self.alert_retention_days * 24 * 60 * 60)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }
}
