//! Core data models for the monitoring engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative byte counters for one direction pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl NetCounters {
    pub fn new(rx_bytes: u64, tx_bytes: u64) -> Self {
        Self { rx_bytes, tx_bytes }
    }

    /// Sum of two counter pairs, saturating instead of wrapping
    pub fn saturating_add(self, other: NetCounters) -> Self {
        Self {
            rx_bytes: self.rx_bytes.saturating_add(other.rx_bytes),
            tx_bytes: self.tx_bytes.saturating_add(other.tx_bytes),
        }
    }
}

/// Host-wide resource snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
    pub disk_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_free_bytes: u64,
    pub cpu_temp_celsius: Option<f64>,
    /// Outbound rate over physical interfaces, KB/s
    pub net_sent_kbps: f64,
    /// Inbound rate over physical interfaces, KB/s
    pub net_recv_kbps: f64,
    pub process_count: u64,
    pub uptime_seconds: u64,
    pub sampled_at: DateTime<Utc>,
}

/// What produced an entity sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Container,
    Service,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Container => write!(f, "container"),
            EntityKind::Service => write!(f, "service"),
        }
    }
}

/// Per-entity measurement for one collection cycle
///
/// Containers and scanned services share this shape. `name` is the join key
/// into the traffic ledger; for services `id` is the process id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySample {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    pub state: String,
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percent: f64,
    pub net_rx_cumulative_bytes: u64,
    pub net_tx_cumulative_bytes: u64,
    pub net_rx_speed_bps: f64,
    pub net_tx_speed_bps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntitySample {
    /// Sample for an entity whose stats could not be read: all numbers zeroed
    pub fn failed(
        kind: EntityKind,
        id: impl Into<String>,
        name: impl Into<String>,
        state: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            state: state.into(),
            cpu_percent: 0.0,
            memory_usage_bytes: 0,
            memory_limit_bytes: 0,
            memory_percent: 0.0,
            net_rx_cumulative_bytes: 0,
            net_tx_cumulative_bytes: 0,
            net_rx_speed_bps: 0.0,
            net_tx_speed_bps: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Persisted cumulative traffic for one entity name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub name: String,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
    pub last_seen_runtime_rx: u64,
    pub last_seen_runtime_tx: u64,
    pub updated_at: DateTime<Utc>,
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: u64,
    pub level: AlertLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_sample_is_zeroed() {
        let sample = EntitySample::failed(
            EntityKind::Container,
            "abc123",
            "web",
            "running",
            "stats timed out",
        );

        assert!(sample.is_error());
        assert_eq!(sample.name, "web");
        assert_eq!(sample.cpu_percent, 0.0);
        assert_eq!(sample.memory_usage_bytes, 0);
        assert_eq!(sample.net_rx_cumulative_bytes, 0);
        assert_eq!(sample.net_tx_speed_bps, 0.0);
    }

    #[test]
    fn test_error_field_omitted_when_absent() {
        let mut sample =
            EntitySample::failed(EntityKind::Service, "42", "tailscale", "running", "x");
        sample.error = None;

        let json = serde_json::to_value(&sample).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["kind"], "service");
    }

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Critical > AlertLevel::Warning);
        assert_eq!(AlertLevel::Critical.to_string(), "critical");
    }
}
