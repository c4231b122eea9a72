//! Threshold alerting
//!
//! This module handles:
//! - Fixed warning/critical thresholds for host metrics
//! - Cooldowns per (metric, level) so a sustained condition alerts once
//! - Naming the likely top consumer in the alert message
//! - Persisting fired alerts in one batch

mod attribution;
mod engine;

pub use attribution::{
    attribute_load, attribute_upload, Attribution, Culprit, ENTITY_SHARE_THRESHOLD,
    PROCESS_SHARE_THRESHOLD, UPLOAD_SHARE_THRESHOLD,
};
pub use engine::{AlertEngine, Evaluation, FiredAlert, DEFAULT_COOLDOWN};

use crate::models::{AlertLevel, HostSample};

/// Host metrics that can raise alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Cpu,
    Ram,
    Disk,
    Temperature,
    Upload,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Cpu,
        Metric::Ram,
        Metric::Disk,
        Metric::Temperature,
        Metric::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Ram => "ram",
            Metric::Disk => "disk",
            Metric::Temperature => "temperature",
            Metric::Upload => "upload",
        }
    }

    /// Current value of this metric, if the host reports one
    pub fn value(&self, host: &HostSample) -> Option<f64> {
        match self {
            Metric::Cpu => Some(host.cpu_percent),
            Metric::Ram => Some(host.ram_percent),
            Metric::Disk => Some(host.disk_percent),
            Metric::Temperature => host.cpu_temp_celsius,
            Metric::Upload => Some(host.net_sent_kbps),
        }
    }

    /// Message text for a firing value
    fn describe(&self, value: f64) -> String {
        match self {
            Metric::Cpu => format!("High CPU usage: {value:.1}%"),
            Metric::Ram => format!("High RAM usage: {value:.1}%"),
            Metric::Disk => format!("Disk almost full: {value:.1}%"),
            Metric::Temperature => format!("High CPU temperature: {value:.1}°C"),
            Metric::Upload => format!("High upload rate: {value:.0} KB/s"),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warning and critical levels for one metric; a crossing is `value >= level`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub warning: Option<f64>,
    pub critical: Option<f64>,
}

impl Threshold {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self {
            warning: Some(warning),
            critical: Some(critical),
        }
    }

    pub const fn warning_only(warning: f64) -> Self {
        Self {
            warning: Some(warning),
            critical: None,
        }
    }

    /// Highest level crossed by `value`
    pub fn level(&self, value: f64) -> Option<AlertLevel> {
        if !value.is_finite() {
            return None;
        }
        if self.critical.is_some_and(|critical| value >= critical) {
            Some(AlertLevel::Critical)
        } else if self.warning.is_some_and(|warning| value >= warning) {
            Some(AlertLevel::Warning)
        } else {
            None
        }
    }
}

/// Thresholds for every alerting metric
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Percent
    pub cpu: Threshold,
    /// Percent
    pub ram: Threshold,
    /// Percent
    pub disk: Threshold,
    /// Degrees Celsius
    pub temperature: Threshold,
    /// KB/s outbound over physical interfaces
    pub upload_kbps: Threshold,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: Threshold::new(80.0, 95.0),
            ram: Threshold::new(85.0, 95.0),
            disk: Threshold::new(90.0, 98.0),
            temperature: Threshold::new(75.0, 85.0),
            upload_kbps: Threshold::warning_only(5.0 * 1024.0),
        }
    }
}

impl Thresholds {
    pub fn for_metric(&self, metric: Metric) -> Threshold {
        match metric {
            Metric::Cpu => self.cpu,
            Metric::Ram => self.ram,
            Metric::Disk => self.disk,
            Metric::Temperature => self.temperature,
            Metric::Upload => self.upload_kbps,
        }
    }
}
