//! Observability infrastructure for the monitor
//!
//! Provides:
//! - Prometheus metrics (cycle latency, monitored entities, errors, alerts)
//! - Structured JSON logging with tracing

use crate::models::AlertLevel;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    cycle_latency_seconds: Histogram,
    entities_monitored: IntGauge,
    containers_monitored: IntGauge,
    entity_errors: IntCounter,
    alerts_fired: IntCounterVec,
    counter_resets: IntCounter,
    ledger_commit_failures: IntCounter,
    runtime_available: IntGauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "liquid_monitor_cycle_latency_seconds",
                "Time spent on one collection cycle (host, entities, alerts)",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            entities_monitored: register_int_gauge!(
                "liquid_monitor_entities_monitored",
                "Containers and services in the latest batch"
            )
            .expect("Failed to register entities_monitored"),

            containers_monitored: register_int_gauge!(
                "liquid_monitor_containers_monitored",
                "Containers in the latest batch"
            )
            .expect("Failed to register containers_monitored"),

            entity_errors: register_int_counter!(
                "liquid_monitor_entity_errors_total",
                "Entity samples that carried an error"
            )
            .expect("Failed to register entity_errors"),

            alerts_fired: register_int_counter_vec!(
                "liquid_monitor_alerts_fired_total",
                "Alerts fired by level",
                &["level"]
            )
            .expect("Failed to register alerts_fired"),

            counter_resets: register_int_counter!(
                "liquid_monitor_counter_resets_total",
                "Runtime traffic counter resets detected by the ledger"
            )
            .expect("Failed to register counter_resets"),

            ledger_commit_failures: register_int_counter!(
                "liquid_monitor_ledger_commit_failures_total",
                "Traffic ledger batches rolled back after a failed commit"
            )
            .expect("Failed to register ledger_commit_failures"),

            runtime_available: register_int_gauge!(
                "liquid_monitor_container_runtime_available",
                "1 if the container runtime answered the last listing, else 0"
            )
            .expect("Failed to register runtime_available"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    /// Update entity gauges from the latest batch
    pub fn set_entities_monitored(&self, entities: i64, containers: i64) {
        self.inner().entities_monitored.set(entities);
        self.inner().containers_monitored.set(containers);
    }

    pub fn add_entity_errors(&self, count: u64) {
        self.inner().entity_errors.inc_by(count);
    }

    pub fn inc_alerts_fired(&self, level: AlertLevel) {
        self.inner()
            .alerts_fired
            .with_label_values(&[&level.to_string()])
            .inc();
    }

    pub fn add_counter_resets(&self, count: u64) {
        self.inner().counter_resets.inc_by(count);
    }

    pub fn inc_ledger_commit_failures(&self) {
        self.inner().ledger_commit_failures.inc();
    }

    pub fn set_runtime_available(&self, available: bool) {
        self.inner().runtime_available.set(i64::from(available));
    }
}

/// Structured logger for monitor events
///
/// Emits event-shaped records (an `event` field plus named values) so the
/// JSON log stream can be filtered by event type.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str, data_file: &str, docker_enabled: bool) {
        info!(
            event = "agent_started",
            host = %self.host,
            agent_version = %version,
            data_file = %data_file,
            docker_enabled = docker_enabled,
            "Liquid monitor started"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            host = %self.host,
            reason = %reason,
            "Liquid monitor shutting down"
        );
    }

    /// Log a fired alert
    pub fn log_alert(&self, metric: &str, level: AlertLevel, value: f64, message: &str) {
        match level {
            AlertLevel::Critical => warn!(
                event = "alert_fired",
                host = %self.host,
                metric = %metric,
                level = %level,
                value = value,
                message = %message,
                "Critical alert fired"
            ),
            AlertLevel::Warning => info!(
                event = "alert_fired",
                host = %self.host,
                metric = %metric,
                level = %level,
                value = value,
                message = %message,
                "Alert fired"
            ),
        }
    }

    /// Log a runtime counter that went backwards (entity restarted)
    pub fn log_counter_reset(&self, entity: &str, direction: &str, last_seen: u64, runtime: u64) {
        info!(
            event = "counter_reset",
            host = %self.host,
            entity = %entity,
            direction = %direction,
            last_seen = last_seen,
            runtime = runtime,
            "Traffic counter reset detected"
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("localhost")
    }
}
