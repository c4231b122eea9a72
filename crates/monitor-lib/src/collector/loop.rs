//! Periodic collection loop
//!
//! Runs [`Monitor::run_cycle`] on a fixed interval, feeds the results into
//! health and Prometheus metrics, and prunes old alerts once per
//! prune interval.

use crate::health::{components, HealthRegistry};
use crate::monitor::{BuildError, CycleReport, Monitor};
use crate::observability::MonitorMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Time between cycles (default: 5 seconds)
    pub interval: Duration,
    /// Time between alert pruning passes (default: 1 hour)
    pub prune_interval: Duration,
    /// Alerts older than this are pruned (default: 7 days)
    pub alert_retention: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            prune_interval: Duration::from_secs(60 * 60),
            alert_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Collection loop driving one [`Monitor`]
pub struct CollectionLoop {
    monitor: Arc<Monitor>,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    config: CollectionConfig,
}

impl CollectionLoop {
    pub fn new(monitor: Arc<Monitor>, health: HealthRegistry, config: CollectionConfig) -> Self {
        Self {
            monitor,
            health,
            metrics: MonitorMetrics::new(),
            config,
        }
    }

    /// Run until a shutdown signal is received
    ///
    /// A cycle that overruns the interval delays the next tick instead of
    /// queuing catch-up cycles.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            "Starting collection loop"
        );

        self.health.register(components::COLLECTOR).await;
        self.health.register(components::CONTAINER_RUNTIME).await;
        self.health.register(components::STORE).await;

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_prune: Option<Instant> = None;
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.monitor.run_cycle().await;
                    cycles += 1;
                    self.record(&report).await;

                    if cycles == 1 {
                        self.health.set_ready(true).await;
                        info!(entities = report.entity_count, "First collection cycle complete");
                    }

                    if prune_due(last_prune, Instant::now(), self.config.prune_interval) {
                        self.prune().await;
                        last_prune = Some(Instant::now());
                    }
                }
                _ = shutdown.recv() => {
                    info!(cycles, "Shutting down collection loop");
                    break;
                }
            }
        }
    }

    /// Push a cycle report into metrics and health
    async fn record(&self, report: &CycleReport) {
        self.metrics
            .observe_cycle_latency(report.elapsed.as_secs_f64());
        self.metrics.set_entities_monitored(
            report.entity_count as i64,
            report.container_count as i64,
        );
        self.metrics.add_entity_errors(report.entity_errors as u64);
        self.metrics.add_counter_resets(report.counter_resets);
        self.metrics.set_runtime_available(report.runtime_available);
        for alert in &report.alerts_fired {
            self.metrics.inc_alerts_fired(alert.level);
        }

        self.health.record_cycle(report.finished_at).await;
        self.health.set_healthy(components::COLLECTOR).await;

        if report.runtime_available {
            self.health.set_healthy(components::CONTAINER_RUNTIME).await;
        } else {
            self.health
                .set_degraded(
                    components::CONTAINER_RUNTIME,
                    "container runtime unavailable, reporting no containers",
                )
                .await;
        }

        match (&report.ledger_error, &report.alert_persist_error) {
            (Some(e), _) => {
                self.metrics.inc_ledger_commit_failures();
                self.health
                    .set_degraded(components::STORE, format!("ledger commit failed: {e}"))
                    .await;
            }
            (None, Some(e)) => {
                self.health
                    .set_degraded(components::STORE, format!("alert persistence failed: {e}"))
                    .await;
            }
            (None, None) => self.health.set_healthy(components::STORE).await,
        }

        if report.reused_previous {
            debug!("Previous entity batch reused, collection still in flight");
        }
    }

    async fn prune(&self) {
        match self.monitor.prune_alerts(self.config.alert_retention) {
            Ok(removed) => debug!(removed, "Alert retention pass complete"),
            Err(e) => {
                warn!(error = %e, "Failed to prune old alerts");
                self.health
                    .set_degraded(components::STORE, format!("alert pruning failed: {e}"))
                    .await;
            }
        }
    }
}

fn prune_due(last_prune: Option<Instant>, now: Instant, every: Duration) -> bool {
    match last_prune {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= every,
    }
}

/// Builder for the collection loop
pub struct CollectionLoopBuilder {
    monitor: Option<Arc<Monitor>>,
    health: Option<HealthRegistry>,
    config: CollectionConfig,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            monitor: None,
            health: None,
            config: CollectionConfig::default(),
        }
    }

    pub fn monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn prune_interval(mut self, interval: Duration) -> Self {
        self.config.prune_interval = interval;
        self
    }

    pub fn alert_retention(mut self, retention: Duration) -> Self {
        self.config.alert_retention = retention;
        self
    }

    pub fn build(self) -> Result<CollectionLoop, BuildError> {
        let monitor = self.monitor.ok_or(BuildError::Missing("monitor"))?;
        let health = self.health.unwrap_or_default();

        Ok(CollectionLoop::new(monitor, health, self.config))
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::host::{HostMetricsProvider, HostReadings};
    use crate::store::{EntityStore, LocalStore};

    struct IdleHost;

    impl HostMetricsProvider for IdleHost {
        fn read(&mut self) -> HostReadings {
            HostReadings {
                cpu_percent: 5.0,
                memory_total_bytes: 100,
                memory_used_bytes: 10,
                ..Default::default()
            }
        }
    }

    fn monitor(store: Arc<LocalStore>) -> Arc<Monitor> {
        Arc::new(
            Monitor::builder()
                .host_provider(IdleHost)
                .store(store)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_collection_config_default() {
        let config = CollectionConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.prune_interval, Duration::from_secs(3600));
        assert_eq!(config.alert_retention, Duration::from_secs(604_800));
    }

    #[test]
    fn test_prune_due() {
        let now = Instant::now();
        let hour = Duration::from_secs(3600);

        assert!(prune_due(None, now, hour));
        assert!(!prune_due(Some(now), now + Duration::from_secs(60), hour));
        assert!(prune_due(Some(now), now + hour, hour));
    }

    #[test]
    fn test_builder_requires_monitor() {
        let result = CollectionLoopBuilder::new()
            .interval(Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_loop_runs_cycles_until_shutdown() {
        let store = Arc::new(LocalStore::in_memory());
        let health = HealthRegistry::new();

        let collection_loop = CollectionLoopBuilder::new()
            .monitor(monitor(store.clone()))
            .health(health.clone())
            .interval(Duration::from_millis(20))
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(collection_loop.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(health.readiness().await.ready);
        let report = health.health().await;
        assert!(report.last_cycle_at.is_some());
        // No runtime configured: containers are reported as unavailable
        assert_eq!(
            report.components[components::CONTAINER_RUNTIME].status,
            ComponentStatus::Degraded
        );
        assert!(store.begin().unwrap().alerts(10).unwrap().is_empty());
    }
}
