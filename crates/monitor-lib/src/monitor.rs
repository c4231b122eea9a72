//! The monitoring engine
//!
//! [`Monitor`] is built once at startup and owns every cache as a named
//! field:
//! - host sample cache (2 s) and host network rate window, in the sampler
//! - per-entity rate windows, shared by containers and services
//! - service pid cache (30 s), in the scanner
//! - alert cooldowns (15 min), in the alert engine

use crate::alerts::{AlertEngine, Evaluation, FiredAlert, Thresholds, DEFAULT_COOLDOWN};
use crate::collector::{
    ContainerRuntime, ContainerStatsAggregator, ServiceScanner, ServiceSpec,
    DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_PID_RESCAN_INTERVAL,
};
use crate::host::{
    HostMetricsProvider, HostSampler, SharedProcessProvider, DEFAULT_MIN_SAMPLE_INTERVAL,
};
use crate::ledger::TrafficLedger;
use crate::models::{AlertRecord, EntitySample, HostSample};
use crate::observability::StructuredLogger;
use crate::rate::NetRateCache;
use crate::store::{EntityStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Errors when assembling a [`Monitor`]
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{0} is required")]
    Missing(&'static str),
}

/// Summary of one collection cycle
#[derive(Debug)]
pub struct CycleReport {
    pub host: HostSample,
    pub entity_count: usize,
    pub container_count: usize,
    pub entity_errors: usize,
    pub runtime_available: bool,
    /// The previous entity batch was reused (a collection was in flight)
    pub reused_previous: bool,
    pub counter_resets: u64,
    pub ledger_error: Option<StoreError>,
    pub alerts_fired: Vec<FiredAlert>,
    pub alert_persist_error: Option<StoreError>,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Single-host monitoring engine
pub struct Monitor {
    host: HostSampler,
    entities: ContainerStatsAggregator,
    alerts: AlertEngine,
    store: Arc<dyn EntityStore>,
    logger: StructuredLogger,
}

impl Monitor {
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    /// Host sample, cached for a short interval
    pub fn sample_host(&self) -> HostSample {
        self.host.sample()
    }

    /// Collect containers and services; with `persist` the ledger totals
    /// replace the runtime counters
    pub async fn collect_entities(&self, persist: bool) -> Vec<EntitySample> {
        let store = persist.then_some(self.store.as_ref());
        self.entities.collect(store).await
    }

    /// Evaluate alerts for a host sample against the latest entity batch
    pub fn evaluate_alerts(&self, host: &HostSample) -> Vec<AlertRecord> {
        let entities = self.entities.latest_batch();
        self.alerts.evaluate(host, &entities, self.store.as_ref())
    }

    /// One full cycle: host sample, persisted entity batch, alerts
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();

        let host = self.sample_host();
        let mut collection = self
            .entities
            .collect_detailed(Some(self.store.as_ref()))
            .await;

        let (counter_resets, ledger_error) = match collection.ledger.take() {
            Some(Ok(outcome)) => (outcome.resets, None),
            Some(Err(e)) => (0, Some(e)),
            None => (0, None),
        };

        let Evaluation {
            fired,
            persist_error,
            ..
        } = self
            .alerts
            .evaluate_detailed(&host, &collection.samples, self.store.as_ref());

        let report = CycleReport {
            entity_count: collection.samples.len(),
            container_count: collection.container_count(),
            entity_errors: collection.error_count(),
            runtime_available: collection.runtime_available,
            reused_previous: collection.reused_previous,
            counter_resets,
            ledger_error,
            alerts_fired: fired,
            alert_persist_error: persist_error,
            elapsed: start.elapsed(),
            finished_at: Utc::now(),
            host,
        };

        debug!(
            entities = report.entity_count,
            errors = report.entity_errors,
            alerts = report.alerts_fired.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle complete"
        );
        report
    }

    /// Delete alerts older than `retention`
    pub fn prune_alerts(&self, retention: Duration) -> Result<usize, StoreError> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| StoreError::Unavailable(format!("invalid retention: {e}")))?;
        let cutoff = Utc::now() - retention;

        let mut tx = self.store.begin()?;
        let removed = tx.prune_alerts(cutoff)?;
        tx.commit()?;

        if removed > 0 {
            debug!(removed, "Pruned old alerts");
        }
        Ok(removed)
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }
}

/// Builder for [`Monitor`]
pub struct MonitorBuilder {
    host_provider: Option<Box<dyn HostMetricsProvider>>,
    processes: Option<SharedProcessProvider>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    store: Option<Arc<dyn EntityStore>>,
    services: Vec<ServiceSpec>,
    host_cache: Duration,
    pid_rescan: Duration,
    cooldown: Duration,
    thresholds: Thresholds,
    max_concurrent_fetches: usize,
    logger: StructuredLogger,
}

impl MonitorBuilder {
    pub fn new() -> Self {
        Self {
            host_provider: None,
            processes: None,
            runtime: None,
            store: None,
            services: Vec::new(),
            host_cache: DEFAULT_MIN_SAMPLE_INTERVAL,
            pid_rescan: DEFAULT_PID_RESCAN_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            thresholds: Thresholds::default(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            logger: StructuredLogger::default(),
        }
    }

    pub fn host_provider(mut self, provider: impl HostMetricsProvider + 'static) -> Self {
        self.host_provider = Some(Box::new(provider));
        self
    }

    /// Process table used by the service scanner and alert attribution
    pub fn processes(mut self, processes: SharedProcessProvider) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn services(mut self, services: Vec<ServiceSpec>) -> Self {
        self.services = services;
        self
    }

    pub fn host_cache(mut self, interval: Duration) -> Self {
        self.host_cache = interval;
        self
    }

    pub fn pid_rescan(mut self, interval: Duration) -> Self {
        self.pid_rescan = interval;
        self
    }

    pub fn alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn max_concurrent_fetches(mut self, permits: usize) -> Self {
        self.max_concurrent_fetches = permits;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Result<Monitor, BuildError> {
        let host_provider = self
            .host_provider
            .ok_or(BuildError::Missing("host provider"))?;
        let store = self.store.ok_or(BuildError::Missing("store"))?;

        let rate_cache = Arc::new(NetRateCache::new());
        let mut entities = ContainerStatsAggregator::new(
            self.runtime,
            rate_cache.clone(),
            TrafficLedger::new(self.logger.clone()),
        )
        .with_max_concurrent_fetches(self.max_concurrent_fetches);

        let mut alerts = AlertEngine::new(self.logger.clone())
            .with_cooldown(self.cooldown)
            .with_thresholds(self.thresholds);

        match self.processes {
            Some(processes) => {
                if !self.services.is_empty() {
                    let scanner = ServiceScanner::new(self.services, processes.clone(), rate_cache)
                        .with_rescan_interval(self.pid_rescan);
                    entities = entities.with_services(scanner);
                }
                alerts = alerts.with_processes(processes);
            }
            None if !self.services.is_empty() => {
                warn!(
                    services = self.services.len(),
                    "No process provider configured, services will not be scanned"
                );
            }
            None => {}
        }

        Ok(Monitor {
            host: HostSampler::new(host_provider).with_min_interval(self.host_cache),
            entities,
            alerts,
            store,
            logger: self.logger,
        })
    }
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
