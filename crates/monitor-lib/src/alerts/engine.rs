//! Alert evaluation with cooldowns

use super::attribution::{attribute_load, attribute_upload, Attribution};
use super::{Metric, Thresholds};
use crate::host::{ProcessStat, SharedProcessProvider};
use crate::models::{AlertLevel, AlertRecord, EntitySample, HostSample};
use crate::observability::StructuredLogger;
use crate::store::{EntityStore, StoreError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default cooldown per (metric, level) (15 minutes)
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// An alert that passed its threshold and cooldown in one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct FiredAlert {
    pub metric: Metric,
    pub level: AlertLevel,
    pub value: f64,
    pub message: String,
    pub attribution: Option<Attribution>,
}

/// Outcome of one evaluation
#[derive(Debug, Default)]
pub struct Evaluation {
    pub fired: Vec<FiredAlert>,
    /// Persisted records; empty when persistence failed
    pub records: Vec<AlertRecord>,
    pub persist_error: Option<StoreError>,
}

/// Threshold alert engine
///
/// Cooldowns are kept in memory only, so they start empty after a restart.
pub struct AlertEngine {
    thresholds: Thresholds,
    cooldown: Duration,
    /// (metric, level) -> last time it fired
    last_fired: Mutex<HashMap<(Metric, AlertLevel), Instant>>,
    /// Host process table for attribution
    processes: Option<SharedProcessProvider>,
    logger: StructuredLogger,
}

impl AlertEngine {
    /// Create an engine with the default thresholds and 15-minute cooldown
    pub fn new(logger: StructuredLogger) -> Self {
        Self {
            thresholds: Thresholds::default(),
            cooldown: DEFAULT_COOLDOWN,
            last_fired: Mutex::new(HashMap::new()),
            processes: None,
            logger,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Use the host process table as the fallback for attribution
    pub fn with_processes(mut self, processes: SharedProcessProvider) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Evaluate the host sample and return the persisted alert records
    pub fn evaluate(
        &self,
        host: &HostSample,
        entities: &[EntitySample],
        store: &dyn EntityStore,
    ) -> Vec<AlertRecord> {
        self.evaluate_detailed(host, entities, store).records
    }

    /// Evaluate, persist in one commit and report what happened
    ///
    /// Cooldowns start when an alert fires, whether or not it is persisted.
    pub fn evaluate_detailed(
        &self,
        host: &HostSample,
        entities: &[EntitySample],
        store: &dyn EntityStore,
    ) -> Evaluation {
        let fired = self.fire(host, entities, Instant::now());
        if fired.is_empty() {
            return Evaluation::default();
        }

        match persist(store, &fired) {
            Ok(records) => Evaluation {
                fired,
                records,
                persist_error: None,
            },
            Err(e) => {
                warn!(error = %e, alerts = fired.len(), "Failed to persist alerts");
                Evaluation {
                    fired,
                    records: Vec::new(),
                    persist_error: Some(e),
                }
            }
        }
    }

    fn fire(&self, host: &HostSample, entities: &[EntitySample], now: Instant) -> Vec<FiredAlert> {
        let mut fired = Vec::new();

        for metric in Metric::ALL {
            let Some(value) = metric.value(host) else {
                continue;
            };
            let Some(level) = self.thresholds.for_metric(metric).level(value) else {
                continue;
            };

            if !self.start_cooldown(metric, level, now) {
                debug!(metric = %metric, level = %level, value, "Alert suppressed by cooldown");
                continue;
            }

            let attribution = self.attribute(metric, host, entities);
            let message = match &attribution {
                Some(attribution) => {
                    format!("{} ({})", metric.describe(value), attribution.describe(metric))
                }
                None => metric.describe(value),
            };

            self.logger.log_alert(metric.as_str(), level, value, &message);
            fired.push(FiredAlert {
                metric,
                level,
                value,
                message,
                attribution,
            });
        }

        fired
    }

    /// Record a firing unless the key is still cooling down
    fn start_cooldown(&self, metric: Metric, level: AlertLevel, now: Instant) -> bool {
        let mut last_fired = self
            .last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(at) = last_fired.get(&(metric, level)) {
            if now.saturating_duration_since(*at) < self.cooldown {
                return false;
            }
        }

        last_fired.insert((metric, level), now);
        true
    }

    fn attribute(
        &self,
        metric: Metric,
        host: &HostSample,
        entities: &[EntitySample],
    ) -> Option<Attribution> {
        match metric {
            Metric::Cpu | Metric::Ram => {
                let processes = self.process_table();
                attribute_load(metric, entities, &processes)
            }
            Metric::Upload => attribute_upload(host.net_sent_kbps, entities),
            Metric::Disk | Metric::Temperature => None,
        }
    }

    fn process_table(&self) -> Vec<ProcessStat> {
        match &self.processes {
            Some(processes) => processes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .scan(),
            None => Vec::new(),
        }
    }

    /// Forget all cooldowns
    pub fn reset_cooldowns(&self) {
        self.last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn persist(store: &dyn EntityStore, fired: &[FiredAlert]) -> Result<Vec<AlertRecord>, StoreError> {
    let created_at = Utc::now();
    let mut tx = store.begin()?;

    let mut records = Vec::with_capacity(fired.len());
    for alert in fired {
        records.push(tx.insert_alert(alert.level, &alert.message, created_at)?);
    }

    tx.commit()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{shared_processes, ProcessProvider};
    use crate::models::{EntityKind, NetCounters};
    use crate::store::LocalStore;
    use std::thread::sleep;
    use tempfile::TempDir;

    fn host(cpu: f64) -> HostSample {
        HostSample {
            cpu_percent: cpu,
            ram_percent: 40.0,
            disk_percent: 50.0,
            disk_total_bytes: 1000,
            disk_used_bytes: 500,
            disk_free_bytes: 500,
            cpu_temp_celsius: None,
            net_sent_kbps: 10.0,
            net_recv_kbps: 10.0,
            process_count: 120,
            uptime_seconds: 3600,
            sampled_at: Utc::now(),
        }
    }

    fn engine() -> AlertEngine {
        AlertEngine::new(StructuredLogger::default())
    }

    struct BusyProcesses;

    impl ProcessProvider for BusyProcesses {
        fn scan(&mut self) -> Vec<ProcessStat> {
            vec![ProcessStat {
                pid: 4242,
                name: "ffmpeg".to_string(),
                cpu_percent: 60.0,
                memory_bytes: 0,
                memory_percent: 2.0,
            }]
        }

        fn refresh(&mut self, _: &[u32]) -> Vec<ProcessStat> {
            Vec::new()
        }

        fn interface_counters(&mut self, _: &str) -> Option<NetCounters> {
            None
        }

        fn total_memory(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_critical_cpu_fires_once_within_cooldown() {
        let engine = engine();
        let store = LocalStore::in_memory();

        let first = engine.evaluate(&host(97.0), &[], &store);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].level, AlertLevel::Critical);
        assert!(first[0].message.contains("97.0%"));

        sleep(Duration::from_millis(10));
        let second = engine.evaluate(&host(97.0), &[], &store);
        assert!(second.is_empty());

        assert_eq!(store.begin().unwrap().alerts(10).unwrap().len(), 1);
    }

    #[test]
    fn test_fires_again_after_cooldown() {
        let engine = engine().with_cooldown(Duration::from_millis(50));
        let store = LocalStore::in_memory();

        assert_eq!(engine.evaluate(&host(97.0), &[], &store).len(), 1);
        assert!(engine.evaluate(&host(97.0), &[], &store).is_empty());

        sleep(Duration::from_millis(80));
        assert_eq!(engine.evaluate(&host(97.0), &[], &store).len(), 1);
    }

    #[test]
    fn test_levels_cool_down_independently() {
        let engine = engine();
        let store = LocalStore::in_memory();

        let warning = engine.evaluate(&host(85.0), &[], &store);
        assert_eq!(warning[0].level, AlertLevel::Warning);

        // Warning is cooling down, critical is not
        let critical = engine.evaluate(&host(97.0), &[], &store);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].level, AlertLevel::Critical);

        assert!(engine.evaluate(&host(85.0), &[], &store).is_empty());
    }

    #[test]
    fn test_every_metric_checked() {
        let engine = engine();
        let store = LocalStore::in_memory();
        let mut sample = host(10.0);
        sample.ram_percent = 96.0;
        sample.disk_percent = 91.0;
        sample.cpu_temp_celsius = Some(86.0);
        sample.net_sent_kbps = 6000.0;

        let evaluation = engine.evaluate_detailed(&sample, &[], &store);
        let fired: Vec<(Metric, AlertLevel)> =
            evaluation.fired.iter().map(|a| (a.metric, a.level)).collect();

        assert_eq!(
            fired,
            vec![
                (Metric::Ram, AlertLevel::Critical),
                (Metric::Disk, AlertLevel::Warning),
                (Metric::Temperature, AlertLevel::Critical),
                (Metric::Upload, AlertLevel::Warning),
            ]
        );
        assert_eq!(evaluation.records.len(), 4);
    }

    #[test]
    fn test_missing_temperature_never_alerts() {
        let engine = engine();
        let store = LocalStore::in_memory();

        assert!(engine.evaluate(&host(10.0), &[], &store).is_empty());
    }

    #[test]
    fn test_attribution_in_message() {
        let store = LocalStore::in_memory();
        let mut web = EntitySample::failed(EntityKind::Container, "abc", "web", "running", "");
        web.error = None;
        web.cpu_percent = 41.5;

        let records = engine().evaluate(&host(90.0), &[web], &store);
        let message = &records[0].message;
        assert!(message.contains("container web (41.5%)"), "{message}");

        let with_processes = engine().with_processes(shared_processes(BusyProcesses));
        let records = with_processes.evaluate(&host(90.0), &[], &store);
        let message = &records[0].message;
        assert!(message.contains("process ffmpeg (60.0%)"), "{message}");
    }

    #[test]
    fn test_persistence_failure_still_starts_cooldown() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let broken = LocalStore::open(blocker.join("monitor.json")).unwrap();
        let engine = engine();

        let evaluation = engine.evaluate_detailed(&host(97.0), &[], &broken);
        assert_eq!(evaluation.fired.len(), 1);
        assert!(evaluation.records.is_empty());
        assert!(evaluation.persist_error.is_some());

        let healthy = LocalStore::in_memory();
        assert!(engine.evaluate(&host(97.0), &[], &healthy).is_empty());
    }
}
