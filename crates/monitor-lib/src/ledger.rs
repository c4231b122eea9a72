//! Traffic ledger
//!
//! Container runtimes report network counters that start from zero whenever
//! the container restarts. The ledger turns them into per-name totals that
//! never decrease: each batch adds the growth since the last seen runtime
//! value, and a runtime value below the last seen one counts as a restart
//! (the whole runtime value is new traffic).

use crate::models::{EntityKind, EntitySample, NetCounters, TrafficRecord};
use crate::observability::StructuredLogger;
use crate::store::{EntityStore, StoreError, StoreTransaction};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Bytes added to the total when the runtime counter moves from `last_seen`
/// to `runtime`
pub fn counter_delta(last_seen: u64, runtime: u64) -> u64 {
    if runtime < last_seen {
        runtime
    } else {
        runtime - last_seen
    }
}

/// Result of reconciling one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub totals: NetCounters,
    /// Directions (0–2) whose counter went backwards
    pub resets: u64,
}

/// Summary of one applied batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerOutcome {
    pub reconciled: usize,
    pub resets: u64,
}

/// Reset-aware accumulator of per-entity traffic
#[derive(Debug, Clone, Default)]
pub struct TrafficLedger {
    logger: StructuredLogger,
}

impl TrafficLedger {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }

    /// Fold one runtime observation into the record for `name`
    ///
    /// The first sighting seeds both the totals and the baseline with the
    /// runtime values.
    pub fn reconcile(
        &self,
        tx: &mut (dyn StoreTransaction + '_),
        name: &str,
        runtime: NetCounters,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, StoreError> {
        let (record, resets) = match tx.traffic_record(name)? {
            None => {
                let record = TrafficRecord {
                    name: name.to_string(),
                    total_rx_bytes: runtime.rx_bytes,
                    total_tx_bytes: runtime.tx_bytes,
                    last_seen_runtime_rx: runtime.rx_bytes,
                    last_seen_runtime_tx: runtime.tx_bytes,
                    updated_at: now,
                };
                (record, 0)
            }
            Some(existing) => {
                let mut resets = 0;
                if runtime.rx_bytes < existing.last_seen_runtime_rx {
                    self.logger.log_counter_reset(
                        name,
                        "rx",
                        existing.last_seen_runtime_rx,
                        runtime.rx_bytes,
                    );
                    resets += 1;
                }
                if runtime.tx_bytes < existing.last_seen_runtime_tx {
                    self.logger.log_counter_reset(
                        name,
                        "tx",
                        existing.last_seen_runtime_tx,
                        runtime.tx_bytes,
                    );
                    resets += 1;
                }

                let record = TrafficRecord {
                    name: name.to_string(),
                    total_rx_bytes: existing.total_rx_bytes.saturating_add(counter_delta(
                        existing.last_seen_runtime_rx,
                        runtime.rx_bytes,
                    )),
                    total_tx_bytes: existing.total_tx_bytes.saturating_add(counter_delta(
                        existing.last_seen_runtime_tx,
                        runtime.tx_bytes,
                    )),
                    last_seen_runtime_rx: runtime.rx_bytes,
                    last_seen_runtime_tx: runtime.tx_bytes,
                    updated_at: now,
                };
                (record, resets)
            }
        };

        let totals = NetCounters::new(record.total_rx_bytes, record.total_tx_bytes);
        tx.put_traffic_record(record)?;
        Ok(Reconciled { totals, resets })
    }

    /// Reconcile a whole batch in one transaction and commit once
    ///
    /// On success the samples' cumulative counters are replaced by the ledger
    /// totals. Error-flagged samples are not reconciled; they report the
    /// persisted totals when a record exists. On failure the transaction is
    /// rolled back and the samples keep their runtime counters.
    ///
    /// A name is reconciled at most once per batch. When a service shares its
    /// name with a container, the container owns the record and the service
    /// sample keeps its runtime counters.
    pub fn apply(
        &self,
        store: &dyn EntityStore,
        samples: &mut [EntitySample],
    ) -> Result<LedgerOutcome, StoreError> {
        let now = Utc::now();
        let mut tx = store.begin()?;
        let mut totals: Vec<(usize, NetCounters)> = Vec::with_capacity(samples.len());
        let mut outcome = LedgerOutcome::default();

        let container_names: HashSet<&str> = samples
            .iter()
            .filter(|s| s.kind == EntityKind::Container)
            .map(|s| s.name.as_str())
            .collect();
        let mut seen: HashSet<&str> = HashSet::with_capacity(samples.len());

        for (idx, sample) in samples.iter().enumerate() {
            if sample.name.is_empty() {
                continue;
            }

            let shadowed =
                sample.kind == EntityKind::Service && container_names.contains(sample.name.as_str());
            if shadowed || !seen.insert(sample.name.as_str()) {
                debug!(
                    entity = %sample.name,
                    kind = %sample.kind,
                    "Name already reconciled in this batch, skipping"
                );
                continue;
            }

            let result = if sample.is_error() {
                tx.traffic_record(&sample.name).map(|record| {
                    record.map(|r| NetCounters::new(r.total_rx_bytes, r.total_tx_bytes))
                })
            } else {
                let runtime =
                    NetCounters::new(sample.net_rx_cumulative_bytes, sample.net_tx_cumulative_bytes);
                self.reconcile(tx.as_mut(), &sample.name, runtime, now)
                    .map(|reconciled| {
                        outcome.reconciled += 1;
                        outcome.resets += reconciled.resets;
                        Some(reconciled.totals)
                    })
            };

            match result {
                Ok(Some(entity_totals)) => totals.push((idx, entity_totals)),
                Ok(None) => {}
                Err(e) => {
                    warn!(entity = %sample.name, error = %e, "Ledger update failed, rolling back batch");
                    tx.rollback();
                    return Err(e);
                }
            }
        }

        if let Err(e) = tx.commit() {
            warn!(error = %e, entities = samples.len(), "Ledger commit failed, batch rolled back");
            return Err(e);
        }

        for (idx, entity_totals) in totals {
            samples[idx].net_rx_cumulative_bytes = entity_totals.rx_bytes;
            samples[idx].net_tx_cumulative_bytes = entity_totals.tx_bytes;
        }

        debug!(
            reconciled = outcome.reconciled,
            resets = outcome.resets,
            "Ledger batch committed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::TempDir;

    fn sample(name: &str, rx: u64, tx: u64) -> EntitySample {
        let mut sample = EntitySample::failed(EntityKind::Container, "abc", name, "running", "");
        sample.error = None;
        sample.net_rx_cumulative_bytes = rx;
        sample.net_tx_cumulative_bytes = tx;
        sample
    }

    fn apply_one(ledger: &TrafficLedger, store: &LocalStore, rx: u64) -> u64 {
        let mut batch = vec![sample("web", rx, 0)];
        ledger.apply(store, &mut batch).unwrap();
        batch[0].net_rx_cumulative_bytes
    }

    #[test]
    fn test_counter_delta() {
        assert_eq!(counter_delta(1000, 1500), 500);
        assert_eq!(counter_delta(1500, 1500), 0);
        // Restart: the full runtime value is new traffic
        assert_eq!(counter_delta(1500, 200), 200);
        assert_eq!(counter_delta(1500, 0), 0);
    }

    #[test]
    fn test_web_restart_scenario() {
        let ledger = TrafficLedger::default();
        let store = LocalStore::in_memory();

        assert_eq!(apply_one(&ledger, &store, 1000), 1000);
        assert_eq!(apply_one(&ledger, &store, 1500), 1500);
        assert_eq!(apply_one(&ledger, &store, 200), 1700);
        assert_eq!(apply_one(&ledger, &store, 450), 1950);

        let record = store.begin().unwrap().traffic_record("web").unwrap().unwrap();
        assert_eq!(record.total_rx_bytes, 1950);
        assert_eq!(record.last_seen_runtime_rx, 450);
    }

    #[test]
    fn test_totals_never_decrease() {
        let ledger = TrafficLedger::default();
        let store = LocalStore::in_memory();
        let mut previous = 0;

        for runtime in [500, 900, 100, 100, 0, 3000, 20, 20_000] {
            let total = apply_one(&ledger, &store, runtime);
            assert!(total >= previous, "{total} < {previous} at runtime {runtime}");
            previous = total;
        }
    }

    #[test]
    fn test_reset_counted_per_direction() {
        let ledger = TrafficLedger::default();
        let store = LocalStore::in_memory();

        ledger.apply(&store, &mut [sample("db", 1000, 1000)]).unwrap();
        let outcome = ledger.apply(&store, &mut [sample("db", 10, 2000)]).unwrap();

        assert_eq!(outcome.reconciled, 1);
        assert_eq!(outcome.resets, 1);
    }

    #[test]
    fn test_container_and_same_named_service_share_no_row() {
        let ledger = TrafficLedger::default();
        let store = LocalStore::in_memory();

        for _ in 0..4 {
            let mut service = sample("cloudflared", 0, 0);
            service.kind = EntityKind::Service;
            service.id = "812".to_string();
            let mut batch = vec![sample("cloudflared", 10_000, 300), service];

            let outcome = ledger.apply(&store, &mut batch).unwrap();

            assert_eq!(outcome.reconciled, 1);
            assert_eq!(outcome.resets, 0);
            assert_eq!(batch[0].net_rx_cumulative_bytes, 10_000);
            assert_eq!(batch[0].net_tx_cumulative_bytes, 300);
            assert_eq!(batch[1].net_rx_cumulative_bytes, 0);
        }

        let record = store
            .begin()
            .unwrap()
            .traffic_record("cloudflared")
            .unwrap()
            .unwrap();
        assert_eq!(record.total_rx_bytes, 10_000);
        assert_eq!(record.last_seen_runtime_rx, 10_000);
    }

    #[test]
    fn test_service_reconciled_when_no_container_claims_name() {
        let ledger = TrafficLedger::default();
        let store = LocalStore::in_memory();
        let mut service = sample("tailscale", 700, 70);
        service.kind = EntityKind::Service;

        ledger.apply(&store, &mut [service.clone()]).unwrap();
        service.net_rx_cumulative_bytes = 900;
        let mut batch = [service];
        ledger.apply(&store, &mut batch).unwrap();

        assert_eq!(batch[0].net_rx_cumulative_bytes, 900);
        let record = store.begin().unwrap().traffic_record("tailscale").unwrap().unwrap();
        assert_eq!(record.total_rx_bytes, 900);
    }

    #[test]
    fn test_error_sample_reports_persisted_totals() {
        let ledger = TrafficLedger::default();
        let store = LocalStore::in_memory();
        ledger.apply(&store, &mut [sample("web", 1000, 400)]).unwrap();

        let mut batch = vec![
            EntitySample::failed(EntityKind::Container, "abc", "web", "running", "timeout"),
            EntitySample::failed(EntityKind::Container, "def", "new", "running", "timeout"),
        ];
        let outcome = ledger.apply(&store, &mut batch).unwrap();

        assert_eq!(outcome.reconciled, 0);
        assert_eq!(batch[0].net_rx_cumulative_bytes, 1000);
        assert_eq!(batch[0].net_tx_cumulative_bytes, 400);
        assert_eq!(batch[1].net_rx_cumulative_bytes, 0);

        // The zeroed counters were not taken as a reset
        let record = store.begin().unwrap().traffic_record("web").unwrap().unwrap();
        assert_eq!(record.last_seen_runtime_rx, 1000);
        assert!(store.begin().unwrap().traffic_record("new").unwrap().is_none());
    }

    #[test]
    fn test_failed_commit_keeps_runtime_counters() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("monitor.json");
        std::fs::create_dir(path.with_extension("tmp")).unwrap();
        let store = LocalStore::open(&path).unwrap();
        let ledger = TrafficLedger::default();

        let mut batch = vec![sample("web", 1000, 10), sample("api", 5, 5)];
        assert!(ledger.apply(&store, &mut batch).is_err());

        assert_eq!(batch[0].net_rx_cumulative_bytes, 1000);
        assert!(store.begin().unwrap().traffic_records().unwrap().is_empty());
    }
}
