//! Entity collection
//!
//! This module gathers per-entity samples:
//! - Running containers from a [`ContainerRuntime`] (Docker via bollard)
//! - A fixed set of host services from the process table
//!
//! Container fetches run concurrently on a bounded pool; one failing fetch
//! only produces an error-flagged sample for that container.

mod docker;
mod r#loop;
mod runtime;
mod services;


pub use docker::{DockerRuntime, DEFAULT_STATS_TIMEOUT};
pub use r#loop::{CollectionConfig, CollectionLoop, CollectionLoopBuilder};
pub use runtime::{ContainerRef, ContainerRuntime, RuntimeError, StatsSnapshot};
pub use services::{
    default_services, service_rate_key, ServiceScanner, ServiceSpec, DEFAULT_PID_RESCAN_INTERVAL,
};

use crate::ledger::{LedgerOutcome, TrafficLedger};
use crate::models::{EntityKind, EntitySample};
use crate::rate::NetRateCache;
use crate::store::{EntityStore, StoreError};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Concurrent container stats fetches
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

/// Result of one collection, with the details the caller may report on
#[derive(Debug, Default)]
pub struct Collection {
    pub samples: Vec<EntitySample>,
    /// The runtime answered the container listing
    pub runtime_available: bool,
    /// Another collection was in flight; `samples` is the previous batch
    pub reused_previous: bool,
    /// Ledger result when persistence was requested
    pub ledger: Option<Result<LedgerOutcome, StoreError>>,
}

impl Collection {
    pub fn error_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_error()).count()
    }

    pub fn container_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.kind == EntityKind::Container)
            .count()
    }
}

/// Clears the in-flight flag when the collection ends, even if cancelled
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Aggregates container and service samples into one batch
pub struct ContainerStatsAggregator {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    services: Option<ServiceScanner>,
    ledger: TrafficLedger,
    rate_cache: Arc<NetRateCache>,
    workers: Semaphore,
    collecting: AtomicBool,
    last_batch: Mutex<Vec<EntitySample>>,
}

impl ContainerStatsAggregator {
    /// Create an aggregator; without a runtime only services are reported
    pub fn new(
        runtime: Option<Arc<dyn ContainerRuntime>>,
        rate_cache: Arc<NetRateCache>,
        ledger: TrafficLedger,
    ) -> Self {
        Self {
            runtime,
            services: None,
            ledger,
            rate_cache,
            workers: Semaphore::new(DEFAULT_MAX_CONCURRENT_FETCHES),
            collecting: AtomicBool::new(false),
            last_batch: Mutex::new(Vec::new()),
        }
    }

    pub fn with_services(mut self, scanner: ServiceScanner) -> Self {
        self.services = Some(scanner);
        self
    }

    pub fn with_max_concurrent_fetches(mut self, permits: usize) -> Self {
        self.workers = Semaphore::new(permits.max(1));
        self
    }

    pub fn rate_cache(&self) -> &Arc<NetRateCache> {
        &self.rate_cache
    }

    /// Collect one batch of entity samples
    ///
    /// With a store, totals are reconciled through the ledger after every
    /// sample is computed.
    pub async fn collect(&self, store: Option<&dyn EntityStore>) -> Vec<EntitySample> {
        self.collect_detailed(store).await.samples
    }

    /// Like [`collect`](Self::collect), also reporting runtime and ledger status
    pub async fn collect_detailed(&self, store: Option<&dyn EntityStore>) -> Collection {
        if self.collecting.swap(true, Ordering::AcqRel) {
            debug!("Collection already in flight, returning previous batch");
            return Collection {
                samples: self.latest_batch(),
                runtime_available: self.runtime.is_some(),
                reused_previous: true,
                ledger: None,
            };
        }
        let _in_flight = InFlight(&self.collecting);

        let (mut samples, runtime_available) = self.collect_containers().await;

        if let Some(scanner) = &self.services {
            samples.extend(scanner.scan());
        }

        let ledger = store.map(|store| self.ledger.apply(store, &mut samples));

        self.evict_stale_rates(&samples);
        *self.last_batch.lock().unwrap_or_else(PoisonError::into_inner) = samples.clone();

        Collection {
            samples,
            runtime_available,
            reused_previous: false,
            ledger,
        }
    }

    /// Most recently completed batch
    pub fn latest_batch(&self) -> Vec<EntitySample> {
        self.last_batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn collect_containers(&self) -> (Vec<EntitySample>, bool) {
        let Some(runtime) = &self.runtime else {
            return (Vec::new(), false);
        };

        let containers = match runtime.list_active_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Container runtime unavailable, reporting no containers");
                return (Vec::new(), false);
            }
        };

        let fetches = containers
            .iter()
            .map(|container| self.fetch_container(runtime.as_ref(), container));
        let samples = join_all(fetches).await;

        (samples, true)
    }

    async fn fetch_container(
        &self,
        runtime: &dyn ContainerRuntime,
        container: &ContainerRef,
    ) -> EntitySample {
        let _permit = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(e) => return failed_container(container, e.to_string()),
        };

        match runtime.stats_snapshot(container).await {
            Ok(stats) => self.container_sample(container, &stats, Instant::now()),
            Err(e) => {
                debug!(
                    container_id = %container.short_id(),
                    container = %container.name,
                    error = %e,
                    "Failed to fetch container stats"
                );
                failed_container(container, e.to_string())
            }
        }
    }

    fn container_sample(
        &self,
        container: &ContainerRef,
        stats: &StatsSnapshot,
        now: Instant,
    ) -> EntitySample {
        let counters = stats.network_totals();
        let rates = self.rate_cache.advance(container.short_id(), counters, now);

        EntitySample {
            kind: EntityKind::Container,
            id: container.short_id().to_string(),
            name: container.name.clone(),
            state: container.state.clone(),
            cpu_percent: stats.cpu_percent(),
            memory_usage_bytes: stats.memory_usage,
            memory_limit_bytes: stats.memory_limit,
            memory_percent: stats.memory_percent(),
            net_rx_cumulative_bytes: counters.rx_bytes,
            net_tx_cumulative_bytes: counters.tx_bytes,
            net_rx_speed_bps: rates.rx_bps,
            net_tx_speed_bps: rates.tx_bps,
            error: None,
        }
    }

    /// Drop rate windows of entities that are gone from the batch
    fn evict_stale_rates(&self, samples: &[EntitySample]) {
        let live: HashSet<String> = samples.iter().map(rate_key).collect();
        let removed = self.rate_cache.retain_keys(&live);
        if removed > 0 {
            debug!(removed, "Evicted rate windows of departed entities");
        }
    }
}

fn failed_container(container: &ContainerRef, error: String) -> EntitySample {
    EntitySample::failed(
        EntityKind::Container,
        container.short_id(),
        container.name.clone(),
        container.state.clone(),
        error,
    )
}

/// Key of the entity's window in the shared rate cache
pub fn rate_key(sample: &EntitySample) -> String {
    match sample.kind {
        EntityKind::Container => sample.id.clone(),
        EntityKind::Service => service_rate_key(&sample.name),
    }
}
