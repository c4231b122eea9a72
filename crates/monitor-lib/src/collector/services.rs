//! Host service scanner
//!
//! A fixed set of host daemons is reported next to the containers. Finding a
//! service means scanning the whole process table, so the name → pid mapping
//! is cached and rebuilt at most every [`DEFAULT_PID_RESCAN_INTERVAL`].
//! Between rebuilds only the cached pids are refreshed.

use crate::host::{ProcessStat, SharedProcessProvider};
use crate::models::{EntityKind, EntitySample, NetCounters};
use crate::rate::{NetRateCache, Rates};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_PID_RESCAN_INTERVAL: Duration = Duration::from_secs(30);

/// A host service to report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Display and ledger name
    pub name: String,
    /// Process name to match exactly
    pub process: String,
    /// Interface whose counters are attributed to the service
    #[serde(default)]
    pub interface: Option<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process: process.into(),
            interface: None,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Rate-cache key, kept apart from container ids
    pub fn rate_key(&self) -> String {
        service_rate_key(&self.name)
    }
}

pub fn service_rate_key(name: &str) -> String {
    format!("service:{name}")
}

/// Services reported when none are configured
pub fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("tailscale", "tailscaled").with_interface("tailscale0"),
        ServiceSpec::new("cloudflared", "cloudflared"),
    ]
}

#[derive(Default)]
struct PidCache {
    pids: HashMap<String, u32>,
    built_at: Option<Instant>,
}

/// Scanner for the configured host services
pub struct ServiceScanner {
    specs: Vec<ServiceSpec>,
    processes: SharedProcessProvider,
    rate_cache: Arc<NetRateCache>,
    pid_cache: Mutex<PidCache>,
    rescan_interval: Duration,
}

impl ServiceScanner {
    pub fn new(
        specs: Vec<ServiceSpec>,
        processes: SharedProcessProvider,
        rate_cache: Arc<NetRateCache>,
    ) -> Self {
        Self {
            specs,
            processes,
            rate_cache,
            pid_cache: Mutex::new(PidCache::default()),
            rescan_interval: DEFAULT_PID_RESCAN_INTERVAL,
        }
    }

    pub fn with_rescan_interval(mut self, interval: Duration) -> Self {
        self.rescan_interval = interval;
        self
    }

    pub fn specs(&self) -> &[ServiceSpec] {
        &self.specs
    }

    /// One sample per configured service that is currently running
    ///
    /// Services with no matching process are left out. A cached pid whose
    /// process has exited is also left out until the next rebuild.
    pub fn scan(&self) -> Vec<EntitySample> {
        if self.specs.is_empty() {
            return Vec::new();
        }

        let mut provider = self.processes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cache = self.pid_cache.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let stale = cache
            .built_at
            .map_or(true, |built| now.saturating_duration_since(built) >= self.rescan_interval);

        let stats: HashMap<u32, ProcessStat> = if stale {
            let table = provider.scan();
            cache.pids = match_services(&self.specs, &table);
            cache.built_at = Some(now);
            debug!(
                processes = table.len(),
                matched = cache.pids.len(),
                "Rebuilt service pid cache"
            );
            table
                .into_iter()
                .filter(|p| cache.pids.values().any(|pid| *pid == p.pid))
                .map(|p| (p.pid, p))
                .collect()
        } else {
            let pids: Vec<u32> = cache.pids.values().copied().collect();
            provider
                .refresh(&pids)
                .into_iter()
                .map(|p| (p.pid, p))
                .collect()
        };

        let total_memory = provider.total_memory();
        let mut samples = Vec::with_capacity(self.specs.len());

        for spec in &self.specs {
            let Some(pid) = cache.pids.get(&spec.name) else {
                continue;
            };
            let Some(stat) = stats.get(pid) else {
                debug!(service = %spec.name, pid = *pid, "Cached service process has exited");
                continue;
            };

            let counters = spec
                .interface
                .as_deref()
                .and_then(|iface| provider.interface_counters(iface));

            samples.push(self.service_sample(spec, stat, counters, total_memory, now));
        }

        samples
    }

    fn service_sample(
        &self,
        spec: &ServiceSpec,
        stat: &ProcessStat,
        counters: Option<NetCounters>,
        total_memory: u64,
        now: Instant,
    ) -> EntitySample {
        let rates = match counters {
            Some(counters) => self.rate_cache.advance(&spec.rate_key(), counters, now),
            None => Rates::ZERO,
        };
        let counters = counters.unwrap_or_default();

        EntitySample {
            kind: EntityKind::Service,
            id: stat.pid.to_string(),
            name: spec.name.clone(),
            state: "running".to_string(),
            cpu_percent: stat.cpu_percent,
            memory_usage_bytes: stat.memory_bytes,
            memory_limit_bytes: total_memory,
            memory_percent: stat.memory_percent,
            net_rx_cumulative_bytes: counters.rx_bytes,
            net_tx_cumulative_bytes: counters.tx_bytes,
            net_rx_speed_bps: rates.rx_bps,
            net_tx_speed_bps: rates.tx_bps,
            error: None,
        }
    }
}

/// Lowest pid whose name matches each spec's process name
fn match_services(specs: &[ServiceSpec], table: &[ProcessStat]) -> HashMap<String, u32> {
    specs
        .iter()
        .filter_map(|spec| {
            table
                .iter()
                .filter(|p| p.name == spec.process)
                .map(|p| p.pid)
                .min()
                .map(|pid| (spec.name.clone(), pid))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{shared_processes, ProcessProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProcesses {
        table: Vec<ProcessStat>,
        scans: Arc<AtomicUsize>,
        refreshes: Arc<AtomicUsize>,
        tailscale0: NetCounters,
    }

    fn stat(pid: u32, name: &str, cpu: f64) -> ProcessStat {
        ProcessStat {
            pid,
            name: name.to_string(),
            cpu_percent: cpu,
            memory_bytes: 64 * 1024 * 1024,
            memory_percent: 1.5,
        }
    }

    impl ProcessProvider for FakeProcesses {
        fn scan(&mut self) -> Vec<ProcessStat> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.table.clone()
        }

        fn refresh(&mut self, pids: &[u32]) -> Vec<ProcessStat> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.table
                .iter()
                .filter(|p| pids.contains(&p.pid))
                .cloned()
                .collect()
        }

        fn interface_counters(&mut self, interface: &str) -> Option<NetCounters> {
            (interface == "tailscale0").then_some(self.tailscale0)
        }

        fn total_memory(&self) -> u64 {
            4 * 1024 * 1024 * 1024
        }
    }

    fn scanner(table: Vec<ProcessStat>) -> (ServiceScanner, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let scans = Arc::new(AtomicUsize::new(0));
        let refreshes = Arc::new(AtomicUsize::new(0));
        let processes = shared_processes(FakeProcesses {
            table,
            scans: scans.clone(),
            refreshes: refreshes.clone(),
            tailscale0: NetCounters::new(10_000, 5_000),
        });
        let scanner = ServiceScanner::new(
            default_services(),
            processes,
            Arc::new(NetRateCache::new()),
        );
        (scanner, scans, refreshes)
    }

    #[test]
    fn test_pid_cache_reused_between_rescans() {
        let (scanner, scans, refreshes) =
            scanner(vec![stat(10, "sshd", 0.1), stat(812, "tailscaled", 2.0)]);

        let first = scanner.scan();
        let second = scanner.scan();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(scans.load(Ordering::SeqCst), 1);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rescan_after_interval() {
        let (scanner, scans, _) = scanner(vec![stat(812, "tailscaled", 2.0)]);
        let scanner = scanner.with_rescan_interval(Duration::ZERO);

        scanner.scan();
        scanner.scan();

        assert_eq!(scans.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_service_sample_fields() {
        let (scanner, _, _) = scanner(vec![
            stat(812, "tailscaled", 2.0),
            stat(900, "cloudflared", 0.5),
            stat(901, "cloudflared", 0.7),
        ]);

        let samples = scanner.scan();
        assert_eq!(samples.len(), 2);

        let tailscale = samples.iter().find(|s| s.name == "tailscale").unwrap();
        assert_eq!(tailscale.kind, EntityKind::Service);
        assert_eq!(tailscale.id, "812");
        assert_eq!(tailscale.net_rx_cumulative_bytes, 10_000);
        assert_eq!(tailscale.memory_limit_bytes, 4 * 1024 * 1024 * 1024);
        // First observation of the interface has no rate yet
        assert_eq!(tailscale.net_rx_speed_bps, 0.0);

        // Lowest pid wins; no interface configured
        let cloudflared = samples.iter().find(|s| s.name == "cloudflared").unwrap();
        assert_eq!(cloudflared.id, "900");
        assert_eq!(cloudflared.net_tx_cumulative_bytes, 0);
    }

    #[test]
    fn test_missing_service_is_omitted() {
        let (scanner, _, _) = scanner(vec![stat(10, "sshd", 0.1)]);
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn test_service_spec_deserializes_without_interface() {
        let spec: ServiceSpec =
            serde_json::from_str(r#"{"name":"cloudflared","process":"cloudflared"}"#).unwrap();
        assert_eq!(spec.interface, None);
        assert_eq!(spec.rate_key(), "service:cloudflared");
    }
}
