//! Host-wide sampling
//!
//! The sampler reads CPU, memory, disk, temperature, network counters, process
//! count and uptime from a [`HostMetricsProvider`] and turns the network
//! counters into rates. Results are cached for a short interval so that
//! independent callers (the periodic loop and on-demand reads) cannot shrink
//! each other's rate window.

mod process;
mod system;

pub use process::{shared_processes, ProcessProvider, ProcessStat, SharedProcessProvider};
pub use system::{SysinfoHost, SysinfoProcesses};

use crate::models::{HostSample, NetCounters};
use crate::rate::RateWindow;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default minimum interval between real samples
pub const DEFAULT_MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Sensors checked first for the CPU temperature, in order
const PREFERRED_SENSORS: &[&str] = &[
    "cpu_thermal",
    "bcm2835_thermal",
    "coretemp",
    "k10temp",
    "soc_thermal",
];

/// Interface name prefixes that never count toward host traffic
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "dummy", "cni", "flannel", "cali", "vxlan", "tun",
    "tap", "wg", "tailscale", "zt",
];

/// Disk usage for one mounted filesystem
#[derive(Debug, Clone, PartialEq)]
pub struct DiskReading {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Raw readings from the host provider for one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostReadings {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disks: Vec<DiskReading>,
    /// Cumulative counters per interface name
    pub interfaces: Vec<(String, NetCounters)>,
    /// Temperature sensors as (label, celsius)
    pub sensors: Vec<(String, f64)>,
    pub process_count: u64,
    pub uptime_seconds: u64,
}

/// Source of host-wide readings
pub trait HostMetricsProvider: Send {
    /// Refresh and return the current readings
    fn read(&mut self) -> HostReadings;
}

struct SamplerState {
    provider: Box<dyn HostMetricsProvider>,
    net_window: RateWindow,
    last: Option<(Instant, HostSample)>,
}

/// Cached host sampler
pub struct HostSampler {
    state: Mutex<SamplerState>,
    min_interval: Duration,
}

impl HostSampler {
    /// Create a sampler with the default 2 second cache
    pub fn new(provider: Box<dyn HostMetricsProvider>) -> Self {
        Self {
            state: Mutex::new(SamplerState {
                provider,
                net_window: RateWindow::new(),
                last: None,
            }),
            min_interval: DEFAULT_MIN_SAMPLE_INTERVAL,
        }
    }

    /// Set a custom cache interval
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Return a host sample, reusing the previous one if it is still fresh
    pub fn sample(&self) -> HostSample {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        if let Some((taken_at, cached)) = &state.last {
            if now.saturating_duration_since(*taken_at) < self.min_interval {
                return cached.clone();
            }
        }

        let readings = state.provider.read();
        let counters = physical_counters(&readings.interfaces);
        let rates = state.net_window.advance(counters, now);
        let (disk_total, disk_free) = select_disk(&readings.disks)
            .map(|d| (d.total_bytes, d.available_bytes.min(d.total_bytes)))
            .unwrap_or((0, 0));
        let disk_used = disk_total - disk_free;

        let sample = HostSample {
            cpu_percent: readings.cpu_percent,
            ram_percent: percent(readings.memory_used_bytes, readings.memory_total_bytes),
            disk_percent: percent(disk_used, disk_total),
            disk_total_bytes: disk_total,
            disk_used_bytes: disk_used,
            disk_free_bytes: disk_free,
            cpu_temp_celsius: pick_temperature(&readings.sensors),
            net_sent_kbps: rates.tx_bps / 1024.0,
            net_recv_kbps: rates.rx_bps / 1024.0,
            process_count: readings.process_count,
            uptime_seconds: readings.uptime_seconds,
            sampled_at: chrono::Utc::now(),
        };

        debug!(
            cpu = sample.cpu_percent,
            ram = sample.ram_percent,
            sent_kbps = sample.net_sent_kbps,
            recv_kbps = sample.net_recv_kbps,
            "Host sampled"
        );

        state.last = Some((now, sample.clone()));
        sample
    }
}

/// True for loopback, bridge, veth and tunnel interfaces
pub fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Sum of counters over physical-looking interfaces only
pub fn physical_counters(interfaces: &[(String, NetCounters)]) -> NetCounters {
    interfaces
        .iter()
        .filter(|(name, _)| !is_virtual_interface(name))
        .fold(NetCounters::default(), |acc, (_, counters)| {
            acc.saturating_add(*counters)
        })
}

/// First reading from a preferred sensor, else any reading, else none
pub fn pick_temperature(sensors: &[(String, f64)]) -> Option<f64> {
    let readable = || sensors.iter().filter(|(_, celsius)| celsius.is_finite());

    for preferred in PREFERRED_SENSORS {
        if let Some((_, celsius)) =
            readable().find(|(label, _)| label.to_lowercase().contains(preferred))
        {
            return Some(*celsius);
        }
    }

    readable().next().map(|(_, celsius)| *celsius)
}

/// Root filesystem if mounted, otherwise the largest disk
fn select_disk(disks: &[DiskReading]) -> Option<&DiskReading> {
    disks
        .iter()
        .find(|d| d.mount_point == "/")
        .or_else(|| disks.iter().max_by_key(|d| d.total_bytes))
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread::sleep;

    /// Provider whose counters grow by a fixed step on every read
    struct StepProvider {
        reads: Arc<AtomicUsize>,
        step: u64,
    }

    impl HostMetricsProvider for StepProvider {
        fn read(&mut self) -> HostReadings {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            HostReadings {
                cpu_percent: 10.0 * n as f64,
                memory_used_bytes: 512,
                memory_total_bytes: 1024,
                disks: vec![DiskReading {
                    mount_point: "/".to_string(),
                    total_bytes: 1000,
                    available_bytes: 250,
                }],
                interfaces: vec![
                    ("eth0".to_string(), NetCounters::new(n * self.step, n * self.step)),
                    ("docker0".to_string(), NetCounters::new(u64::MAX / 2, 0)),
                ],
                sensors: vec![("acpitz temp1".to_string(), 40.0)],
                process_count: 100,
                uptime_seconds: 3600,
            }
        }
    }

    fn sampler(reads: Arc<AtomicUsize>, min_interval: Duration) -> HostSampler {
        HostSampler::new(Box::new(StepProvider { reads, step: 1024 * 1024 }))
            .with_min_interval(min_interval)
    }

    #[test]
    fn test_cached_within_interval() {
        let reads = Arc::new(AtomicUsize::new(0));
        let sampler = sampler(reads.clone(), Duration::from_secs(60));

        let first = sampler.sample();
        let second = sampler.sample();

        assert_eq!(first, second);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fresh_after_interval() {
        let reads = Arc::new(AtomicUsize::new(0));
        let sampler = sampler(reads.clone(), Duration::from_millis(150));

        let first = sampler.sample();
        sleep(Duration::from_millis(200));
        let second = sampler.sample();

        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_ne!(first.cpu_percent, second.cpu_percent);
        // 1 MiB moved on eth0 over ~200ms; docker0 is ignored
        assert!(second.net_sent_kbps > 0.0);
        assert!(second.net_sent_kbps < 1024.0 * 1024.0);
    }

    #[test]
    fn test_derived_percentages() {
        let reads = Arc::new(AtomicUsize::new(0));
        let sample = sampler(reads, Duration::from_secs(1)).sample();

        assert_eq!(sample.ram_percent, 50.0);
        assert_eq!(sample.disk_percent, 75.0);
        assert_eq!(sample.disk_used_bytes, 750);
        assert_eq!(sample.disk_free_bytes, 250);
        assert_eq!(sample.cpu_temp_celsius, Some(40.0));
        // First sample has no previous window
        assert_eq!(sample.net_sent_kbps, 0.0);
    }

    #[test]
    fn test_virtual_interfaces_excluded() {
        for name in ["lo", "docker0", "veth12ab", "br-3f2a", "tailscale0", "wg0", "tun0"] {
            assert!(is_virtual_interface(name), "{name} should be virtual");
        }
        for name in ["eth0", "enp3s0", "wlan0", "wlp2s0"] {
            assert!(!is_virtual_interface(name), "{name} should be physical");
        }

        let counters = physical_counters(&[
            ("eth0".to_string(), NetCounters::new(100, 10)),
            ("wlan0".to_string(), NetCounters::new(50, 5)),
            ("veth1".to_string(), NetCounters::new(1_000, 1_000)),
        ]);
        assert_eq!(counters, NetCounters::new(150, 15));
    }

    #[test]
    fn test_temperature_prefers_known_sensors() {
        let sensors = vec![
            ("acpitz temp1".to_string(), 30.0),
            ("nvme Composite".to_string(), 45.0),
            ("coretemp Package id 0".to_string(), 55.0),
        ];
        assert_eq!(pick_temperature(&sensors), Some(55.0));

        let fallback = vec![("nvme Composite".to_string(), 45.0)];
        assert_eq!(pick_temperature(&fallback), Some(45.0));

        assert_eq!(pick_temperature(&[]), None);
    }

    #[test]
    fn test_disk_falls_back_to_largest() {
        let disks = vec![
            DiskReading {
                mount_point: "/boot".to_string(),
                total_bytes: 100,
                available_bytes: 50,
            },
            DiskReading {
                mount_point: "/data".to_string(),
                total_bytes: 5_000,
                available_bytes: 1_000,
            },
        ];
        assert_eq!(select_disk(&disks).unwrap().mount_point, "/data");
    }
}
