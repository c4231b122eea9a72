//! sysinfo-backed providers

use super::{DiskReading, HostMetricsProvider, HostReadings, ProcessProvider, ProcessStat};
use crate::models::NetCounters;
use sysinfo::{
    Components, Disks, Networks, Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System,
};

/// Host readings from the local machine
pub struct SysinfoHost {
    system: System,
    disks: Disks,
    networks: Networks,
    components: Components,
}

impl SysinfoHost {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is computed between refreshes; take the baseline now
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetricsProvider for SysinfoHost {
    fn read(&mut self) -> HostReadings {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        // Only the count is needed, not per-process details
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        self.disks.refresh(true);
        self.networks.refresh(true);
        self.components.refresh(true);

        let disks = self
            .disks
            .list()
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| DiskReading {
                mount_point: disk.mount_point().to_string_lossy().into_owned(),
                total_bytes: disk.total_space(),
                available_bytes: disk.available_space(),
            })
            .collect();

        let interfaces = self
            .networks
            .list()
            .iter()
            .map(|(name, data)| {
                (
                    name.clone(),
                    NetCounters::new(data.total_received(), data.total_transmitted()),
                )
            })
            .collect();

        let sensors = self
            .components
            .list()
            .iter()
            .filter_map(|component| {
                component
                    .temperature()
                    .map(|celsius| (component.label().to_string(), f64::from(celsius)))
            })
            .collect();

        HostReadings {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            memory_used_bytes: self.system.used_memory(),
            memory_total_bytes: self.system.total_memory(),
            disks,
            interfaces,
            sensors,
            process_count: self.system.processes().len() as u64,
            uptime_seconds: System::uptime(),
        }
    }
}

/// Process table of the local machine
pub struct SysinfoProcesses {
    system: System,
    networks: Networks,
    cpu_count: f64,
}

impl SysinfoProcesses {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;

        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            cpu_count,
        }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing().with_cpu().with_memory()
    }
}

impl Default for SysinfoProcesses {
    fn default() -> Self {
        Self::new()
    }
}

fn to_stat(process: &Process, total_memory: u64, cpu_count: f64) -> ProcessStat {
    let memory_bytes = process.memory();
    ProcessStat {
        pid: process.pid().as_u32(),
        name: process.name().to_string_lossy().into_owned(),
        // sysinfo reports per-core percent (up to 100 × cores)
        cpu_percent: f64::from(process.cpu_usage()) / cpu_count,
        memory_bytes,
        memory_percent: if total_memory == 0 {
            0.0
        } else {
            memory_bytes as f64 / total_memory as f64 * 100.0
        },
    }
}

impl ProcessProvider for SysinfoProcesses {
    fn scan(&mut self) -> Vec<ProcessStat> {
        self.system.refresh_memory();
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());

        let total_memory = self.system.total_memory();
        self.system
            .processes()
            .values()
            .map(|process| to_stat(process, total_memory, self.cpu_count))
            .collect()
    }

    fn refresh(&mut self, pids: &[u32]) -> Vec<ProcessStat> {
        let pids: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            Self::refresh_kind(),
        );

        let total_memory = self.system.total_memory();
        pids.iter()
            .filter_map(|pid| self.system.process(*pid))
            .map(|process| to_stat(process, total_memory, self.cpu_count))
            .collect()
    }

    fn interface_counters(&mut self, interface: &str) -> Option<NetCounters> {
        self.networks.refresh(true);
        self.networks
            .list()
            .get(interface)
            .map(|data| NetCounters::new(data.total_received(), data.total_transmitted()))
    }

    fn total_memory(&self) -> u64 {
        self.system.total_memory()
    }
}
