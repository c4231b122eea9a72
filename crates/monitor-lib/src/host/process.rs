//! Host process table access

use crate::models::NetCounters;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// One row of the host process table
///
/// `cpu_percent` is a share of total host capacity (all cores), so it is
/// directly comparable to the host CPU percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStat {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
}

/// Source of per-process stats and per-interface counters
pub trait ProcessProvider: Send {
    /// Full process-table scan
    fn scan(&mut self) -> Vec<ProcessStat>;

    /// Refresh only the given pids; exited processes are left out
    fn refresh(&mut self, pids: &[u32]) -> Vec<ProcessStat>;

    /// Cumulative counters of a single named interface, if it exists
    fn interface_counters(&mut self, interface: &str) -> Option<NetCounters>;

    /// Total host memory in bytes
    fn total_memory(&self) -> u64;
}

/// Process provider shared by the service scanner and alert attribution
pub type SharedProcessProvider = Arc<Mutex<Box<dyn ProcessProvider>>>;

pub fn shared_processes(provider: impl ProcessProvider + 'static) -> SharedProcessProvider {
    Arc::new(Mutex::new(Box::new(provider)))
}
