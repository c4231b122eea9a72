//! Container runtime interface
//!
//! The aggregator only needs two calls from the runtime: the list of running
//! containers and one stats snapshot per container. Keeping them behind a
//! trait lets tests drive the aggregator with scripted runtimes.

use crate::models::NetCounters;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A running container as listed by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    /// Full runtime id
    pub id: String,
    pub name: String,
    pub state: String,
}

impl ContainerRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: state.into(),
        }
    }

    /// First 12 characters of the id, as shown by `docker ps`
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(12) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

/// One stats snapshot, including the runtime's previous CPU counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub cpu_usage: u64,
    pub precpu_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    /// Cumulative counters per container interface
    pub networks: HashMap<String, NetCounters>,
}

impl StatsSnapshot {
    /// CPU share of total host capacity, 0–100
    ///
    /// Both deltas come from the same snapshot; no core-count multiplication.
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self.cpu_usage.saturating_sub(self.precpu_usage);
        let system_delta = self.system_cpu_usage.saturating_sub(self.presystem_cpu_usage);

        if cpu_delta == 0 || system_delta == 0 {
            return 0.0;
        }
        cpu_delta as f64 / system_delta as f64 * 100.0
    }

    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit == 0 {
            return 0.0;
        }
        self.memory_usage as f64 / self.memory_limit as f64 * 100.0
    }

    /// Sum of rx/tx over every interface of the container
    pub fn network_totals(&self) -> NetCounters {
        self.networks
            .values()
            .fold(NetCounters::default(), |acc, counters| {
                acc.saturating_add(*counters)
            })
    }
}

/// Errors from the container runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    #[error("stats request for {container} timed out after {timeout:?}")]
    Timeout { container: String, timeout: Duration },

    #[error("runtime returned no stats for {0}")]
    NoStats(String),

    #[error("runtime API error: {0}")]
    Api(String),
}

/// Container runtime used by the aggregator
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List currently running containers
    async fn list_active_containers(&self) -> Result<Vec<ContainerRef>, RuntimeError>;

    /// Fetch a single stats snapshot (not a stream) for one container
    async fn stats_snapshot(&self, container: &ContainerRef) -> Result<StatsSnapshot, RuntimeError>;
}
