//! Docker runtime via the Engine API

use super::runtime::{ContainerRef, ContainerRuntime, RuntimeError, StatsSnapshot};
use crate::models::NetCounters;
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, Stats, StatsOptions};
use bollard::models::ContainerSummary;
use bollard::Docker;
use futures::StreamExt;
use std::time::Duration;
use tracing::debug;

/// Upper bound for a single stats request
pub const DEFAULT_STATS_TIMEOUT: Duration = Duration::from_secs(10);

/// Docker Engine client
pub struct DockerRuntime {
    docker: Docker,
    stats_timeout: Duration,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket)
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))?;

        Ok(Self {
            docker,
            stats_timeout: DEFAULT_STATS_TIMEOUT,
        })
    }

    pub fn with_stats_timeout(mut self, timeout: Duration) -> Self {
        self.stats_timeout = timeout;
        self
    }
}

fn summary_to_ref(summary: ContainerSummary) -> Option<ContainerRef> {
    let id = summary.id?;
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.clone());
    let state = summary.state.unwrap_or_else(|| "unknown".to_string());

    Some(ContainerRef { id, name, state })
}

fn snapshot_from_stats(stats: Stats) -> StatsSnapshot {
    let networks = stats
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(iface, net)| (iface, NetCounters::new(net.rx_bytes, net.tx_bytes)))
        .collect();

    StatsSnapshot {
        cpu_usage: stats.cpu_stats.cpu_usage.total_usage,
        precpu_usage: stats.precpu_stats.cpu_usage.total_usage,
        system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
        presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
        memory_usage: stats.memory_stats.usage.unwrap_or(0),
        memory_limit: stats.memory_stats.limit.unwrap_or(0),
        networks,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_active_containers(&self) -> Result<Vec<ContainerRef>, RuntimeError> {
        let options = Some(ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        });

        let containers = self
            .docker
            .list_containers(options)
            .await
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))?;

        debug!(count = containers.len(), "Listed running containers");
        Ok(containers.into_iter().filter_map(summary_to_ref).collect())
    }

    async fn stats_snapshot(&self, container: &ContainerRef) -> Result<StatsSnapshot, RuntimeError> {
        // one_shot stays off: the daemon then fills precpu_stats, which the
        // CPU delta needs
        let mut stream = std::pin::pin!(self.docker.stats(
            &container.id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        ));

        let next = tokio::time::timeout(self.stats_timeout, stream.next())
            .await
            .map_err(|_| RuntimeError::Timeout {
                container: container.name.clone(),
                timeout: self.stats_timeout,
            })?;

        match next {
            Some(Ok(stats)) => Ok(snapshot_from_stats(stats)),
            Some(Err(e)) => Err(RuntimeError::Api(e.to_string())),
            None => Err(RuntimeError::NoStats(container.name.clone())),
        }
    }
}
