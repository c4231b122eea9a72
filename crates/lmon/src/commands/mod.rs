//! CLI command implementations

pub mod alerts;
pub mod entities;
pub mod host;
pub mod traffic;

use anyhow::{Context, Result};
use monitor_lib::collector::{default_services, ContainerRuntime, DockerRuntime};
use monitor_lib::host::{shared_processes, SysinfoHost, SysinfoProcesses};
use monitor_lib::{LocalStore, Monitor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Shortest baseline window that still yields a CPU reading
const MIN_WINDOW: Duration = Duration::from_millis(250);

/// Open the data file shared with the agent
pub fn open_store(data_file: &Path) -> Result<LocalStore> {
    LocalStore::open(data_file)
        .with_context(|| format!("Failed to open data file {}", data_file.display()))
}

/// Build a monitor over the local host for one-shot commands
///
/// The host cache is disabled so a baseline and a reported sample can be
/// taken back to back.
pub fn local_monitor(data_file: &Path, docker: bool) -> Result<Monitor> {
    let store = Arc::new(open_store(data_file)?);

    let mut builder = Monitor::builder()
        .host_provider(SysinfoHost::new())
        .processes(shared_processes(SysinfoProcesses::new()))
        .store(store)
        .services(default_services())
        .host_cache(Duration::ZERO);

    if docker {
        match DockerRuntime::connect() {
            Ok(runtime) => {
                let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);
                builder = builder.runtime(runtime);
            }
            Err(e) => crate::output::print_warning(&format!("Docker unavailable: {e}")),
        }
    }

    Ok(builder.build()?)
}

/// Baseline window in seconds, raised to the shortest usable window
pub fn window(seconds: u64) -> Duration {
    Duration::from_secs(seconds).max(MIN_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_has_floor() {
        assert_eq!(window(0), MIN_WINDOW);
        assert_eq!(window(2), Duration::from_secs(2));
    }

    #[test]
    fn test_open_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("monitor.json")).unwrap();
        assert!(store.path().is_some());
    }
}
