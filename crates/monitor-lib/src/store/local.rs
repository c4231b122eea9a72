//! In-process store with optional JSON file durability

use super::{EntityStore, StoreError, StoreTransaction};
use crate::models::{AlertLevel, AlertRecord, TrafficRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    /// Bumped on every commit; tells a process its copy is stale
    #[serde(default)]
    generation: u64,
    #[serde(default)]
    traffic: BTreeMap<String, TrafficRecord>,
    /// Ascending by id
    #[serde(default)]
    alerts: Vec<AlertRecord>,
    #[serde(default)]
    last_alert_id: u64,
}

/// Store kept in memory and, when opened from a path, mirrored to a JSON file
///
/// The file is rewritten atomically on every commit (temp file, fsync,
/// rename). A failed write leaves both memory and disk at the previous
/// committed state.
///
/// Several processes may share one file (the agent and `lmon`). A
/// transaction holds an exclusive lock on a `.lock` file next to the data
/// file from `begin` until it ends, and reloads the data file first when
/// another process committed since this one last saw it.
pub struct LocalStore {
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Store without a backing file
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            path: None,
        }
    }

    /// Open a file-backed store, loading existing data if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let state = match read_state(&path)? {
            Some(state) => {
                info!(
                    path = %path.display(),
                    traffic_records = state.traffic.len(),
                    alerts = state.alerts.len(),
                    "Loaded store"
                );
                state
            }
            None => {
                debug!(path = %path.display(), "Store file not found, starting empty");
                StoreState::default()
            }
        };

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl EntityStore for LocalStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let lock = match self.path.as_deref() {
            Some(path) => {
                let lock = lock_file(path)?;
                if let Some(on_disk) = read_state(path)? {
                    if on_disk.generation != guard.generation {
                        debug!(
                            path = %path.display(),
                            from = guard.generation,
                            to = on_disk.generation,
                            "Store file changed on disk, reloading"
                        );
                        *guard = on_disk;
                    }
                }
                Some(lock)
            }
            None => None,
        };

        let staged = guard.clone();
        Ok(Box::new(LocalTransaction {
            guard,
            staged,
            path: self.path.as_deref(),
            _lock: lock,
        }))
    }
}

/// Take the exclusive lock guarding read-modify-write of `path`
///
/// Released when the returned file is dropped.
fn lock_file(path: &Path) -> Result<File, StoreError> {
    let lock_path = path.with_extension("lock");
    let lock_err = |source| StoreError::Lock {
        path: lock_path.clone(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(lock_err)?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(lock_err)?;
    file.lock().map_err(lock_err)?;
    Ok(file)
}

fn read_state(path: &Path) -> Result<Option<StoreState>, StoreError> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

struct LocalTransaction<'a> {
    guard: MutexGuard<'a, StoreState>,
    staged: StoreState,
    path: Option<&'a Path>,
    _lock: Option<File>,
}

impl StoreTransaction for LocalTransaction<'_> {
    fn traffic_record(&self, name: &str) -> Result<Option<TrafficRecord>, StoreError> {
        Ok(self.staged.traffic.get(name).cloned())
    }

    fn put_traffic_record(&mut self, record: TrafficRecord) -> Result<(), StoreError> {
        self.staged.traffic.insert(record.name.clone(), record);
        Ok(())
    }

    fn traffic_records(&self) -> Result<Vec<TrafficRecord>, StoreError> {
        Ok(self.staged.traffic.values().cloned().collect())
    }

    fn insert_alert(
        &mut self,
        level: AlertLevel,
        message: &str,
        created_at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        self.staged.last_alert_id += 1;
        let record = AlertRecord {
            id: self.staged.last_alert_id,
            level,
            message: message.to_string(),
            created_at,
            is_read: false,
        };
        self.staged.alerts.push(record.clone());
        Ok(record)
    }

    fn alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self.staged.alerts.iter().rev().take(limit).cloned().collect())
    }

    fn mark_alerts_read(&mut self) -> Result<usize, StoreError> {
        let mut changed = 0;
        for alert in self.staged.alerts.iter_mut().filter(|a| !a.is_read) {
            alert.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    fn clear_alerts(&mut self) -> Result<usize, StoreError> {
        let removed = self.staged.alerts.len();
        self.staged.alerts.clear();
        Ok(removed)
    }

    fn prune_alerts(&mut self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let len = self.staged.alerts.len();
        self.staged.alerts.retain(|a| a.created_at >= before);
        Ok(len - self.staged.alerts.len())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let LocalTransaction {
            mut guard,
            mut staged,
            path,
            _lock,
        } = *self;

        if let Some(path) = path {
            staged.generation += 1;
            write_atomically(path, &staged)?;
        }

        *guard = staged;
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        debug!("Store transaction rolled back");
    }
}

fn write_atomically(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let json = serde_json::to_vec_pretty(state)?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(write_err)?;

    file.write_all(&json).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;

    std::fs::rename(&temp_path, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(name: &str, total_rx: u64) -> TrafficRecord {
        TrafficRecord {
            name: name.to_string(),
            total_rx_bytes: total_rx,
            total_tx_bytes: 0,
            last_seen_runtime_rx: total_rx,
            last_seen_runtime_tx: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_persists_and_reloads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("monitor.json");

        {
            let store = LocalStore::open(&path).unwrap();
            let mut tx = store.begin().unwrap();
            tx.put_traffic_record(record("web", 1000)).unwrap();
            tx.insert_alert(AlertLevel::Warning, "High CPU usage: 85.0%", Utc::now())
                .unwrap();
            tx.commit().unwrap();
        }

        let reopened = LocalStore::open(&path).unwrap();
        let tx = reopened.begin().unwrap();
        assert_eq!(tx.traffic_record("web").unwrap().unwrap().total_rx_bytes, 1000);
        assert_eq!(tx.alerts(10).unwrap().len(), 1);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_rollback_discards_changes() {
        let store = LocalStore::in_memory();

        let mut tx = store.begin().unwrap();
        tx.put_traffic_record(record("web", 1000)).unwrap();
        tx.rollback();

        let tx = store.begin().unwrap();
        assert!(tx.traffic_record("web").unwrap().is_none());
    }

    #[test]
    fn test_dropped_transaction_is_discarded() {
        let store = LocalStore::in_memory();
        {
            let mut tx = store.begin().unwrap();
            tx.put_traffic_record(record("web", 1000)).unwrap();
        }

        assert!(store.begin().unwrap().traffic_records().unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_keeps_previous_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("monitor.json");
        // A directory where the temp file goes, so the write must fail
        std::fs::create_dir(path.with_extension("tmp")).unwrap();
        let store = LocalStore::open(&path).unwrap();

        let mut tx = store.begin().unwrap();
        tx.put_traffic_record(record("web", 1000)).unwrap();
        assert!(matches!(tx.commit(), Err(StoreError::Write { .. })));

        assert!(store.begin().unwrap().traffic_records().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_by_another_store_survives_later_commit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("monitor.json");
        let agent = LocalStore::open(&path).unwrap();

        let mut tx = agent.begin().unwrap();
        tx.insert_alert(AlertLevel::Critical, "Disk almost full: 99.0%", Utc::now())
            .unwrap();
        tx.commit().unwrap();

        let cli = LocalStore::open(&path).unwrap();
        let mut tx = cli.begin().unwrap();
        assert_eq!(tx.clear_alerts().unwrap(), 1);
        tx.commit().unwrap();

        // The agent's next cycle commits without touching alerts
        let mut tx = agent.begin().unwrap();
        assert!(tx.alerts(10).unwrap().is_empty());
        tx.put_traffic_record(record("web", 1000)).unwrap();
        tx.commit().unwrap();

        let reopened = LocalStore::open(&path).unwrap();
        let tx = reopened.begin().unwrap();
        assert!(tx.alerts(10).unwrap().is_empty());
        assert_eq!(tx.traffic_record("web").unwrap().unwrap().total_rx_bytes, 1000);
    }

    #[test]
    fn test_reload_keeps_alert_ids_increasing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("monitor.json");
        let first = LocalStore::open(&path).unwrap();
        let second = LocalStore::open(&path).unwrap();

        let mut tx = first.begin().unwrap();
        tx.insert_alert(AlertLevel::Warning, "a", Utc::now()).unwrap();
        tx.commit().unwrap();

        let mut tx = second.begin().unwrap();
        let next = tx.insert_alert(AlertLevel::Warning, "b", Utc::now()).unwrap();
        tx.commit().unwrap();

        assert_eq!(next.id, 2);
        let ids: Vec<u64> = first
            .begin()
            .unwrap()
            .alerts(10)
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_alerts_newest_first_with_limit() {
        let store = LocalStore::in_memory();
        let now = Utc::now();

        let mut tx = store.begin().unwrap();
        for i in 0..5 {
            tx.insert_alert(AlertLevel::Warning, &format!("alert {i}"), now)
                .unwrap();
        }
        tx.commit().unwrap();

        let alerts = store.begin().unwrap().alerts(3).unwrap();
        let ids: Vec<u64> = alerts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[test]
    fn test_mark_read_clear_and_prune() {
        let store = LocalStore::in_memory();
        let now = Utc::now();

        let mut tx = store.begin().unwrap();
        tx.insert_alert(AlertLevel::Warning, "old", now - Duration::days(8))
            .unwrap();
        tx.insert_alert(AlertLevel::Critical, "recent", now).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.mark_alerts_read().unwrap(), 2);
        assert_eq!(tx.mark_alerts_read().unwrap(), 0);
        assert_eq!(tx.prune_alerts(now - Duration::days(7)).unwrap(), 1);
        assert_eq!(tx.alerts(10).unwrap()[0].message, "recent");
        assert_eq!(tx.clear_alerts().unwrap(), 1);
        tx.commit().unwrap();

        assert!(store.begin().unwrap().alerts(10).unwrap().is_empty());
    }

    #[test]
    fn test_ids_keep_increasing_after_clear() {
        let store = LocalStore::in_memory();

        let mut tx = store.begin().unwrap();
        tx.insert_alert(AlertLevel::Warning, "a", Utc::now()).unwrap();
        tx.clear_alerts().unwrap();
        let next = tx.insert_alert(AlertLevel::Warning, "b", Utc::now()).unwrap();
        tx.commit().unwrap();

        assert_eq!(next.id, 2);
    }
}
