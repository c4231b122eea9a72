//! Persistence for traffic totals and alerts
//!
//! Everything the engine persists goes through a [`StoreTransaction`]: the
//! ledger writes a whole batch of traffic records and commits once, and the
//! alert engine does the same for the alerts of one evaluation. Transactions
//! are serialized by the store, including across processes sharing a file.

mod local;

pub use local::LocalStore;

use crate::models::{AlertLevel, AlertRecord, TrafficRecord};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Errors from the entity store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read store file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write store file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock store file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Transactional store for traffic records and alerts
pub trait EntityStore: Send + Sync {
    /// Start a transaction; blocks while another one is open
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;
}

/// One open transaction
///
/// Changes are only visible to other transactions after [`commit`]. Dropping
/// a transaction without committing discards it.
///
/// [`commit`]: StoreTransaction::commit
pub trait StoreTransaction {
    fn traffic_record(&self, name: &str) -> Result<Option<TrafficRecord>, StoreError>;

    fn put_traffic_record(&mut self, record: TrafficRecord) -> Result<(), StoreError>;

    /// All traffic records, ordered by name
    fn traffic_records(&self) -> Result<Vec<TrafficRecord>, StoreError>;

    /// Append an alert and return it with its assigned id
    fn insert_alert(
        &mut self,
        level: AlertLevel,
        message: &str,
        created_at: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError>;

    /// Most recent alerts first, at most `limit`
    fn alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError>;

    /// Mark every alert read; returns how many changed
    fn mark_alerts_read(&mut self) -> Result<usize, StoreError>;

    /// Delete every alert; returns how many were removed
    fn clear_alerts(&mut self) -> Result<usize, StoreError>;

    /// Delete alerts created before `before`; returns how many were removed
    fn prune_alerts(&mut self, before: DateTime<Utc>) -> Result<usize, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>);
}
