//! Monitoring engine for a single host
//!
//! This crate provides the core functionality for:
//! - Host sampling (CPU, RAM, disk, temperature, network rates)
//! - Container stats aggregation from the container runtime
//! - Scanning a fixed set of host services
//! - A traffic ledger that survives counter resets
//! - Threshold alerting with cooldowns
//! - Health checks and observability

pub mod alerts;
pub mod collector;
pub mod health;
pub mod host;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod rate;
pub mod store;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use monitor::{BuildError, CycleReport, Monitor, MonitorBuilder};
pub use observability::{MonitorMetrics, StructuredLogger};
pub use store::{EntityStore, LocalStore, StoreError, StoreTransaction};
