//! Top-consumer attribution
//!
//! Best effort: an alert names an entity or process only when it plausibly
//! explains a significant part of the load.

use super::Metric;
use crate::host::ProcessStat;
use crate::models::{EntityKind, EntitySample};

/// Share (percent) an entity needs to be named for CPU/RAM alerts
pub const ENTITY_SHARE_THRESHOLD: f64 = 10.0;

/// Share (percent) a host process needs when no entity qualifies
pub const PROCESS_SHARE_THRESHOLD: f64 = 5.0;

/// Fraction of host upload an entity needs to be named
pub const UPLOAD_SHARE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Culprit {
    Entity(EntityKind),
    Process,
}

/// The consumer named in an alert message
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub culprit: Culprit,
    pub name: String,
    /// Percent for CPU/RAM, KB/s for upload
    pub value: f64,
}

impl Attribution {
    /// Suffix appended to the alert message
    pub fn describe(&self, metric: Metric) -> String {
        let kind = match self.culprit {
            Culprit::Entity(kind) => kind.to_string(),
            Culprit::Process => "process".to_string(),
        };
        match metric {
            Metric::Upload => format!("top consumer: {kind} {} ({:.0} KB/s)", self.name, self.value),
            _ => format!("top consumer: {kind} {} ({:.1}%)", self.name, self.value),
        }
    }
}

fn load_value(metric: Metric, cpu: f64, memory: f64) -> Option<f64> {
    match metric {
        Metric::Cpu => Some(cpu),
        Metric::Ram => Some(memory),
        _ => None,
    }
}

/// Top consumer for a CPU or RAM alert
///
/// The top entity is preferred when above [`ENTITY_SHARE_THRESHOLD`];
/// otherwise the top host process when above [`PROCESS_SHARE_THRESHOLD`].
pub fn attribute_load(
    metric: Metric,
    entities: &[EntitySample],
    processes: &[ProcessStat],
) -> Option<Attribution> {
    let top_entity = entities
        .iter()
        .filter(|e| !e.is_error())
        .filter_map(|e| {
            load_value(metric, e.cpu_percent, e.memory_percent).map(|value| (e, value))
        })
        .filter(|(_, value)| value.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1));

    if let Some((entity, value)) = top_entity {
        if value > ENTITY_SHARE_THRESHOLD {
            return Some(Attribution {
                culprit: Culprit::Entity(entity.kind),
                name: entity.name.clone(),
                value,
            });
        }
    }

    processes
        .iter()
        .filter_map(|p| load_value(metric, p.cpu_percent, p.memory_percent).map(|value| (p, value)))
        .filter(|(_, value)| value.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, value)| *value > PROCESS_SHARE_THRESHOLD)
        .map(|(process, value)| Attribution {
            culprit: Culprit::Process,
            name: process.name.clone(),
            value,
        })
}

/// Top entity for an upload alert, if it carries over half of host upload
pub fn attribute_upload(host_sent_kbps: f64, entities: &[EntitySample]) -> Option<Attribution> {
    if host_sent_kbps <= 0.0 {
        return None;
    }

    entities
        .iter()
        .filter(|e| !e.is_error())
        .map(|e| (e, e.net_tx_speed_bps / 1024.0))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, kbps)| *kbps > host_sent_kbps * UPLOAD_SHARE_THRESHOLD)
        .map(|(entity, kbps)| Attribution {
            culprit: Culprit::Entity(entity.kind),
            name: entity.name.clone(),
            value: kbps,
        })
}
