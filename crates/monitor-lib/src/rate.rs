//! Rate calculation from cumulative counters
//!
//! Converts two snapshots of resettable byte counters into per-second rates.
//! Deltas that are negative (counter reset, interface renumbering) or larger
//! than a physically plausible ceiling are clamped to zero instead of being
//! reported as a spike.

use crate::models::NetCounters;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Below this elapsed time a rate is not computed
pub const MIN_ELAPSED: Duration = Duration::from_millis(100);

/// Ceiling for a believable delta: 2 GiB per elapsed second
pub const MAX_BYTES_PER_SEC: f64 = 2.0 * 1024.0 * 1024.0 * 1024.0;

/// Receive/transmit rates in bytes per second
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    pub rx_bps: f64,
    pub tx_bps: f64,
}

impl Rates {
    pub const ZERO: Rates = Rates {
        rx_bps: 0.0,
        tx_bps: 0.0,
    };
}

/// Compute rates between two counter snapshots taken `elapsed` apart
pub fn compute_rates(current: NetCounters, previous: NetCounters, elapsed: Duration) -> Rates {
    if elapsed <= MIN_ELAPSED {
        return Rates::ZERO;
    }

    let secs = elapsed.as_secs_f64();
    let rx_delta = clamp_delta(current.rx_bytes, previous.rx_bytes, secs);
    let tx_delta = clamp_delta(current.tx_bytes, previous.tx_bytes, secs);

    Rates {
        rx_bps: rx_delta / secs,
        tx_bps: tx_delta / secs,
    }
}

fn clamp_delta(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if current < previous {
        return 0.0;
    }
    let delta = (current - previous) as f64;
    if delta > MAX_BYTES_PER_SEC * elapsed_secs {
        0.0
    } else {
        delta
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterSnapshot {
    counters: NetCounters,
    taken_at: Instant,
}

/// Moving window of exactly one prior sample
#[derive(Debug, Default)]
pub struct RateWindow {
    last: Option<CounterSnapshot>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the rate against the stored snapshot, then replace it.
    ///
    /// The first observation has nothing to compare with and yields zero.
    pub fn advance(&mut self, current: NetCounters, now: Instant) -> Rates {
        let rates = match self.last {
            Some(prev) => compute_rates(
                current,
                prev.counters,
                now.saturating_duration_since(prev.taken_at),
            ),
            None => Rates::ZERO,
        };

        self.last = Some(CounterSnapshot {
            counters: current,
            taken_at: now,
        });

        rates
    }
}

/// Rate windows keyed by entity (container id or `service:<name>`)
///
/// Shared between concurrent stat fetches; every read-modify-write of an entry
/// happens under the single lock.
#[derive(Debug, Default)]
pub struct NetRateCache {
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl NetRateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the window for `key` and return the resulting rates
    pub fn advance(&self, key: &str, current: NetCounters, now: Instant) -> Rates {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows
            .entry(key.to_string())
            .or_default()
            .advance(current, now)
    }

    /// Drop windows for entities that are no longer observed
    pub fn retain_keys(&self, keep: &HashSet<String>) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|key, _| keep.contains(key));
        before - windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
