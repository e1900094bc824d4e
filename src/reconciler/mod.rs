//! Counter Reconciler - net production from reset-prone cumulative counters
//!
//! Devices report a cumulative count that normally only grows. A power cycle
//! or firmware rollover drops it back near zero. The reconciler folds an
//! ordered reading sequence into a net delta, treating such drops as resets
//! (the new count is production since the restart) instead of negative
//! production.
//!
//! ## Architecture
//!
//! - [`CounterReconciler::step`]: the single arithmetic rule, shared by batch
//!   and live paths so both produce identical totals
//! - [`CounterReconciler::reconcile`] / [`CounterReconciler::aggregate`]:
//!   whole-sequence folds used by batch recompute
//! - [`DeviceState`]: per-device incremental accumulator with a bounded
//!   recent window
//! - [`DeviceRegistry`]: the one owner of every live `DeviceState`

mod device_state;
mod registry;

pub use device_state::{Applied, DeviceState, RecentWindow, WindowPoint};
pub use registry::{ApplySummary, DeviceRegistry};

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::ReconcilerConfig;
use crate::types::{Reading, StageTotals};

/// Outcome of one previous→current comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Units produced between the two readings
    pub delta: u64,
    /// The current reading was classified as a counter reset
    pub reset: bool,
}

/// Net production of one device over a reading sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub total_delta: u64,
    pub reset_events: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterReconciler {
    reset_ratio: f64,
}

impl Default for CounterReconciler {
    fn default() -> Self {
        Self::from_config(&ReconcilerConfig::default())
    }
}

impl CounterReconciler {
    pub fn new(reset_ratio: f64) -> Self {
        Self { reset_ratio }
    }

    pub fn from_config(config: &ReconcilerConfig) -> Self {
        Self::new(config.reset_ratio)
    }

    pub fn reset_ratio(&self) -> f64 {
        self.reset_ratio
    }

    /// Compare two consecutive cumulative counts.
    ///
    /// A drop below `previous`, or below `previous * reset_ratio`, is a reset:
    /// the current count itself is the delta.
    pub fn step(&self, previous: u64, current: u64) -> Step {
        #[allow(clippy::cast_precision_loss)]
        let below_ratio = (current as f64) < (previous as f64) * self.reset_ratio;
        if current < previous || below_ratio {
            Step {
                delta: current,
                reset: true,
            }
        } else {
            Step {
                delta: current.saturating_sub(previous),
                reset: false,
            }
        }
    }

    /// Fold a reading sequence into `(total_delta, reset_events)`.
    ///
    /// Readings are visited in timestamp order; equal timestamps keep their
    /// input order. The first reading only establishes the baseline.
    pub fn reconcile(&self, device_id: &str, readings: &[Reading]) -> Reconciliation {
        let mut ordered: Vec<&Reading> = readings.iter().collect();
        ordered.sort_by_key(|r| r.timestamp);

        let mut out = Reconciliation::default();
        let mut previous: Option<u64> = None;
        for reading in ordered {
            if let Some(prev) = previous {
                let step = self.step(prev, reading.cumulative_count);
                out.total_delta = out.total_delta.saturating_add(step.delta);
                if step.reset {
                    out.reset_events += 1;
                    info!(
                        device = %device_id,
                        previous = prev,
                        current = reading.cumulative_count,
                        at = %reading.timestamp,
                        "Counter reset absorbed"
                    );
                }
            }
            previous = Some(reading.cumulative_count);
        }
        out
    }

    /// Sum independent device reconciliations into one stage total.
    ///
    /// Devices without readings contribute zero.
    pub fn aggregate(&self, stage: &str, devices: &BTreeMap<String, Vec<Reading>>) -> StageTotals {
        let mut totals = StageTotals::empty(stage);
        for (device_id, readings) in devices {
            let r = self.reconcile(device_id, readings);
            *totals.per_device_totals.entry(device_id.clone()).or_insert(0) += r.total_delta;
            totals.combined_total = totals.combined_total.saturating_add(r.total_delta);
            totals.reset_events += r.reset_events;
        }
        debug!(
            stage = %stage,
            devices = totals.per_device_totals.len(),
            total = totals.combined_total,
            "Stage aggregated"
        );
        totals
    }
}
