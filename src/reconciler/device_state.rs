//! Per-device incremental accumulator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

use super::CounterReconciler;
use crate::types::Reading;

/// One reading as seen by the analytics window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPoint {
    pub timestamp: DateTime<Utc>,
    /// Raw counter value as reported
    pub raw_count: u64,
    /// Reconciled production up to and including this reading
    pub reconciled_total: u64,
    /// Reconciled reject count, when the device reports one
    pub error_total: Option<u64>,
}

/// Fixed-capacity FIFO of recent readings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentWindow {
    capacity: usize,
    points: VecDeque<WindowPoint>,
}

impl RecentWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: WindowPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&WindowPoint> {
        self.points.front()
    }

    pub fn last(&self) -> Option<&WindowPoint> {
        self.points.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &WindowPoint> + ExactSizeIterator {
        self.points.iter()
    }

    /// Consecutive point pairs, oldest first.
    pub fn pairs(&self) -> impl Iterator<Item = (&WindowPoint, &WindowPoint)> {
        self.points.iter().zip(self.points.iter().skip(1))
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// What happened to a reading handed to [`DeviceState::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// First reading: baseline only, no delta
    Baseline,
    Delta { delta: u64, reset: bool },
    /// Older than the last applied reading; ignored
    OutOfOrder,
}

/// Mutable accumulator for one device.
///
/// Fed one reading at a time in timestamp order. Batch recompute builds a
/// fresh state from a sorted day; live mode keeps extending the same state.
/// Both go through [`CounterReconciler::step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub last_seen_cumulative: Option<u64>,
    pub last_seen_timestamp: Option<DateTime<Utc>>,
    pub reconciled_total: u64,
    pub reset_count: u32,
    last_error_cumulative: Option<u64>,
    pub error_total: u64,
    /// Readings dropped because they arrived behind `last_seen_timestamp`
    pub skipped_out_of_order: u64,
    pub recent_window: RecentWindow,
}

impl DeviceState {
    pub fn new(device_id: impl Into<String>, window_size: usize) -> Self {
        Self {
            device_id: device_id.into(),
            last_seen_cumulative: None,
            last_seen_timestamp: None,
            reconciled_total: 0,
            reset_count: 0,
            last_error_cumulative: None,
            error_total: 0,
            skipped_out_of_order: 0,
            recent_window: RecentWindow::new(window_size),
        }
    }

    /// Fold one reading into the state.
    pub fn apply(&mut self, reading: &Reading, reconciler: &CounterReconciler) -> Applied {
        if self.last_seen_timestamp.is_some_and(|last| reading.timestamp < last) {
            self.skipped_out_of_order += 1;
            debug!(
                device = %self.device_id,
                at = %reading.timestamp,
                "Out-of-order reading skipped"
            );
            return Applied::OutOfOrder;
        }

        let applied = match self.last_seen_cumulative {
            None => Applied::Baseline,
            Some(previous) => {
                let step = reconciler.step(previous, reading.cumulative_count);
                self.reconciled_total = self.reconciled_total.saturating_add(step.delta);
                if step.reset {
                    self.reset_count += 1;
                    info!(
                        device = %self.device_id,
                        previous,
                        current = reading.cumulative_count,
                        at = %reading.timestamp,
                        "Counter reset absorbed"
                    );
                }
                Applied::Delta {
                    delta: step.delta,
                    reset: step.reset,
                }
            }
        };

        let error_total = reading.error_count.map(|current| {
            if let Some(previous) = self.last_error_cumulative {
                self.error_total = self
                    .error_total
                    .saturating_add(reconciler.step(previous, current).delta);
            }
            self.last_error_cumulative = Some(current);
            self.error_total
        });

        self.last_seen_cumulative = Some(reading.cumulative_count);
        self.last_seen_timestamp = Some(reading.timestamp);
        self.recent_window.push(WindowPoint {
            timestamp: reading.timestamp,
            raw_count: reading.cumulative_count,
            reconciled_total: self.reconciled_total,
            error_total,
        });
        applied
    }

    /// Apply a batch of readings; returns how many were applied.
    pub fn apply_all<'a, I>(&mut self, readings: I, reconciler: &CounterReconciler) -> usize
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        readings
            .into_iter()
            .filter(|r| self.apply(r, reconciler) != Applied::OutOfOrder)
            .count()
    }

    /// True once a device reports reject counts.
    pub fn reports_errors(&self) -> bool {
        self.last_error_cumulative.is_some()
    }
}
