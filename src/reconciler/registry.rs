//! Device registry - single owner of live per-device state
//!
//! The scheduler and the change notifier may both push readings for the same
//! device. Each device sits behind its own mutex, so at most one
//! reconciliation per device runs at a time while different devices proceed
//! independently.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Applied, CounterReconciler, DeviceState};
use crate::types::{Reading, SourceKey};

type SharedState = Arc<Mutex<DeviceState>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts from one `apply` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub resets: u32,
    pub out_of_order: usize,
}

impl ApplySummary {
    fn absorb(&mut self, other: Self) {
        self.applied += other.applied;
        self.resets += other.resets;
        self.out_of_order += other.out_of_order;
    }
}

pub struct DeviceRegistry {
    reconciler: CounterReconciler,
    window_size: usize,
    devices: Mutex<BTreeMap<SourceKey, SharedState>>,
}

impl DeviceRegistry {
    pub fn new(reconciler: CounterReconciler, window_size: usize) -> Self {
        Self {
            reconciler,
            window_size,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn reconciler(&self) -> &CounterReconciler {
        &self.reconciler
    }

    fn state_for(&self, key: &SourceKey) -> SharedState {
        let mut devices = lock(&self.devices);
        Arc::clone(
            devices
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(DeviceState::new(&key.device_id, self.window_size)))),
        )
    }

    /// Track a source even before it has produced readings.
    pub fn ensure(&self, key: &SourceKey) {
        let _ = self.state_for(key);
    }

    /// Extend one device's state with new readings, in timestamp order.
    pub fn apply(&self, key: &SourceKey, readings: &[Reading]) -> ApplySummary {
        let shared = self.state_for(key);
        let mut state = lock(&shared);
        let mut summary = ApplySummary::default();
        for reading in readings {
            match state.apply(reading, &self.reconciler) {
                Applied::OutOfOrder => summary.out_of_order += 1,
                Applied::Delta { reset: true, .. } => {
                    summary.applied += 1;
                    summary.resets += 1;
                }
                Applied::Baseline | Applied::Delta { .. } => summary.applied += 1,
            }
        }
        summary
    }

    /// Extend many devices at once.
    pub fn apply_all(&self, readings: &BTreeMap<SourceKey, Vec<Reading>>) -> ApplySummary {
        let mut total = ApplySummary::default();
        for (key, series) in readings {
            total.absorb(self.apply(key, series));
        }
        total
    }

    /// Replace all state with a from-scratch reconciliation of `readings`.
    pub fn rebuild(&self, readings: &BTreeMap<SourceKey, Vec<Reading>>) -> ApplySummary {
        let mut fresh = BTreeMap::new();
        let mut total = ApplySummary::default();
        for (key, series) in readings {
            let mut ordered: Vec<&Reading> = series.iter().collect();
            ordered.sort_by_key(|r| r.timestamp);
            let mut state = DeviceState::new(&key.device_id, self.window_size);
            total.applied += state.apply_all(ordered, &self.reconciler);
            total.resets += state.reset_count;
            fresh.insert(key.clone(), Arc::new(Mutex::new(state)));
        }
        *lock(&self.devices) = fresh;
        total
    }

    /// Point-in-time copy of every device, in key order.
    pub fn snapshot(&self) -> Vec<(SourceKey, DeviceState)> {
        let handles: Vec<(SourceKey, SharedState)> = lock(&self.devices)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        handles
            .into_iter()
            .map(|(key, shared)| {
                let state = lock(&shared).clone();
                (key, state)
            })
            .collect()
    }

    pub fn get(&self, key: &SourceKey) -> Option<DeviceState> {
        let shared = lock(&self.devices).get(key).cloned()?;
        let state = lock(&shared).clone();
        Some(state)
    }

    /// Forget every device (production date rollover).
    pub fn clear(&self) {
        lock(&self.devices).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.devices).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn key(device: &str) -> SourceKey {
        SourceKey::new("DC1", "sau-me", None, device)
    }

    fn readings(device: &str, counts: &[u64]) -> Vec<Reading> {
        let t0 = Utc.with_ymd_and_hms(2025, 11, 21, 6, 0, 0).unwrap();
        counts
            .iter()
            .enumerate()
            .map(|(i, c)| Reading::new(device, "sau-me", t0 + Duration::seconds(i as i64 * 10), *c))
            .collect()
    }

    #[test]
    fn test_incremental_apply_equals_rebuild() {
        let all = readings("A", &[100, 180, 260, 20, 90, 150]);

        let live = DeviceRegistry::new(CounterReconciler::default(), 10);
        live.apply(&key("A"), &all[..2]);
        live.apply(&key("A"), &all[2..5]);
        live.apply(&key("A"), &all[5..]);

        let batch = DeviceRegistry::new(CounterReconciler::default(), 10);
        let mut map = BTreeMap::new();
        map.insert(key("A"), all);
        let summary = batch.rebuild(&map);

        let l = live.get(&key("A")).unwrap();
        let b = batch.get(&key("A")).unwrap();
        assert_eq!(l.reconciled_total, b.reconciled_total);
        assert_eq!(l.reset_count, b.reset_count);
        assert_eq!(b.reconciled_total, 160 + 20 + 130);
        assert_eq!(summary.resets, 1);
    }

    #[test]
    fn test_rebuild_replaces_previous_devices() {
        let reg = DeviceRegistry::new(CounterReconciler::default(), 5);
        reg.apply(&key("OLD"), &readings("OLD", &[1, 2]));
        let mut map = BTreeMap::new();
        map.insert(key("NEW"), readings("NEW", &[10, 20]));
        reg.rebuild(&map);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&key("OLD")).is_none());
    }

    #[test]
    fn test_ensure_tracks_idle_device() {
        let reg = DeviceRegistry::new(CounterReconciler::default(), 5);
        reg.ensure(&key("IDLE"));
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].1.reconciled_total, 0);
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_concurrent_appends_to_one_device() {
        let reg = Arc::new(DeviceRegistry::new(CounterReconciler::default(), 10));
        let t0 = Utc.with_ymd_and_hms(2025, 11, 21, 6, 0, 0).unwrap();
        reg.apply(&key("A"), &[Reading::new("A", "sau-me", t0, 0)]);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let state = reg.get(&key("A")).unwrap();
                        let next = state.last_seen_cumulative.unwrap_or(0) + 1;
                        let ts = state.last_seen_timestamp.unwrap_or(t0) + Duration::seconds(1);
                        reg.apply(&key("A"), &[Reading::new("A", "sau-me", ts, next)]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let state = reg.get(&key("A")).unwrap();
        // Racing appends may be rejected as out-of-order or repeat a count,
        // but the total never exceeds the last counter value.
        assert_eq!(state.reset_count, 0);
        assert_eq!(state.reconciled_total, state.last_seen_cumulative.unwrap());
    }
}
