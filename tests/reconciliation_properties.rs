//! Reconciliation Property Tests
//!
//! Reset absorption, determinism and window bounds of the counter
//! reconciler, checked over seeded random reading sequences as well as the
//! documented worked example.

use brickline::reconciler::{Applied, CounterReconciler, DeviceRegistry, DeviceState};
use brickline::types::{Reading, SourceKey};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::prelude::*;
use std::collections::BTreeMap;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 21, 6, 0, 0).unwrap()
}

fn series(counts: &[u64]) -> Vec<Reading> {
    counts
        .iter()
        .enumerate()
        .map(|(i, c)| Reading::new("SAU-ME-01", "sau-me", t0() + Duration::seconds(i as i64 * 10), *c))
        .collect()
}

/// Monotonic run with exactly one drop below half the previous count.
///
/// Returns the counts and the expected net delta:
/// `(pre-reset total) + (post-reset final count)`.
fn sequence_with_one_reset(rng: &mut StdRng) -> (Vec<u64>, u64) {
    let before = rng.gen_range(2..30);
    let after = rng.gen_range(1..30);

    let mut counts = Vec::with_capacity(before + after);
    let mut count = rng.gen_range(100..10_000u64);
    for _ in 0..before {
        counts.push(count);
        count += rng.gen_range(0..50);
    }
    let last_before = *counts.last().unwrap();

    let mut count = rng.gen_range(0..last_before / 2);
    for _ in 0..after {
        counts.push(count);
        count += rng.gen_range(0..50);
    }
    let expected = (last_before - counts[0]) + *counts.last().unwrap();
    (counts, expected)
}

// ============================================================================
// Worked example
// ============================================================================

#[test]
fn single_reset_example_yields_ninety() {
    let r = CounterReconciler::new(0.5).reconcile("SAU-ME-01", &series(&[1000, 1050, 40]));
    assert_eq!(r.total_delta, 90);
    assert_eq!(r.reset_events, 1);

    let mut state = DeviceState::new("SAU-ME-01", 10);
    let applied: Vec<Applied> = series(&[1000, 1050, 40])
        .iter()
        .map(|r| state.apply(r, &CounterReconciler::new(0.5)))
        .collect();
    assert_eq!(
        applied,
        vec![
            Applied::Baseline,
            Applied::Delta { delta: 50, reset: false },
            Applied::Delta { delta: 40, reset: true },
        ]
    );
    assert_eq!(state.reconciled_total, 90);
    assert_eq!(state.reset_count, 1);
}

#[test]
fn single_reading_and_flat_series_yield_zero() {
    let rec = CounterReconciler::default();
    assert_eq!(rec.reconcile("D", &series(&[500])).total_delta, 0);
    assert_eq!(rec.reconcile("D", &series(&[0, 0, 0])).total_delta, 0);
    assert_eq!(rec.reconcile("D", &[]).reset_events, 0);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn reset_absorption_holds_for_random_sequences() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let rec = CounterReconciler::new(0.5);
    for _ in 0..500 {
        let (counts, expected) = sequence_with_one_reset(&mut rng);
        let r = rec.reconcile("D", &series(&counts));
        assert_eq!(r.total_delta, expected, "counts: {counts:?}");
        assert_eq!(r.reset_events, 1, "counts: {counts:?}");
    }
}

#[test]
fn reconciliation_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(7);
    let rec = CounterReconciler::default();
    for _ in 0..100 {
        let (counts, _) = sequence_with_one_reset(&mut rng);
        let readings = series(&counts);
        assert_eq!(rec.reconcile("D", &readings), rec.reconcile("D", &readings));
    }
}

#[test]
fn incremental_state_matches_whole_sequence_fold() {
    let mut rng = StdRng::seed_from_u64(42);
    let rec = CounterReconciler::default();
    for _ in 0..100 {
        let (counts, _) = sequence_with_one_reset(&mut rng);
        let readings = series(&counts);
        let whole = rec.reconcile("D", &readings);

        // Same readings fed in arbitrary chunk sizes
        let mut state = DeviceState::new("D", 10);
        let mut rest = readings.as_slice();
        while !rest.is_empty() {
            let n = rng.gen_range(1..=rest.len());
            state.apply_all(&rest[..n], &rec);
            rest = &rest[n..];
        }
        assert_eq!(state.reconciled_total, whole.total_delta);
        assert_eq!(state.reset_count, whole.reset_events);
    }
}

#[test]
fn batch_sorts_out_of_order_readings_while_live_skips_them() {
    let rec = CounterReconciler::default();
    let mut readings = series(&[100, 110, 120, 130]);
    readings.swap(1, 2);

    // Batch: stable sort by timestamp, so the order is restored
    assert_eq!(rec.reconcile("D", &readings).total_delta, 30);

    // Live: the late reading is dropped and counted
    let mut state = DeviceState::new("D", 10);
    assert_eq!(state.apply_all(&readings, &rec), 3);
    assert_eq!(state.skipped_out_of_order, 1);
    assert_eq!(state.reconciled_total, 30);
}

#[test]
fn recent_window_never_exceeds_its_capacity() {
    let registry = DeviceRegistry::new(CounterReconciler::default(), 10);
    let key = SourceKey::new("DC1", "sau-me", None, "SAU-ME-01");
    let readings = series(&(0..57).map(|i| i * 10).collect::<Vec<u64>>());

    for chunk in readings.chunks(4) {
        registry.apply(&key, chunk);
        let state = registry.get(&key).unwrap();
        assert!(state.recent_window.len() <= 10);
    }
    let state = registry.get(&key).unwrap();
    assert_eq!(state.recent_window.len(), 10);
    assert_eq!(state.recent_window.last().unwrap().raw_count, 560);
    assert_eq!(state.reconciled_total, 560);
}

#[test]
fn rebuild_replaces_state_instead_of_adding_to_it() {
    let registry = DeviceRegistry::new(CounterReconciler::default(), 10);
    let key = SourceKey::new("DC1", "sau-me", None, "SAU-ME-01");
    let mut day: BTreeMap<SourceKey, Vec<Reading>> = BTreeMap::new();
    day.insert(key.clone(), series(&[1000, 1050, 40]));

    registry.rebuild(&day);
    registry.rebuild(&day);
    assert_eq!(registry.get(&key).unwrap().reconciled_total, 90);

    registry.apply_all(&day);
    // Re-applying the same readings live only moves the cursor forward
    let state = registry.get(&key).unwrap();
    assert_eq!(state.reconciled_total, 90);
    assert_eq!(state.skipped_out_of_order, 2);
}
