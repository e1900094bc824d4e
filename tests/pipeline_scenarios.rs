//! End-to-End Pipeline Scenarios
//!
//! Log trees and datastore rows go in, published line snapshots and daily
//! reports come out. Covers the worked examples (reset absorption, stage
//! waste, idle detection, statistical deviation) through the public API.

use brickline::acquisition::{
    date_dir, DeviceMap, FileBatchIngestor, MeasurementPayload, MeasurementRow, ReadingStore, SourceFilter,
};
use brickline::analytics::SlidingWindowAnalytics;
use brickline::config::{DeviceMapping, EngineConfig, PublisherConfig};
use brickline::pipeline::publisher::{line_key, AGGREGATE_KEY};
use brickline::pipeline::{run_cycle, MemoryBus, MetricsPipeline, Publisher};
use brickline::reconciler::{CounterReconciler, DeviceRegistry, DeviceState};
use brickline::report::{analyze_line, store_ingestor};
use brickline::types::{AnomalyType, BucketKind, Reading, SourceKey};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 21).unwrap()
}

/// Write `counts` as one sample every 10 seconds from 06:00.
fn write_counter(root: &Path, rel: &str, counts: &[u64]) {
    let path = date_dir(root, day()).join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let text: String = counts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[2025-11-21T06:{:02}:{:02}.000Z] Count: {c}\n", i * 10 / 60, i * 10 % 60))
        .collect();
    fs::write(path, text).unwrap();
}

fn config(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::default_with_tables();
    config.engine.log_root = root.to_path_buf();
    config
}

fn one_cycle(config: &EngineConfig) -> brickline::CycleReport {
    let ingestor = FileBatchIngestor::new(
        config.engine.log_root.clone(),
        SourceFilter::default().excluding(config.waste.classification_position.clone()),
        DeviceMap::new(&config.devices),
    );
    let registry = DeviceRegistry::new(CounterReconciler::from_config(&config.reconciler), config.reconciler.window_size);
    run_cycle(&ingestor, &registry, &MetricsPipeline::new(config.clone()), day()).unwrap()
}

#[test]
fn reset_is_absorbed_into_the_line_total() {
    let tmp = tempfile::tempdir().unwrap();
    write_counter(tmp.path(), "DC1/sau-me/sau-me-01.txt", &[1000, 1050, 40]);

    let report = one_cycle(&config(tmp.path()));
    let dc1 = report.line("DC1").unwrap();
    assert_eq!(dc1.metrics.total_produced, 90);
    assert_eq!(dc1.devices[0].reset_count, 1);
    assert_eq!(dc1.stages[0].combined_total, 90);
    assert_eq!(dc1.stages[0].reset_events, 1);
}

#[test]
fn stage_waste_and_percentages_of_entry() {
    let tmp = tempfile::tempdir().unwrap();
    write_counter(tmp.path(), "DC1/sau-me/sau-me-01.txt", &[0, 6_000, 10_000]);
    write_counter(tmp.path(), "DC1/truoc-ln/truoc-ln-01.txt", &[0, 9_800]);
    write_counter(tmp.path(), "DC1/sau-ln/sau-ln-01.txt", &[0, 4_000]);
    write_counter(tmp.path(), "DC1/sau-ln/sau-ln-02.txt", &[0, 5_700]);
    write_counter(tmp.path(), "DC1/truoc-mm/truoc-mm-01.txt", &[0, 9_650]);
    write_counter(tmp.path(), "DC1/truoc-dh/truoc-dh-01.txt", &[0, 9_500]);

    let report = one_cycle(&config(tmp.path()));
    let waste = &report.line("DC1").unwrap().waste;

    let buckets: Vec<u64> = waste.boundaries.iter().map(|b| b.waste).collect();
    assert_eq!(buckets, vec![200, 100, 50, 150]);
    let stage_pct: Vec<f64> = waste
        .percentages
        .iter()
        .filter(|b| b.kind == BucketKind::StageLoss)
        .map(|b| b.percent)
        .collect();
    for (got, want) in stage_pct.iter().zip([2.0, 1.0, 0.5, 1.5]) {
        assert!((got - want).abs() < 1e-9, "{got} vs {want}");
    }
    let finished = waste.percentages.iter().find(|b| b.kind == BucketKind::Finished).unwrap();
    assert!((finished.percent - 95.0).abs() < 1e-9);
    assert!((waste.percent_sum.unwrap() - 100.0).abs() <= 0.1);
    assert!(waste.balanced);
    assert!(waste.boundaries.iter().all(|b| !b.clamped));
}

#[test]
fn noisy_downstream_never_produces_negative_waste() {
    let tmp = tempfile::tempdir().unwrap();
    write_counter(tmp.path(), "DC1/sau-me/sau-me-01.txt", &[0, 1_000]);
    write_counter(tmp.path(), "DC1/truoc-ln/truoc-ln-01.txt", &[0, 1_015]);
    write_counter(tmp.path(), "DC1/sau-ln/sau-ln-01.txt", &[0, 990]);

    let report = one_cycle(&config(tmp.path()));
    let dc1 = report.line("DC1").unwrap();
    assert_eq!(dc1.waste.boundaries[0].waste, 0);
    assert!(dc1.waste.boundaries[0].clamped);
    assert_eq!(dc1.waste.clamp_events[0].excess, 15);
    // Missing stages count as zero, never as an error
    assert_eq!(dc1.stages[3].combined_total, 0);
    assert!(dc1.anomaly.types.contains(&AnomalyType::CalibrationDrift));
}

#[test]
fn device_silent_for_seventy_seconds_is_idle() {
    let t0 = Utc.with_ymd_and_hms(2025, 11, 21, 6, 0, 0).unwrap();
    let rec = CounterReconciler::default();
    let mut state = DeviceState::new("SAU-ME-01", 10);
    for i in 0..5 {
        state.apply(&Reading::new("SAU-ME-01", "sau-me", t0 + Duration::seconds(i * 10), 100 + i as u64 * 5), &rec);
    }
    let key = SourceKey::new("DC1", "sau-me", None, "SAU-ME-01");
    let now = t0 + Duration::seconds(40 + 70);

    let m = SlidingWindowAnalytics::default().metrics(&key, &state, now);
    assert!(!m.is_running);
    assert!((m.idle_time_seconds - 70.0).abs() < 1e-6);
    assert_eq!(m.total_produced, 20);
}

#[test]
fn single_deviating_interval_is_flagged_statistically() {
    let tmp = tempfile::tempdir().unwrap();
    // Steady +10 per interval except one +50
    let mut counts: Vec<u64> = (0..11).map(|i| i * 10).collect();
    for c in counts.iter_mut().skip(6) {
        *c += 40;
    }
    write_counter(tmp.path(), "DC1/sau-me/sau-me-01.txt", &counts);

    let report = one_cycle(&config(tmp.path()));
    let device = &report.line("DC1").unwrap().devices[0];
    assert!(device.anomaly.is_anomaly);
    assert!(device.anomaly.score > 0.5);
    assert!(device.anomaly.types.contains(&AnomalyType::StatisticalOutlier));
    assert!(device.anomaly.reasons.iter().any(|r| r.contains("Statistical deviation")));
}

#[test]
fn published_snapshots_are_readable_from_the_bus() {
    let tmp = tempfile::tempdir().unwrap();
    write_counter(tmp.path(), "DC1/sau-me/sau-me-01.txt", &[1000, 1050, 40]);
    write_counter(tmp.path(), "DC2/sau-me/sau-me-02.txt", &[0, 25]);
    let report = one_cycle(&config(tmp.path()));

    let bus = Arc::new(MemoryBus::new(16));
    let mut rx = bus.subscribe();
    let publisher = Publisher::new("analytics", &PublisherConfig::default()).with_sink(bus.clone());

    let summary = tokio_test::block_on(publisher.publish(&report));
    // Two lines plus the aggregate, each published and stored
    assert_eq!(summary.delivered, 6);
    assert_eq!(summary.failed, 0);

    let dc1 = tokio_test::block_on(bus.get(&line_key("DC1"))).unwrap();
    assert_eq!(dc1["metrics"]["total_produced"], 90);
    let aggregate = tokio_test::block_on(bus.get(AGGREGATE_KEY)).unwrap();
    assert_eq!(aggregate["total_lines"], 2);
    assert_eq!(aggregate["total_produced"], 115);

    let mut channels = Vec::new();
    while let Ok(message) = rx.try_recv() {
        channels.push(message.channel);
    }
    channels.sort();
    assert_eq!(
        channels,
        vec!["analytics:aggregate", "analytics:line:DC1", "analytics:line:DC2"]
    );
}

#[test]
fn store_rows_reconcile_like_log_files() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ReadingStore::open(tmp.path().join("store")).unwrap();
    // Midday UTC stays on the same production date in any zone within 12 hours
    let t0 = Utc.with_ymd_and_hms(2025, 11, 21, 12, 0, 0).unwrap();
    let rows: Vec<MeasurementRow> = [1000u64, 1050, 40]
        .iter()
        .enumerate()
        .map(|(i, count)| MeasurementRow {
            device_id: 17,
            timestamp: t0 + Duration::seconds(i as i64 * 10),
            payload: MeasurementPayload {
                count: *count,
                error: Some(i as u64),
                rssi: None,
                battery: None,
                temperature: None,
                uptime: None,
            },
        })
        .collect();
    store.insert_batch(&rows).unwrap();

    let mut config = config(&tmp.path().join("logs"));
    config.devices.push(DeviceMapping {
        id: "SAU-ME-01".to_string(),
        line: "DC1".to_string(),
        position: "sau-me".to_string(),
        brick_type: None,
        store_id: Some(17),
    });

    let ingestor = store_ingestor(&config, store, "DC1");
    let report = analyze_line(&config, &ingestor, day(), "DC1", None).unwrap();
    assert_eq!(report.source, "reading-store");
    assert_eq!(report.stages[0].combined_total, 90);
    assert_eq!(report.devices[0].kpi.error_increment, 2);
    assert_eq!(report.parse.parsed, 3);
}
