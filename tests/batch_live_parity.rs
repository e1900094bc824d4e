//! Batch / Live Parity Tests
//!
//! The same log tree is ingested twice: once by tailing it while it grows,
//! once by a whole-day re-read after the fact. Both must end with identical
//! device totals and identical stage totals.

use brickline::acquisition::{date_dir, DeviceMap, FileBatchIngestor, Ingestor, SourceFilter, TailIngestor};
use brickline::aggregation::{compute_stage_totals, StageLayout};
use brickline::config::EngineConfig;
use brickline::pipeline::{absorb, MetricsPipeline};
use brickline::reconciler::{CounterReconciler, DeviceRegistry};
use chrono::{NaiveDate, TimeZone, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 21).unwrap()
}

fn line(minute: u32, second: u32, count: u64) -> String {
    format!("[2025-11-21T06:{minute:02}:{second:02}.000Z] Count: {count}\n")
}

fn append(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
    f.write_all(text.as_bytes()).unwrap();
}

fn registry() -> DeviceRegistry {
    DeviceRegistry::new(CounterReconciler::default(), 10)
}

/// Per-device count series, split into the chunks the tail sees.
struct Feed {
    path: PathBuf,
    chunks: Vec<Vec<u64>>,
}

fn feeds(root: &Path) -> Vec<Feed> {
    let dir = date_dir(root, day());
    vec![
        Feed {
            path: dir.join("DC1/sau-me/sau-me-01.txt"),
            chunks: vec![vec![1000, 1050], vec![1100, 40], vec![90, 160]],
        },
        Feed {
            path: dir.join("DC1/sau-me/sau-me-02_0600.txt"),
            chunks: vec![vec![0], vec![25, 60], vec![100]],
        },
        Feed {
            path: dir.join("DC1/truoc-ln/truoc-ln-01.txt"),
            chunks: vec![vec![500, 540], vec![], vec![600, 3, 70]],
        },
        Feed {
            path: dir.join("DC2/60x60/sau-me/sau-me-07.txt"),
            chunks: vec![vec![10], vec![20, 30], vec![45]],
        },
        Feed {
            path: dir.join("DC2/30x60/sau-me/sau-me-08.txt"),
            chunks: vec![vec![], vec![7, 9], vec![14]],
        },
    ]
}

/// Grow the tree chunk by chunk, tailing after each round.
fn grow_and_tail(root: &Path, tail: &TailIngestor, live: &DeviceRegistry) {
    let feeds = feeds(root);
    let rounds = feeds.iter().map(|f| f.chunks.len()).max().unwrap_or(0);
    let mut sample = vec![0u32; feeds.len()];
    for round in 0..rounds {
        for (i, feed) in feeds.iter().enumerate() {
            let text: String = feed.chunks[round]
                .iter()
                .map(|c| {
                    sample[i] += 1;
                    line(sample[i] / 60, sample[i] % 60, *c)
                })
                .collect();
            if !text.is_empty() {
                append(&feed.path, &text);
            }
        }
        let collected = tail.collect(day()).unwrap();
        absorb(live, &collected);
    }
}

#[test]
fn tailing_a_growing_tree_matches_a_full_reread() {
    let tmp = tempfile::tempdir().unwrap();
    let tail = TailIngestor::new(tmp.path(), SourceFilter::default(), DeviceMap::default());
    let live = registry();
    grow_and_tail(tmp.path(), &tail, &live);

    let batch_ingestor = FileBatchIngestor::new(tmp.path(), SourceFilter::default(), DeviceMap::default());
    let batch = registry();
    absorb(&batch, &batch_ingestor.collect(day()).unwrap());

    let live_totals: Vec<_> = live
        .snapshot()
        .into_iter()
        .map(|(k, s)| (k, s.reconciled_total, s.reset_count))
        .collect();
    let batch_totals: Vec<_> = batch
        .snapshot()
        .into_iter()
        .map(|(k, s)| (k, s.reconciled_total, s.reset_count))
        .collect();
    assert_eq!(live_totals, batch_totals);
    assert_eq!(live_totals.len(), 5);

    // 1000 -> 1050 -> 1100 -> 40 (reset) -> 90 -> 160
    let (_, total, resets) = live_totals
        .iter()
        .find(|(k, _, _)| k.device_id == "SAU-ME-01")
        .unwrap();
    assert_eq!((*total, *resets), (260, 1));
}

#[test]
fn stage_totals_agree_between_modes() {
    let tmp = tempfile::tempdir().unwrap();
    let tail = TailIngestor::new(tmp.path(), SourceFilter::default(), DeviceMap::default());
    let live = registry();
    grow_and_tail(tmp.path(), &tail, &live);

    let batch = registry();
    let ingestor = FileBatchIngestor::new(tmp.path(), SourceFilter::default(), DeviceMap::default());
    absorb(&batch, &ingestor.collect(day()).unwrap());

    let config = EngineConfig::default_with_tables();
    for name in ["DC1", "DC2"] {
        let layout = StageLayout::for_line(name, &config);
        let live_stages = compute_stage_totals(&layout, &live.snapshot(), None);
        let batch_stages = compute_stage_totals(&layout, &batch.snapshot(), None);
        assert_eq!(live_stages, batch_stages, "line {name}");
    }

    // Two brick-type variants of the same position merge into one stage
    let dc2 = compute_stage_totals(&StageLayout::for_line("DC2", &config), &batch.snapshot(), None);
    assert_eq!(dc2[0].combined_total, 35 + 7);
    assert_eq!(dc2[0].per_device_totals.len(), 2);
}

#[test]
fn pipeline_snapshots_agree_between_modes() {
    let tmp = tempfile::tempdir().unwrap();
    let tail = TailIngestor::new(tmp.path(), SourceFilter::default(), DeviceMap::default());
    let live = registry();
    grow_and_tail(tmp.path(), &tail, &live);

    let batch = registry();
    let ingestor = FileBatchIngestor::new(tmp.path(), SourceFilter::default(), DeviceMap::default());
    absorb(&batch, &ingestor.collect(day()).unwrap());

    let pipeline = MetricsPipeline::new(EngineConfig::default_with_tables());
    let now = Utc.with_ymd_and_hms(2025, 11, 21, 6, 5, 0).unwrap();
    let grades = Default::default();
    let a = pipeline.compute(day(), &live.snapshot(), &grades, now);
    let b = pipeline.compute(day(), &batch.snapshot(), &grades, now);

    assert_eq!(a.lines.len(), 2);
    for (x, y) in a.lines.iter().zip(&b.lines) {
        assert_eq!(x.line, y.line);
        assert_eq!(x.metrics.total_produced, y.metrics.total_produced);
        assert_eq!(x.stages, y.stages);
        assert_eq!(x.waste, y.waste);
    }
    assert_eq!(a.aggregate.total_produced, b.aggregate.total_produced);
}

#[test]
fn rollover_reset_starts_the_day_fresh() {
    let tmp = tempfile::tempdir().unwrap();
    let tail = TailIngestor::new(tmp.path(), SourceFilter::default(), DeviceMap::default());
    let live = registry();
    grow_and_tail(tmp.path(), &tail, &live);
    assert!(!live.is_empty());

    tail.reset();
    live.clear();
    let next_day = day().succ_opt().unwrap();
    let collected = tail.collect(next_day).unwrap();
    absorb(&live, &collected);
    assert!(live.is_empty());
}
