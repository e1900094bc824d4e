//! One metrics cycle: device snapshot in, per-line snapshots out
//!
//! The same computation backs live, polling and on-demand batch runs, so the
//! arithmetic cannot diverge between modes. `MetricsPipeline` only reads the
//! device snapshot it is handed; `absorb` is the one place collections reach
//! the registry.

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

use crate::acquisition::{date_dir, load_classification, CollectMode, Collected};
use crate::aggregation::{compute_stage_totals, lines_of, position_total, resolve_grades, StageLayout, WasteCalculator};
use crate::analytics::SlidingWindowAnalytics;
use crate::anomaly::AnomalyEvaluator;
use crate::config::EngineConfig;
use crate::reconciler::{ApplySummary, CounterReconciler, DeviceRegistry, DeviceState};
use crate::types::{
    AggregateMetrics, AnomalyRecord, DeviceMetrics, GradeBreakdown, LineMetrics, SourceKey, StageTotals, WasteMetrics,
};

/// Everything published for one line in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub line: String,
    pub metrics: LineMetrics,
    pub devices: Vec<DeviceMetrics>,
    pub stages: Vec<StageTotals>,
    pub waste: WasteMetrics,
    /// Line-wide checks plus calibration drift from the waste view
    pub anomaly: AnomalyRecord,
}

impl LineSnapshot {
    /// True when the line or any of its devices triggered a check.
    pub fn has_anomaly(&self) -> bool {
        self.anomaly.is_anomaly || self.devices.iter().any(|d| d.anomaly.is_anomaly)
    }
}

/// Result of one cycle over every tracked line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub date: NaiveDate,
    pub timestamp: DateTime<Utc>,
    pub lines: Vec<LineSnapshot>,
    pub aggregate: AggregateMetrics,
}

impl CycleReport {
    pub fn line(&self, name: &str) -> Option<&LineSnapshot> {
        self.lines.iter().find(|l| l.line.eq_ignore_ascii_case(name))
    }
}

/// Stage aggregation, analytics and anomaly evaluation over a device snapshot.
pub struct MetricsPipeline {
    config: EngineConfig,
    analytics: SlidingWindowAnalytics,
    evaluator: AnomalyEvaluator,
    waste: WasteCalculator,
}

impl MetricsPipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            analytics: SlidingWindowAnalytics::new(config.analytics.clone()),
            evaluator: AnomalyEvaluator::new(config.anomaly.clone()),
            waste: WasteCalculator::from_config(&config.waste),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute every line present in `devices` as of `now`.
    ///
    /// `grades` holds the classification of the lines that have one.
    pub fn compute(
        &self,
        date: NaiveDate,
        devices: &[(SourceKey, DeviceState)],
        grades: &BTreeMap<String, GradeBreakdown>,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let lines: Vec<LineSnapshot> = lines_of(devices)
            .par_iter()
            .map(|line| self.line_snapshot(line, devices, grades.get(line).cloned(), now))
            .collect();

        let metrics: Vec<LineMetrics> = lines.iter().map(|l| l.metrics.clone()).collect();
        let anomalous: BTreeSet<String> = lines
            .iter()
            .filter(|l| l.has_anomaly())
            .map(|l| l.line.clone())
            .collect();
        let aggregate = self.analytics.aggregate(&metrics, &anomalous, now);

        debug!(
            lines = lines.len(),
            devices = aggregate.total_devices,
            anomalous = aggregate.anomalous_lines,
            "Cycle computed"
        );
        CycleReport {
            date,
            timestamp: now,
            lines,
            aggregate,
        }
    }

    /// Snapshot of one line.
    ///
    /// Stages without devices count as zero; a line with no classification
    /// reports its last stage as finished output.
    pub fn line_snapshot(
        &self,
        line: &str,
        devices: &[(SourceKey, DeviceState)],
        grades: Option<GradeBreakdown>,
        now: DateTime<Utc>,
    ) -> LineSnapshot {
        let on_line: Vec<&(SourceKey, DeviceState)> =
            devices.iter().filter(|(k, _)| k.line.eq_ignore_ascii_case(line)).collect();

        let device_metrics: Vec<DeviceMetrics> = on_line
            .iter()
            .map(|(key, state)| {
                let mut m = self.analytics.metrics(key, state, now);
                m.anomaly = self.evaluator.evaluate(&state.recent_window, None);
                m
            })
            .collect();
        let refs: Vec<&DeviceMetrics> = device_metrics.iter().collect();
        let metrics = self.analytics.rollup(line, &refs, now);

        let layout = StageLayout::for_line(line, &self.config);
        let stages = compute_stage_totals(&layout, devices, None);
        let holdover = position_total(devices, line, self.waste.holdover_position(), None).map(|t| t.combined_total);
        let waste = self.waste.compute(&layout, &stages, holdover, grades);

        let anomaly = self
            .evaluator
            .evaluate_line(&metrics)
            .merge(self.evaluator.evaluate_waste(&waste));

        LineSnapshot {
            line: line.to_string(),
            metrics,
            devices: device_metrics,
            stages,
            waste,
            anomaly,
        }
    }
}

/// Feed one collection into the registry.
///
/// Batch collections replace device state, tail collections extend it. Every
/// seen source is tracked, including ones without new readings.
pub fn absorb(registry: &DeviceRegistry, collected: &Collected) -> ApplySummary {
    let summary = match collected.mode {
        CollectMode::Replace => registry.rebuild(&collected.readings),
        CollectMode::Append => registry.apply_all(&collected.readings),
    };
    for key in &collected.sources {
        registry.ensure(key);
    }
    if collected.failed_sources > 0 || collected.stats.skipped > 0 {
        warn!(
            failed_sources = collected.failed_sources,
            skipped_lines = collected.stats.skipped,
            "Some sources were not fully read"
        );
    }
    summary
}

/// Load and resolve the classification of each line for `date`.
///
/// A line whose classification cannot be read is left out with a warning;
/// the others are unaffected.
pub fn load_line_grades(
    log_root: &Path,
    date: NaiveDate,
    lines: &[String],
    classification_position: &str,
    reconciler: &CounterReconciler,
) -> BTreeMap<String, GradeBreakdown> {
    let dir = date_dir(log_root, date);
    let mut out = BTreeMap::new();
    for line in lines {
        match load_classification(&dir.join(line), classification_position) {
            Ok(Some(source)) => {
                let grades = resolve_grades(&source, reconciler);
                if !grades.is_empty() {
                    out.insert(line.clone(), grades);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(line = %line, error = %e, "Classification unreadable, reporting without grades"),
        }
    }
    out
}
