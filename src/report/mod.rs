//! Daily batch reports
//!
//! On-demand analysis of one line for one production date: a full re-read of
//! the day's readings through the same registry and pipeline the live engine
//! uses, plus the per-brick-type breakdown and quota comparison that only
//! make sense for a whole day.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::acquisition::{
    DeviceMap, FileBatchIngestor, IngestError, Ingestor, ParseStats, ReadingStore, SourceFilter, StoreBatchIngestor,
};
use crate::aggregation::{brick_types_of, compute_stage_totals, compare_quota, QuotaComparison, StageLayout, WasteCalculator};
use crate::config::EngineConfig;
use crate::pipeline::{absorb, load_line_grades, MetricsPipeline};
use crate::reconciler::{CounterReconciler, DeviceRegistry, DeviceState};
use crate::types::{AnomalyRecord, DeviceMetrics, GradeBreakdown, SourceKey, StageTotals, WasteMetrics};

/// Stage and waste view restricted to one brick-type variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrickTypeReport {
    pub brick_type: String,
    pub stages: Vec<StageTotals>,
    pub waste: WasteMetrics,
}

/// Full day report of one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReport {
    pub line: String,
    pub date: NaiveDate,
    /// Ingestor the readings came from
    pub source: String,
    /// Time the live metrics were evaluated at (latest reading)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
    pub parse: ParseStats,
    pub failed_sources: usize,
    pub stages: Vec<StageTotals>,
    pub waste: WasteMetrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brick_types: Vec<BrickTypeReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grades: Option<GradeBreakdown>,
    pub devices: Vec<DeviceMetrics>,
    pub anomaly: AnomalyRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaComparison>,
}

impl LineReport {
    /// Units leaving the line: graded units when known, else the last stage.
    pub fn finished_units(&self) -> u64 {
        self.grades
            .as_ref()
            .map(GradeBreakdown::total)
            .or_else(|| self.stages.last().map(|s| s.combined_total))
            .unwrap_or(0)
    }
}

/// Whole-day log-file ingestor for one line.
pub fn file_ingestor(config: &EngineConfig, line: &str) -> FileBatchIngestor {
    FileBatchIngestor::new(
        config.engine.log_root.clone(),
        SourceFilter::for_line(line).excluding(config.waste.classification_position.clone()),
        DeviceMap::new(&config.devices),
    )
}

/// Whole-day datastore ingestor for one line.
pub fn store_ingestor(config: &EngineConfig, store: ReadingStore, line: &str) -> StoreBatchIngestor {
    StoreBatchIngestor::new(store, DeviceMap::new(&config.devices), Some(line.to_string()))
}

/// Analyze one line for one date.
///
/// `product` overrides the line's configured quota product.
pub fn analyze_line(
    config: &EngineConfig,
    ingestor: &dyn Ingestor,
    date: NaiveDate,
    line: &str,
    product: Option<&str>,
) -> Result<LineReport, IngestError> {
    let collected = ingestor.collect(date)?;
    let registry = DeviceRegistry::new(
        CounterReconciler::from_config(&config.reconciler),
        config.reconciler.window_size,
    );
    let summary = absorb(&registry, &collected);
    let devices = registry.snapshot();
    if devices.is_empty() {
        warn!(line = %line, date = %date, source = ingestor.name(), "No counter sources found");
    }

    let grades = load_line_grades(
        &config.engine.log_root,
        date,
        &[line.to_string()],
        &config.waste.classification_position,
        registry.reconciler(),
    )
    .remove(line);

    let evaluated_at = devices.iter().filter_map(|(_, s)| s.last_seen_timestamp).max();
    let pipeline = MetricsPipeline::new(config.clone());
    let snapshot = pipeline.line_snapshot(line, &devices, grades.clone(), evaluated_at.unwrap_or_else(Utc::now));

    let mut report = LineReport {
        line: line.to_string(),
        date,
        source: ingestor.name().to_string(),
        evaluated_at,
        parse: collected.stats,
        failed_sources: collected.failed_sources,
        stages: snapshot.stages,
        waste: snapshot.waste,
        brick_types: brick_type_breakdown(config, line, &devices),
        grades,
        devices: snapshot.devices,
        anomaly: snapshot.anomaly,
        quota: None,
    };
    report.quota = quota_for(config, &report, product);

    info!(
        line = %line,
        date = %date,
        devices = devices.len(),
        resets = summary.resets,
        entry = report.waste.entry_total,
        finished = report.finished_units(),
        "Daily analysis complete"
    );
    Ok(report)
}

/// Stage totals and waste per brick-type variant, when the line has variants.
fn brick_type_breakdown(config: &EngineConfig, line: &str, devices: &[(SourceKey, DeviceState)]) -> Vec<BrickTypeReport> {
    let layout = StageLayout::for_line(line, config);
    let calculator = WasteCalculator::from_config(&config.waste);
    brick_types_of(devices, line)
        .into_iter()
        .map(|brick_type| {
            let stages = compute_stage_totals(&layout, devices, Some(&brick_type));
            let waste = calculator.compute(&layout, &stages, None, None);
            BrickTypeReport {
                brick_type,
                stages,
                waste,
            }
        })
        .collect()
}

fn quota_for(config: &EngineConfig, report: &LineReport, product: Option<&str>) -> Option<QuotaComparison> {
    let product = product
        .map(str::to_string)
        .or_else(|| config.line(&report.line).and_then(|l| l.product.clone()))?;
    let Some(target) = config.quota.get(&product) else {
        warn!(product = %product, "Unknown quota product");
        return None;
    };
    Some(compare_quota(&product, target, report.date, report.finished_units()))
}
