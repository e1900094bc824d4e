//! Stage Aggregator
//!
//! Groups reconciled device totals into per-stage totals in pipeline order,
//! then derives the waste view and the quota comparison from them.
//!
//! Stage order is fixed per line. Standard lines fire once:
//!
//! ```text
//! sau-me -> truoc-ln -> sau-ln -> truoc-mm -> truoc-dh
//! ```
//!
//! Double-firing lines pass a biscuit kiln and a glaze kiln:
//!
//! ```text
//! sau-me -> truoc-lo-xuong -> sau-lo-xuong -> truoc-lo-men -> sau-lo-men
//!        -> truoc-mai -> sau-mai -> truoc-dh
//! ```

pub mod quota;
pub mod waste;

pub use quota::{compare_quota, days_in_month, QuotaComparison};
pub use waste::WasteCalculator;

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::acquisition::ClassificationSource;
use crate::config::{defaults, EngineConfig, LayoutKind};
use crate::reconciler::{CounterReconciler, DeviceState};
use crate::types::{GradeBreakdown, SourceKey, StageTotals};

pub const STANDARD_STAGES: [&str; 5] = ["sau-me", "truoc-ln", "sau-ln", "truoc-mm", "truoc-dh"];

pub const DOUBLE_FIRING_STAGES: [&str; 8] = [
    "sau-me",
    "truoc-lo-xuong",
    "sau-lo-xuong",
    "truoc-lo-men",
    "sau-lo-men",
    "truoc-mai",
    "sau-mai",
    "truoc-dh",
];

/// Stages that feed a kiln; the boundary leaving them gets the kiln threshold.
const KILN_ENTRY_STAGES: [&str; 3] = ["truoc-ln", "truoc-lo-xuong", "truoc-lo-men"];

/// Ordered stages of one line plus per-boundary settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StageLayout {
    pub line: String,
    pub stages: Vec<String>,
    /// One alert threshold (percent of entry) per consecutive stage pair
    pub alert_thresholds: Vec<f64>,
    /// Stage whose outgoing boundary absorbs holdover stock
    pub holdover_after: Option<String>,
}

fn default_threshold(from_stage: &str) -> f64 {
    if KILN_ENTRY_STAGES.contains(&from_stage) {
        defaults::KILN_WASTE_ALERT_PERCENT
    } else {
        defaults::DEFAULT_WASTE_ALERT_PERCENT
    }
}

impl StageLayout {
    pub fn new(line: impl Into<String>, stages: Vec<String>, holdover_after: Option<String>) -> Self {
        let alert_thresholds = stages
            .iter()
            .take(stages.len().saturating_sub(1))
            .map(|s| default_threshold(s))
            .collect();
        Self {
            line: line.into(),
            stages,
            alert_thresholds,
            holdover_after,
        }
    }

    pub fn standard(line: impl Into<String>) -> Self {
        Self::new(
            line,
            STANDARD_STAGES.iter().map(|s| (*s).to_string()).collect(),
            Some("sau-ln".to_string()),
        )
    }

    pub fn double_firing(line: impl Into<String>) -> Self {
        Self::new(
            line,
            DOUBLE_FIRING_STAGES.iter().map(|s| (*s).to_string()).collect(),
            Some("sau-lo-men".to_string()),
        )
    }

    /// Layout of `line` from configuration; unconfigured lines are standard.
    pub fn for_line(line: &str, config: &EngineConfig) -> Self {
        let Some(lc) = config.line(line) else {
            return Self::standard(line);
        };

        let mut layout = match (&lc.stages, lc.layout) {
            (Some(stages), _) => Self::new(line, stages.clone(), None),
            (None, LayoutKind::DoubleFiring) => Self::double_firing(line),
            (None, LayoutKind::Standard) => Self::standard(line),
        };
        if lc.holdover_after.is_some() {
            layout.holdover_after.clone_from(&lc.holdover_after);
        }

        if let Some(thresholds) = &lc.alert_thresholds_percent {
            let boundaries = layout.alert_thresholds.len();
            if thresholds.len() != boundaries {
                warn!(
                    line = %line,
                    configured = thresholds.len(),
                    boundaries,
                    "Alert threshold count does not match the layout, padding with defaults"
                );
            }
            for (slot, value) in layout.alert_thresholds.iter_mut().zip(thresholds) {
                *slot = *value;
            }
        }
        layout
    }

    pub fn entry_stage(&self) -> Option<&str> {
        self.stages.first().map(String::as_str)
    }

    /// `(from, to, alert_threshold)` for every consecutive stage pair.
    pub fn boundaries(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.stages
            .iter()
            .zip(self.stages.iter().skip(1))
            .zip(self.alert_thresholds.iter())
            .map(|((from, to), t)| (from.as_str(), to.as_str(), *t))
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }
}

/// Every line present in a device snapshot, sorted.
pub fn lines_of(devices: &[(SourceKey, DeviceState)]) -> Vec<String> {
    let set: BTreeSet<&str> = devices.iter().map(|(k, _)| k.line.as_str()).collect();
    set.into_iter().map(str::to_string).collect()
}

/// Brick-type variants present on a line, sorted.
pub fn brick_types_of(devices: &[(SourceKey, DeviceState)], line: &str) -> Vec<String> {
    let set: BTreeSet<&str> = devices
        .iter()
        .filter(|(k, _)| k.line.eq_ignore_ascii_case(line))
        .filter_map(|(k, _)| k.brick_type.as_deref())
        .collect();
    set.into_iter().map(str::to_string).collect()
}

/// Total of every device at `position` on `line`, or `None` without devices.
///
/// `brick_type = None` sums every variant.
pub fn position_total(
    devices: &[(SourceKey, DeviceState)],
    line: &str,
    position: &str,
    brick_type: Option<&str>,
) -> Option<StageTotals> {
    let mut totals = StageTotals::empty(position);
    for (key, state) in devices {
        if !key.line.eq_ignore_ascii_case(line) || key.position != position {
            continue;
        }
        if brick_type.is_some_and(|bt| key.brick_type.as_deref() != Some(bt)) {
            continue;
        }
        *totals.per_device_totals.entry(key.device_id.clone()).or_insert(0) += state.reconciled_total;
        totals.combined_total = totals.combined_total.saturating_add(state.reconciled_total);
        totals.reset_events += state.reset_count;
    }
    totals.has_data().then_some(totals)
}

/// Ordered stage totals of one line.
///
/// A stage without devices is reported with a zero total and a warning; it
/// never aborts the line.
pub fn compute_stage_totals(
    layout: &StageLayout,
    devices: &[(SourceKey, DeviceState)],
    brick_type: Option<&str>,
) -> Vec<StageTotals> {
    layout
        .stages
        .iter()
        .map(|stage| {
            position_total(devices, &layout.line, stage, brick_type).unwrap_or_else(|| {
                warn!(line = %layout.line, stage = %stage, "No devices for stage, counting zero");
                StageTotals::empty(stage)
            })
        })
        .collect()
}

/// Turn a classification source into final per-grade units.
pub fn resolve_grades(source: &ClassificationSource, reconciler: &CounterReconciler) -> GradeBreakdown {
    match source {
        ClassificationSource::Table(table) => table.clone(),
        ClassificationSource::Counters(series) => {
            let grades: BTreeMap<String, u64> = series
                .iter()
                .map(|(grade, readings)| (grade.clone(), reconciler.reconcile(grade, readings).total_delta))
                .collect();
            debug!(grades = grades.len(), "Grade counters reconciled");
            GradeBreakdown { grades }
        }
    }
}
