use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Combined reconciled production at one stage of a line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTotals {
    pub stage_name: String,
    /// Device id to reconciled total (brick-type variants already summed)
    pub per_device_totals: BTreeMap<String, u64>,
    pub combined_total: u64,
    /// Resets absorbed while reconciling this stage's devices
    pub reset_events: u32,
}

impl StageTotals {
    pub fn empty(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            ..Self::default()
        }
    }

    pub fn has_data(&self) -> bool {
        !self.per_device_totals.is_empty()
    }
}

/// Finished-goods grade breakdown from the classification source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeBreakdown {
    /// Grade name (A1, A2, CL, PL1, ...) to units, in reporting order
    pub grades: BTreeMap<String, u64>,
}

impl GradeBreakdown {
    pub fn total(&self) -> u64 {
        self.grades.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.grades.is_empty()
    }
}

/// Loss between two consecutive stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryWaste {
    pub from_stage: String,
    pub to_stage: String,
    pub upstream: u64,
    pub downstream: u64,
    /// Holdover stock subtracted from upstream at this boundary
    #[serde(default)]
    pub holdover: u64,
    /// `max(0, upstream - holdover - downstream)`
    pub waste: u64,
    pub clamped: bool,
    /// Alert threshold for this boundary (percent of entry)
    pub alert_threshold_percent: f64,
}

/// A boundary where downstream exceeded upstream and waste was clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClampEvent {
    pub from_stage: String,
    pub to_stage: String,
    /// Units by which downstream exceeded what upstream could supply
    pub excess: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    StageLoss,
    Holdover,
    FinishingLoss,
    Grade,
    /// Last stage output when no classification is available
    Finished,
}

/// One slice of the line's entry volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentBucket {
    pub name: String,
    pub kind: BucketKind,
    pub units: u64,
    pub percent: f64,
    /// Set for stage-loss buckets whose percent exceeds their alert threshold
    #[serde(default)]
    pub alert: bool,
}

/// Output of a stage relative to the entry stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageYield {
    pub stage_name: String,
    pub percent: f64,
}

/// Read-only waste view over one line's ordered stage totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WasteMetrics {
    pub line: String,
    pub entry_total: u64,
    pub boundaries: Vec<BoundaryWaste>,
    pub clamp_events: Vec<ClampEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grades: Option<GradeBreakdown>,
    /// `max(0, last stage - graded units)` when grades are known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finishing_loss: Option<u64>,
    /// Empty when the entry total is zero
    pub percentages: Vec<PercentBucket>,
    pub yields: Vec<StageYield>,
    /// Sum of all bucket percentages (None when there are no percentages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_sum: Option<f64>,
    /// False when `percent_sum` deviates from 100 by more than the tolerance
    pub balanced: bool,
}

impl WasteMetrics {
    pub fn total_waste(&self) -> u64 {
        self.boundaries.iter().map(|b| b.waste).sum()
    }

    pub fn alerts(&self) -> impl Iterator<Item = &PercentBucket> {
        self.percentages.iter().filter(|b| b.alert)
    }
}
