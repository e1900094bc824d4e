//! Waste view over one line's ordered stage totals
//!
//! Each consecutive stage pair yields `max(0, upstream - holdover - downstream)`.
//! Every bucket is then expressed as a percentage of the entry stage. With
//! exact counts the buckets telescope back to the entry volume, so their sum
//! is 100 %; a deviation beyond the tolerance means missing instrumentation or
//! clamped noise and is reported, never rejected.

use tracing::{debug, warn};

use super::StageLayout;
use crate::config::WasteConfig;
use crate::types::{
    BoundaryWaste, BucketKind, ClampEvent, GradeBreakdown, PercentBucket, StageTotals, StageYield,
    WasteMetrics,
};

/// Name used for the boundary between the last stage and the graded stock.
pub const FINISHING_STAGE: &str = "nhap-kho";

#[allow(clippy::cast_precision_loss)]
fn percent_of(units: u64, entry: u64) -> f64 {
    units as f64 / entry as f64 * 100.0
}

/// `(waste, excess)` of `upstream - holdover - downstream` clamped at zero.
fn clamped_difference(upstream: u64, holdover: u64, downstream: u64) -> (u64, u64) {
    let raw = i128::from(upstream) - i128::from(holdover) - i128::from(downstream);
    if raw >= 0 {
        (u64::try_from(raw).unwrap_or(u64::MAX), 0)
    } else {
        (0, u64::try_from(-raw).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Clone)]
pub struct WasteCalculator {
    tolerance_pp: f64,
    holdover_position: String,
}

impl Default for WasteCalculator {
    fn default() -> Self {
        Self::from_config(&WasteConfig::default())
    }
}

impl WasteCalculator {
    pub fn from_config(config: &WasteConfig) -> Self {
        Self {
            tolerance_pp: config.tolerance_pp,
            holdover_position: config.holdover_position.clone(),
        }
    }

    /// Position folder whose devices count holdover stock.
    pub fn holdover_position(&self) -> &str {
        &self.holdover_position
    }

    /// Build the waste view.
    ///
    /// `stages` must follow `layout.stages`. `holdover` is the reconciled
    /// holdover stock, subtracted at the boundary leaving
    /// `layout.holdover_after`. `grades`, when present, replaces the last
    /// stage's "finished" bucket with a finishing-loss bucket plus one bucket
    /// per grade.
    pub fn compute(
        &self,
        layout: &StageLayout,
        stages: &[StageTotals],
        holdover: Option<u64>,
        grades: Option<GradeBreakdown>,
    ) -> WasteMetrics {
        let mut out = WasteMetrics {
            line: layout.line.clone(),
            balanced: true,
            ..WasteMetrics::default()
        };
        let Some(entry) = stages.first() else {
            return out;
        };
        out.entry_total = entry.combined_total;

        let mut holdover_used = false;
        for (pair, (_, _, threshold)) in stages.windows(2).zip(layout.boundaries()) {
            let (up, down) = (&pair[0], &pair[1]);
            let held = match (holdover, layout.holdover_after.as_deref()) {
                (Some(units), Some(after)) if after == up.stage_name => {
                    holdover_used = true;
                    units
                }
                _ => 0,
            };
            let (waste, excess) = clamped_difference(up.combined_total, held, down.combined_total);
            if excess > 0 {
                warn!(
                    line = %layout.line,
                    from = %up.stage_name,
                    to = %down.stage_name,
                    excess,
                    "Downstream exceeds upstream, waste clamped to zero"
                );
                out.clamp_events.push(ClampEvent {
                    from_stage: up.stage_name.clone(),
                    to_stage: down.stage_name.clone(),
                    excess,
                });
            }
            out.boundaries.push(BoundaryWaste {
                from_stage: up.stage_name.clone(),
                to_stage: down.stage_name.clone(),
                upstream: up.combined_total,
                downstream: down.combined_total,
                holdover: held,
                waste,
                clamped: excess > 0,
                alert_threshold_percent: threshold,
            });
        }
        if holdover.is_some_and(|h| h > 0) && !holdover_used {
            warn!(line = %layout.line, "Holdover stock present but no boundary takes it, ignored");
        }

        let last = stages.last().map_or(0, |s| s.combined_total);
        let grades = grades.filter(|g| !g.is_empty());
        if let Some(g) = &grades {
            let (loss, excess) = clamped_difference(last, 0, g.total());
            if excess > 0 {
                out.clamp_events.push(ClampEvent {
                    from_stage: stages.last().map(|s| s.stage_name.clone()).unwrap_or_default(),
                    to_stage: FINISHING_STAGE.to_string(),
                    excess,
                });
            }
            out.finishing_loss = Some(loss);
        }
        out.grades = grades;

        if out.entry_total == 0 {
            debug!(line = %layout.line, "Entry total is zero, no percentage view");
            return out;
        }
        let entry_total = out.entry_total;

        for b in &out.boundaries {
            let percent = percent_of(b.waste, entry_total);
            out.percentages.push(PercentBucket {
                name: format!("{} -> {}", b.from_stage, b.to_stage),
                kind: BucketKind::StageLoss,
                units: b.waste,
                percent,
                alert: percent > b.alert_threshold_percent,
            });
        }
        if holdover_used {
            let units = holdover.unwrap_or(0);
            out.percentages.push(PercentBucket {
                name: self.holdover_position.clone(),
                kind: BucketKind::Holdover,
                units,
                percent: percent_of(units, entry_total),
                alert: false,
            });
        }
        match (&out.grades, out.finishing_loss) {
            (Some(g), Some(loss)) => {
                out.percentages.push(PercentBucket {
                    name: "finishing".to_string(),
                    kind: BucketKind::FinishingLoss,
                    units: loss,
                    percent: percent_of(loss, entry_total),
                    alert: false,
                });
                for (grade, units) in &g.grades {
                    out.percentages.push(PercentBucket {
                        name: grade.clone(),
                        kind: BucketKind::Grade,
                        units: *units,
                        percent: percent_of(*units, entry_total),
                        alert: false,
                    });
                }
            }
            _ => {
                let name = stages.last().map(|s| s.stage_name.clone()).unwrap_or_default();
                out.percentages.push(PercentBucket {
                    name,
                    kind: BucketKind::Finished,
                    units: last,
                    percent: percent_of(last, entry_total),
                    alert: false,
                });
            }
        }

        out.yields = stages
            .iter()
            .map(|s| StageYield {
                stage_name: s.stage_name.clone(),
                percent: percent_of(s.combined_total, entry_total),
            })
            .collect();

        let sum: f64 = out.percentages.iter().map(|b| b.percent).sum();
        out.percent_sum = Some(sum);
        out.balanced = (sum - 100.0).abs() <= self.tolerance_pp;
        if !out.balanced {
            warn!(
                line = %layout.line,
                percent_sum = sum,
                "Waste buckets do not add up to 100%"
            );
        }
        out
    }
}
