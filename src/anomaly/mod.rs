//! Anomaly Evaluator - statistical and rule-based checks per cycle
//!
//! Each check independently contributes a reason, a type tag and a severity.
//! The record's score is the maximum severity, so one severe finding is never
//! diluted by several mild ones. Evaluation is stateless across cycles: it
//! reads only the window it is handed.
//!
//! | Check | Trigger | Score |
//! |---|---|---|
//! | Statistical outlier | leave-one-out z-score of increments > threshold | `min(z / 2·thr, 1)` |
//! | Sudden change | consecutive increment changes by > ratio | 0.6 |
//! | Stoppage | gap without production >= stoppage secs | 0.8 |
//! | High error rate | rejects / produced > max rate | 0.9 |
//! | Low speed | 0 < average speed < floor | 0.7 |
//! | Calibration drift | waste clamped at a stage boundary | 0.4 |

use statrs::statistics::{Data, Distribution};
use tracing::debug;

use crate::analytics::kpi::{error_rate, speed_profile};
use crate::analytics::window::{increments, produced, seconds_between};
use crate::config::AnomalyConfig;
use crate::reconciler::RecentWindow;
use crate::types::{AnomalyRecord, AnomalyType, LineMetrics, WasteMetrics};

#[derive(Debug, Clone, Default)]
pub struct AnomalyEvaluator {
    config: AnomalyConfig,
}

/// Accumulates triggered checks into one record.
struct Findings(AnomalyRecord);

impl Findings {
    fn new() -> Self {
        Self(AnomalyRecord::clear())
    }

    fn flag(&mut self, kind: AnomalyType, score: f64, reason: String) {
        self.0.is_anomaly = true;
        self.0.score = self.0.score.max(score.clamp(0.0, 1.0));
        self.0.reasons.push(reason);
        self.0.types.insert(kind);
    }

    fn finish(self) -> AnomalyRecord {
        self.0
    }
}

impl AnomalyEvaluator {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Evaluate one device window, optionally together with its line rollup.
    pub fn evaluate(&self, window: &RecentWindow, line: Option<&LineMetrics>) -> AnomalyRecord {
        let mut findings = Findings::new();
        self.check_outliers(window, &mut findings);
        self.check_sudden_change(window, &mut findings);
        self.check_stoppage(window, &mut findings);
        self.check_quality(window, &mut findings);

        let record = findings.finish();
        match line {
            Some(l) => record.merge(self.evaluate_line(l)),
            None => record,
        }
    }

    /// Line-level checks: whole-line stoppage and low mean speed.
    pub fn evaluate_line(&self, line: &LineMetrics) -> AnomalyRecord {
        let mut findings = Findings::new();
        if line.total_devices > 0 && line.running_devices == 0 {
            findings.flag(
                AnomalyType::Stoppage,
                self.config.scores.stoppage,
                format!("All {} devices on line {} are stopped", line.total_devices, line.line),
            );
        }
        let per_hour = line.mean_speed_per_minute * 60.0;
        if per_hour > 0.0 && per_hour < self.config.min_speed_per_hour {
            findings.flag(
                AnomalyType::LowSpeed,
                self.config.scores.low_speed,
                format!(
                    "Low line speed: {per_hour:.1} units/hour (minimum {:.1})",
                    self.config.min_speed_per_hour
                ),
            );
        }
        findings.finish()
    }

    /// Clamped waste boundaries point at miscalibrated counters.
    pub fn evaluate_waste(&self, waste: &WasteMetrics) -> AnomalyRecord {
        let mut findings = Findings::new();
        for event in &waste.clamp_events {
            findings.flag(
                AnomalyType::CalibrationDrift,
                self.config.scores.calibration_drift,
                format!(
                    "Downstream {} counted {} more than upstream {} on line {}",
                    event.to_stage, event.excess, event.from_stage, waste.line
                ),
            );
        }
        findings.finish()
    }

    /// Leave-one-out z-score of production increments.
    ///
    /// Each increment is compared with the mean and deviation of the others,
    /// with a deviation floor so a perfectly steady window still has a scale.
    fn check_outliers(&self, window: &RecentWindow, findings: &mut Findings) {
        let cfg = &self.config;
        if window.len() < cfg.min_samples {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let values: Vec<f64> = increments(window).into_iter().map(|v| v as f64).collect();
        if values.len() < 3 {
            return;
        }

        let mut outliers = 0usize;
        let mut max_z = 0.0f64;
        for (i, value) in values.iter().enumerate() {
            let others: Vec<f64> = values
                .iter()
                .enumerate()
                .filter_map(|(j, v)| (j != i).then_some(*v))
                .collect();
            let data = Data::new(others);
            let mean = data.mean().unwrap_or(0.0);
            let std = data.std_dev().filter(|s| s.is_finite()).unwrap_or(0.0);
            let floor = (mean.abs() * cfg.std_floor_ratio).max(cfg.std_floor_abs);
            let z = (value - mean).abs() / std.max(floor);
            if z > cfg.z_threshold {
                outliers += 1;
                max_z = max_z.max(z);
            }
        }

        if outliers > 0 {
            debug!(outliers, max_z, "Statistical deviation in production increments");
            findings.flag(
                AnomalyType::StatisticalOutlier,
                (max_z / (cfg.z_threshold * 2.0)).min(1.0),
                format!(
                    "Statistical deviation: {outliers} increment(s) exceed {:.1} standard deviations (max z {max_z:.1})",
                    cfg.z_threshold
                ),
            );
        }
    }

    fn check_sudden_change(&self, window: &RecentWindow, findings: &mut Findings) {
        let inc = increments(window);
        let changes = inc
            .windows(2)
            .filter(|pair| self.is_sudden(pair[0], pair[1]))
            .count();
        if changes > 0 {
            findings.flag(
                AnomalyType::SuddenChange,
                self.config.scores.sudden_change,
                format!(
                    "Sudden change: {changes} interval(s) changed by more than {:.0}%",
                    self.config.sudden_change_ratio * 100.0
                ),
            );
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn is_sudden(&self, prev: u64, cur: u64) -> bool {
        prev > 0 && prev.abs_diff(cur) as f64 / prev as f64 > self.config.sudden_change_ratio
    }

    fn check_stoppage(&self, window: &RecentWindow, findings: &mut Findings) {
        let longest = window
            .pairs()
            .filter(|(a, b)| produced(a, b) == 0)
            .map(|(a, b)| seconds_between(a.timestamp, b.timestamp))
            .fold(0.0f64, f64::max);
        if longest >= self.config.stoppage_secs {
            findings.flag(
                AnomalyType::Stoppage,
                self.config.scores.stoppage,
                format!("Production stoppage: {:.1} minutes without output", longest / 60.0),
            );
        }
    }

    fn check_quality(&self, window: &RecentWindow, findings: &mut Findings) {
        let cfg = &self.config;
        if let Some((errors, count, rate)) = error_rate(window) {
            if rate > cfg.max_error_rate {
                findings.flag(
                    AnomalyType::HighErrorRate,
                    cfg.scores.high_error_rate,
                    format!(
                        "High error rate: {:.2}% ({errors} of {count}, maximum {:.2}%)",
                        rate * 100.0,
                        cfg.max_error_rate * 100.0
                    ),
                );
            }
        }

        let (avg, _) = speed_profile(window);
        if avg > 0.0 && avg < cfg.min_speed_per_hour {
            findings.flag(
                AnomalyType::LowSpeed,
                cfg.scores.low_speed,
                format!(
                    "Low production speed: {avg:.1} units/hour (minimum {:.1})",
                    cfg.min_speed_per_hour
                ),
            );
        }
    }
}
