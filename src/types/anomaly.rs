use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Category of a triggered anomaly check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    StatisticalOutlier,
    SuddenChange,
    Stoppage,
    HighErrorRate,
    LowSpeed,
    /// Downstream stage counted more than upstream (waste clamped to zero)
    CalibrationDrift,
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StatisticalOutlier => "statistical_outlier",
            Self::SuddenChange => "sudden_change",
            Self::Stoppage => "stoppage",
            Self::HighErrorRate => "high_error_rate",
            Self::LowSpeed => "low_speed",
            Self::CalibrationDrift => "calibration_drift",
        };
        f.write_str(s)
    }
}

/// Result of one evaluation cycle. Replaced every cycle, never mutated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub is_anomaly: bool,
    /// Maximum severity over triggered checks, in [0, 1]
    pub score: f64,
    /// Human-readable reasons, in check order
    pub reasons: Vec<String>,
    pub types: BTreeSet<AnomalyType>,
}

impl AnomalyRecord {
    /// Record with no triggered checks.
    pub fn clear() -> Self {
        Self::default()
    }

    /// Combine two records: reasons concatenate, score is the maximum.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.is_anomaly |= other.is_anomaly;
        self.score = self.score.max(other.score);
        self.reasons.extend(other.reasons);
        self.types.extend(other.types);
        self
    }
}
