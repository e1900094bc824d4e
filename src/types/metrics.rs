use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnomalyRecord, SourceKey};

/// Direction of a device's per-interval speed over its recent window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
    /// Every interval in the window was below the stopped-speed floor
    Stopped,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
            Self::Stable => write!(f, "stable"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Distribution of per-interval speeds (units/minute) inside the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Overall Equipment Effectiveness components, each in [0, 1].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Oee {
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
}

/// Production KPIs over a span of readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceKpi {
    pub count_increment: u64,
    pub error_increment: u64,
    /// Errors per produced unit (fraction)
    pub error_rate: f64,
    pub avg_speed_per_hour: f64,
    pub peak_speed_per_hour: f64,
    pub downtime_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oee: Option<Oee>,
}

/// Live view of one device, recomputed every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub source: SourceKey,
    /// Reconciled production since the start of the day
    pub total_produced: u64,
    pub reset_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub window_len: usize,
    pub produced_in_window: u64,
    pub speed_per_minute: f64,
    pub speed_per_hour: f64,
    pub trend: Trend,
    pub is_running: bool,
    pub idle_time_seconds: f64,
    pub uptime_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency_percent: Option<f64>,
    pub stats: WindowStats,
    pub kpi: DeviceKpi,
    pub anomaly: AnomalyRecord,
}

/// Rollup over the devices of one line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineMetrics {
    pub line: String,
    pub total_devices: usize,
    pub running_devices: usize,
    pub stopped_devices: usize,
    /// Sum of per-device reconciled totals
    pub total_produced: u64,
    /// Mean of per-device window speeds (units/minute)
    pub mean_speed_per_minute: f64,
    pub timestamp: DateTime<Utc>,
}

/// Summary over every line, published on the aggregate channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_lines: usize,
    pub total_devices: usize,
    pub running_devices: usize,
    pub total_produced: u64,
    pub anomalous_lines: usize,
    pub timestamp: DateTime<Utc>,
}
