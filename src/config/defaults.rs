//! System-wide default constants.
//!
//! Every tunable in [`super::EngineConfig`] falls back to one of these values.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Engine / Scheduler
// ============================================================================

/// Default log root containing `<date>/<line>/...` trees.
pub const LOG_ROOT: &str = "logs";

/// Default data directory for the sled reading store.
pub const DATA_DIR: &str = "./data";

/// Cycle interval for both live and polling modes (seconds).
pub const CYCLE_INTERVAL_SECS: u64 = 10;

/// Publish namespace prefix (`<namespace>:line:<line>`).
pub const NAMESPACE: &str = "analytics";

// ============================================================================
// Reconciler
// ============================================================================

/// A reading below `previous * RESET_RATIO` is treated as a counter reset.
pub const RESET_RATIO: f64 = 0.5;

/// Maximum number of readings kept in a device's recent window.
pub const WINDOW_SIZE: usize = 10;

// ============================================================================
// Analytics
// ============================================================================

/// A device is running iff its last reading is newer than this (seconds).
pub const IDLE_THRESHOLD_SECS: f64 = 60.0;

/// A gap longer than this with zero count change ends an uptime run (seconds).
pub const STILLNESS_GAP_SECS: f64 = 30.0;

/// Regression slope (units/s per interval) separating increasing/decreasing from stable.
pub const TREND_SLOPE_THRESHOLD: f64 = 0.01;

/// Per-interval speed (units/s) under which an interval counts as stopped.
pub const STOPPED_SPEED: f64 = 0.01;

/// Target speed for efficiency reporting (units/hour).
pub const TARGET_SPEED_PER_HOUR: f64 = 120.0;

/// Gaps longer than this count as downtime in KPIs (seconds).
pub const DOWNTIME_GAP_SECS: f64 = 300.0;

/// Ideal cycle time per unit used for OEE performance (seconds).
pub const IDEAL_CYCLE_SECS: f64 = 30.0;

// ============================================================================
// Anomaly Evaluator
// ============================================================================

/// Z-score above which a count increment is a statistical outlier.
pub const Z_THRESHOLD: f64 = 3.0;

/// Minimum window readings before the statistical check runs.
pub const ANOMALY_MIN_SAMPLES: usize = 10;

/// Relative floor for the standard deviation (fraction of |mean|).
pub const STD_FLOOR_RATIO: f64 = 0.05;

/// Absolute floor for the standard deviation (units).
pub const STD_FLOOR_ABS: f64 = 0.5;

/// Consecutive-increment change ratio treated as sudden (0.5 = 50 %).
pub const SUDDEN_CHANGE_RATIO: f64 = 0.5;

/// Zero-change gap treated as a stoppage (seconds).
pub const STOPPAGE_SECS: f64 = 600.0;

/// Maximum acceptable error rate (fraction of produced units).
pub const MAX_ERROR_RATE: f64 = 0.05;

/// Minimum acceptable average speed (units/hour).
pub const MIN_SPEED_PER_HOUR: f64 = 50.0;

/// Severity scores for rule-based checks.
pub const SCORE_SUDDEN_CHANGE: f64 = 0.6;
pub const SCORE_STOPPAGE: f64 = 0.8;
pub const SCORE_HIGH_ERROR_RATE: f64 = 0.9;
pub const SCORE_LOW_SPEED: f64 = 0.7;
pub const SCORE_CALIBRATION_DRIFT: f64 = 0.4;

// ============================================================================
// Waste
// ============================================================================

/// Allowed deviation of the percentage sum from 100 % (percentage points).
pub const PERCENT_TOLERANCE_PP: f64 = 0.1;

/// Alert threshold used for any boundary without an explicit one (percent).
pub const DEFAULT_WASTE_ALERT_PERCENT: f64 = 2.0;

/// Kiln boundaries tolerate more loss (percent).
pub const KILN_WASTE_ALERT_PERCENT: f64 = 3.0;

/// Folder holding unground holdover stock.
pub const HOLDOVER_POSITION: &str = "ton-chua-mai";

/// Folder holding the finished-goods classification.
pub const CLASSIFICATION_POSITION: &str = "nhap-kho";

// ============================================================================
// Quota
// ============================================================================

/// Maintenance days deducted from each month's calendar days.
pub const MAINTENANCE_DAYS_PER_MONTH: f64 = 1.5;

// ============================================================================
// Publisher / Sinks
// ============================================================================

/// Timeout for a single publish call (milliseconds).
pub const PUBLISH_TIMEOUT_MS: u64 = 2_000;

/// Expiry for keyed snapshots (seconds).
pub const SNAPSHOT_TTL_SECS: u64 = 300;

/// Capacity of the in-process broadcast channel.
pub const BUS_CAPACITY: usize = 256;

// ============================================================================
// Source Watcher
// ============================================================================

/// Interval between mtime sweeps of the log tree (milliseconds).
pub const WATCH_POLL_MS: u64 = 500;

/// Repeated change events for one source inside this window are dropped (milliseconds).
pub const WATCH_DEBOUNCE_MS: u64 = 1_000;

// ============================================================================
// API
// ============================================================================

/// Default bind address for the snapshot API.
pub const API_ADDR: &str = "0.0.0.0:8080";
