//! Engine Configuration - every heuristic of the metrics engine as a TOML value
//!
//! Each section implements `Default` with the values from [`super::defaults`],
//! so a missing or partial file behaves exactly like the built-in engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "BRICKLINE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "brickline.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one factory deployment.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$BRICKLINE_CONFIG` env var
/// 2. `./brickline.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log root, cadence, run mode
    #[serde(default)]
    pub engine: EngineSection,

    /// Counter reconciliation parameters
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Sliding-window analytics thresholds
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Anomaly evaluator thresholds and scores
    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// Waste view settings
    #[serde(default)]
    pub waste: WasteConfig,

    /// Publish timeouts, snapshot expiry, webhook
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Live-mode source watcher
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Read-only snapshot API
    #[serde(default)]
    pub api: ApiConfig,

    /// Per-line stage layouts
    #[serde(default = "default_lines")]
    pub lines: Vec<LineConfig>,

    /// Static device map overriding path-derived metadata
    #[serde(default)]
    pub devices: Vec<DeviceMapping>,

    /// Monthly quota targets keyed by product
    #[serde(default = "default_quota")]
    pub quota: BTreeMap<String, QuotaTarget>,
}

impl EngineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$BRICKLINE_CONFIG` environment variable
    /// 2. `./brickline.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), lines = config.lines.len(), "Loaded engine config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default_with_tables()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document, logging unknown keys as warnings.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults including the built-in line and quota tables.
    ///
    /// `Default::default()` leaves both tables empty; serde fills them through
    /// their `default = ...` attributes.
    pub fn default_with_tables() -> Self {
        Self {
            lines: default_lines(),
            quota: default_quota(),
            ..Self::default()
        }
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject impossible values. Suspicious-but-legal values are only warned about.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let r = &self.reconciler;
        if !(r.reset_ratio > 0.0 && r.reset_ratio <= 1.0) {
            errors.push(format!(
                "reconciler.reset_ratio ({}) must be in (0, 1]",
                r.reset_ratio
            ));
        }
        if r.window_size < 2 {
            errors.push(format!(
                "reconciler.window_size ({}) must be at least 2",
                r.window_size
            ));
        } else if r.window_size < self.anomaly.min_samples {
            // The outlier check never sees enough samples otherwise
            errors.push(format!(
                "reconciler.window_size ({}) must be at least anomaly.min_samples ({})",
                r.window_size, self.anomaly.min_samples
            ));
        }

        if self.engine.interval_secs == 0 {
            errors.push("engine.interval_secs must be greater than 0".to_string());
        }
        if self.engine.namespace.trim().is_empty() {
            errors.push("engine.namespace must not be empty".to_string());
        }

        let a = &self.analytics;
        for (name, value) in [
            ("analytics.idle_threshold_secs", a.idle_threshold_secs),
            ("analytics.stillness_gap_secs", a.stillness_gap_secs),
            ("analytics.downtime_gap_secs", a.downtime_gap_secs),
            ("analytics.ideal_cycle_secs", a.ideal_cycle_secs),
            ("anomaly.z_threshold", self.anomaly.z_threshold),
            ("anomaly.stoppage_secs", self.anomaly.stoppage_secs),
            ("anomaly.sudden_change_ratio", self.anomaly.sudden_change_ratio),
        ] {
            if value <= 0.0 || !value.is_finite() {
                errors.push(format!("{name} ({value}) must be a positive number"));
            }
        }
        if !(a.target_speed_per_hour >= 0.0 && a.target_speed_per_hour.is_finite()) {
            errors.push(format!(
                "analytics.target_speed_per_hour ({}) must be a finite number >= 0 (0 disables efficiency)",
                a.target_speed_per_hour
            ));
        }
        for (position, target) in &a.target_speeds {
            if !(*target >= 0.0 && target.is_finite()) {
                errors.push(format!(
                    "analytics.target_speeds.{position} ({target}) must be a finite number >= 0"
                ));
            }
        }
        if a.trend_slope_threshold < 0.0 {
            errors.push("analytics.trend_slope_threshold must not be negative".to_string());
        }

        let an = &self.anomaly;
        if !(0.0..=1.0).contains(&an.max_error_rate) {
            errors.push(format!(
                "anomaly.max_error_rate ({}) must be a fraction in [0, 1]",
                an.max_error_rate
            ));
        }
        for (name, score) in [
            ("anomaly.scores.sudden_change", an.scores.sudden_change),
            ("anomaly.scores.stoppage", an.scores.stoppage),
            ("anomaly.scores.high_error_rate", an.scores.high_error_rate),
            ("anomaly.scores.low_speed", an.scores.low_speed),
            ("anomaly.scores.calibration_drift", an.scores.calibration_drift),
        ] {
            if !(0.0..=1.0).contains(&score) {
                errors.push(format!("{name} ({score}) must be in [0, 1]"));
            }
        }

        if self.waste.tolerance_pp < 0.0 {
            errors.push("waste.tolerance_pp must not be negative".to_string());
        }

        for line in &self.lines {
            if line.name.trim().is_empty() {
                errors.push("lines[].name must not be empty".to_string());
            }
            if let Some(stages) = &line.stages {
                if stages.len() < 2 {
                    errors.push(format!(
                        "lines.{}: a custom layout needs at least 2 stages",
                        line.name
                    ));
                }
            }
        }

        for device in &self.devices {
            if device.id.trim().is_empty() || device.line.trim().is_empty() {
                errors.push("devices[]: id and line are required".to_string());
            }
        }

        for (product, q) in &self.quota {
            if q.tile_area_m2 <= 0.0 {
                errors.push(format!("quota.{product}.tile_area_m2 must be positive"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Layout settings for a line, if it is configured.
    pub fn line(&self, name: &str) -> Option<&LineConfig> {
        self.lines.iter().find(|l| l.name.eq_ignore_ascii_case(name))
    }
}

/// Config loading / validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            Self::Parse(path, e) => write!(f, "Config parse error ({}): {}", path.display(), e),
            Self::Serialize(e) => write!(f, "Config serialization error: {e}"),
            Self::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Engine Section
// ============================================================================

/// How new readings are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Tail sources and react to change notifications.
    #[default]
    Live,
    /// Recompute everything from scratch on each tick.
    Polling,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Root of the `<date>/<line>/...` log tree
    pub log_root: PathBuf,
    /// sled directory for imported datastore rows
    pub data_dir: PathBuf,
    pub mode: RunMode,
    /// Cycle interval (seconds)
    pub interval_secs: u64,
    /// Publish namespace (`<namespace>:line:<line>`)
    pub namespace: String,
    /// Restrict live/polling runs to these lines (empty = all discovered)
    pub lines: Vec<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from(defaults::LOG_ROOT),
            data_dir: PathBuf::from(defaults::DATA_DIR),
            mode: RunMode::Live,
            interval_secs: defaults::CYCLE_INTERVAL_SECS,
            namespace: defaults::NAMESPACE.to_string(),
            lines: Vec::new(),
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// `current < previous * reset_ratio` is treated as a counter reset
    pub reset_ratio: f64,
    /// Bounded recent-window length per device
    pub window_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reset_ratio: defaults::RESET_RATIO,
            window_size: defaults::WINDOW_SIZE,
        }
    }
}

// ============================================================================
// Analytics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub idle_threshold_secs: f64,
    pub stillness_gap_secs: f64,
    /// Slope of per-interval speed (units/s per step)
    pub trend_slope_threshold: f64,
    /// Per-interval speed (units/s) below which the interval is stopped
    pub stopped_speed: f64,
    pub downtime_gap_secs: f64,
    pub ideal_cycle_secs: f64,
    /// Default efficiency target (units/hour)
    pub target_speed_per_hour: f64,
    /// Per-position efficiency targets (units/hour)
    pub target_speeds: BTreeMap<String, f64>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: defaults::IDLE_THRESHOLD_SECS,
            stillness_gap_secs: defaults::STILLNESS_GAP_SECS,
            trend_slope_threshold: defaults::TREND_SLOPE_THRESHOLD,
            stopped_speed: defaults::STOPPED_SPEED,
            downtime_gap_secs: defaults::DOWNTIME_GAP_SECS,
            ideal_cycle_secs: defaults::IDEAL_CYCLE_SECS,
            target_speed_per_hour: defaults::TARGET_SPEED_PER_HOUR,
            target_speeds: BTreeMap::new(),
        }
    }
}

impl AnalyticsConfig {
    /// Efficiency target for a position; `None` disables efficiency reporting.
    pub fn target_for(&self, position: &str) -> Option<f64> {
        let target = self
            .target_speeds
            .get(position)
            .copied()
            .unwrap_or(self.target_speed_per_hour);
        (target > 0.0).then_some(target)
    }
}

// ============================================================================
// Anomaly
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub z_threshold: f64,
    /// Minimum window readings before the z-score check runs
    pub min_samples: usize,
    pub std_floor_ratio: f64,
    pub std_floor_abs: f64,
    pub sudden_change_ratio: f64,
    pub stoppage_secs: f64,
    pub max_error_rate: f64,
    pub min_speed_per_hour: f64,
    pub scores: AnomalyScores,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            z_threshold: defaults::Z_THRESHOLD,
            min_samples: defaults::ANOMALY_MIN_SAMPLES,
            std_floor_ratio: defaults::STD_FLOOR_RATIO,
            std_floor_abs: defaults::STD_FLOOR_ABS,
            sudden_change_ratio: defaults::SUDDEN_CHANGE_RATIO,
            stoppage_secs: defaults::STOPPAGE_SECS,
            max_error_rate: defaults::MAX_ERROR_RATE,
            min_speed_per_hour: defaults::MIN_SPEED_PER_HOUR,
            scores: AnomalyScores::default(),
        }
    }
}

/// Fixed severity of each rule-based check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyScores {
    pub sudden_change: f64,
    pub stoppage: f64,
    pub high_error_rate: f64,
    pub low_speed: f64,
    pub calibration_drift: f64,
}

impl Default for AnomalyScores {
    fn default() -> Self {
        Self {
            sudden_change: defaults::SCORE_SUDDEN_CHANGE,
            stoppage: defaults::SCORE_STOPPAGE,
            high_error_rate: defaults::SCORE_HIGH_ERROR_RATE,
            low_speed: defaults::SCORE_LOW_SPEED,
            calibration_drift: defaults::SCORE_CALIBRATION_DRIFT,
        }
    }
}

// ============================================================================
// Waste
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WasteConfig {
    /// Allowed deviation of the bucket sum from 100 % (percentage points)
    pub tolerance_pp: f64,
    /// Position folder holding holdover (unground) stock
    pub holdover_position: String,
    /// Position folder holding the grade classification
    pub classification_position: String,
}

impl Default for WasteConfig {
    fn default() -> Self {
        Self {
            tolerance_pp: defaults::PERCENT_TOLERANCE_PP,
            holdover_position: defaults::HOLDOVER_POSITION.to_string(),
            classification_position: defaults::CLASSIFICATION_POSITION.to_string(),
        }
    }
}

// ============================================================================
// Lines
// ============================================================================

/// Built-in stage sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[default]
    Standard,
    DoubleFiring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    pub name: String,
    #[serde(default)]
    pub layout: LayoutKind,
    /// Explicit stage order; overrides `layout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<String>>,
    /// Alert threshold per boundary (percent of entry), in stage order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_thresholds_percent: Option<Vec<f64>>,
    /// Product key into `[quota]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Stage after which holdover stock is subtracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holdover_after: Option<String>,
}

fn default_lines() -> Vec<LineConfig> {
    vec![LineConfig {
        name: "DC5".to_string(),
        layout: LayoutKind::DoubleFiring,
        stages: None,
        alert_thresholds_percent: None,
        product: None,
        holdover_after: None,
    }]
}

// ============================================================================
// Devices
// ============================================================================

/// Static mapping of a canonical device id to its place in the factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub id: String,
    pub line: String,
    pub position: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brick_type: Option<String>,
    /// Numeric id used by the datastore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<u32>,
}

// ============================================================================
// Quota
// ============================================================================

/// Monthly production quota for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaTarget {
    /// Area of a single tile (m²)
    pub tile_area_m2: f64,
    /// Monthly quota for months with 30 or fewer days (m²)
    pub monthly_quota_30: f64,
    /// Monthly quota for 31-day months (m²)
    pub monthly_quota_31: f64,
    /// Kiln cycle (minutes), informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_minutes: Option<f64>,
}

fn default_quota() -> BTreeMap<String, QuotaTarget> {
    let table = [
        ("300x600", 0.18, 273_300.0, 282_900.0, 50.0),
        ("400x800", 0.32, 320_900.0, 332_200.0, 48.0),
        ("600x600", 0.36, 355_700.0, 368_200.0, 44.0),
        ("800x800", 0.64, 359_100.0, 371_700.0, 44.0),
        ("500x500", 0.25, 461_100.0, 477_300.0, 43.0),
    ];
    table
        .into_iter()
        .map(|(product, area, q30, q31, cycle)| {
            (
                product.to_string(),
                QuotaTarget {
                    tile_area_m2: area,
                    monthly_quota_30: q30,
                    monthly_quota_31: q31,
                    cycle_minutes: Some(cycle),
                },
            )
        })
        .collect()
}

// ============================================================================
// Publisher / Watcher / API
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Timeout per publish call (ms)
    pub timeout_ms: u64,
    /// Expiry of keyed snapshots (s)
    pub snapshot_ttl_secs: u64,
    pub bus_capacity: usize,
    /// Optional HTTP endpoint receiving every publish as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::PUBLISH_TIMEOUT_MS,
            snapshot_ttl_secs: defaults::SNAPSHOT_TTL_SECS,
            bus_capacity: defaults::BUS_CAPACITY,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_ms: u64,
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_ms: defaults::WATCH_POLL_MS,
            debounce_ms: defaults::WATCH_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: defaults::API_ADDR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = EngineConfig::default_with_tables();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: EngineConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.reconciler.reset_ratio, 0.5);
        assert_eq!(config.reconciler.window_size, 10);
        assert_eq!(config.analytics.idle_threshold_secs, 60.0);
        assert_eq!(config.anomaly.stoppage_secs, 600.0);
        assert_eq!(config.engine.namespace, "analytics");
        assert_eq!(config.quota.len(), 5);
        assert!(config.line("dc5").is_some());
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[engine]
log_root = "/srv/counters"
mode = "polling"

[reconciler]
reset_ratio = 0.3

[[lines]]
name = "DC1"
stages = ["sau-me", "truoc-ln", "sau-ln"]
product = "600x600"
"#;
        let config: EngineConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.engine.mode, RunMode::Polling);
        assert_eq!(config.engine.log_root, PathBuf::from("/srv/counters"));
        assert_eq!(config.reconciler.reset_ratio, 0.3);
        assert_eq!(config.reconciler.window_size, 10);
        // An explicit [[lines]] table replaces the built-in one
        assert!(config.line("DC5").is_none());
        assert_eq!(config.line("dc1").and_then(|l| l.product.as_deref()), Some("600x600"));
    }

    #[test]
    fn test_validation_rejects_bad_reset_ratio() {
        let mut config = EngineConfig::default_with_tables();
        config.reconciler.reset_ratio = 1.5;
        let result = config.validate();
        assert!(result.is_err());
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("reset_ratio")));
        }
    }

    #[test]
    fn test_validation_rejects_tiny_window_and_zero_interval() {
        let mut config = EngineConfig::default_with_tables();
        config.reconciler.window_size = 1;
        config.engine.interval_secs = 0;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_target_for_position_override() {
        let mut analytics = AnalyticsConfig::default();
        analytics.target_speeds.insert("sau-ln".to_string(), 300.0);
        assert_eq!(analytics.target_for("sau-ln"), Some(300.0));
        assert_eq!(analytics.target_for("sau-me"), Some(120.0));
        analytics.target_speed_per_hour = 0.0;
        assert_eq!(analytics.target_for("sau-me"), None);
    }

    #[test]
    fn test_roundtrip_toml() {
        let original = EngineConfig::default_with_tables();
        let toml_str = original.to_toml().expect("serialization should work");
        let parsed: EngineConfig = toml::from_str(&toml_str).expect("deserialization should work");
        assert_eq!(parsed.lines.len(), original.lines.len());
        assert_eq!(parsed.quota.get("300x600"), original.quota.get("300x600"));
    }
}
