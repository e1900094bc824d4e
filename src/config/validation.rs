//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! The raw TOML is walked before serde sees it; every key that is not part of
//! [`super::EngineConfig`] produces a warning with a "did you mean?" hint.
//! Warnings never stop a config from loading.

use std::collections::HashSet;

/// A non-fatal config warning (typo, unknown section).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Tables whose child keys are user-chosen names.
///
/// Children are normalised to `*` before lookup, so `quota.600x600.tile_area_m2`
/// is checked as `quota.*.tile_area_m2`.
const OPEN_TABLES: &[&str] = &["quota", "analytics.target_speeds"];

/// Returns the complete set of valid dotted key paths for `EngineConfig`.
///
/// Array-of-table entries (`[[lines]]`, `[[devices]]`) are listed by their
/// field names directly under the array key.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [engine]
        "engine",
        "engine.log_root",
        "engine.data_dir",
        "engine.mode",
        "engine.interval_secs",
        "engine.namespace",
        "engine.lines",
        // [reconciler]
        "reconciler",
        "reconciler.reset_ratio",
        "reconciler.window_size",
        // [analytics]
        "analytics",
        "analytics.idle_threshold_secs",
        "analytics.stillness_gap_secs",
        "analytics.trend_slope_threshold",
        "analytics.stopped_speed",
        "analytics.downtime_gap_secs",
        "analytics.ideal_cycle_secs",
        "analytics.target_speed_per_hour",
        "analytics.target_speeds",
        "analytics.target_speeds.*",
        // [anomaly]
        "anomaly",
        "anomaly.z_threshold",
        "anomaly.min_samples",
        "anomaly.std_floor_ratio",
        "anomaly.std_floor_abs",
        "anomaly.sudden_change_ratio",
        "anomaly.stoppage_secs",
        "anomaly.max_error_rate",
        "anomaly.min_speed_per_hour",
        "anomaly.scores",
        "anomaly.scores.sudden_change",
        "anomaly.scores.stoppage",
        "anomaly.scores.high_error_rate",
        "anomaly.scores.low_speed",
        "anomaly.scores.calibration_drift",
        // [waste]
        "waste",
        "waste.tolerance_pp",
        "waste.holdover_position",
        "waste.classification_position",
        // [publisher]
        "publisher",
        "publisher.timeout_ms",
        "publisher.snapshot_ttl_secs",
        "publisher.bus_capacity",
        "publisher.webhook_url",
        // [watcher]
        "watcher",
        "watcher.poll_ms",
        "watcher.debounce_ms",
        // [api]
        "api",
        "api.enabled",
        "api.addr",
        // [[lines]]
        "lines",
        "lines.name",
        "lines.layout",
        "lines.stages",
        "lines.alert_thresholds_percent",
        "lines.product",
        "lines.holdover_after",
        // [[devices]]
        "devices",
        "devices.id",
        "devices.line",
        "devices.position",
        "devices.brick_type",
        "devices.store_id",
        // [quota.<product>]
        "quota",
        "quota.*",
        "quota.*.tile_area_m2",
        "quota.*.monthly_quota_30",
        "quota.*.monthly_quota_31",
        "quota.*.cycle_minutes",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// Arrays of tables contribute their entries' keys under the array's path,
/// so `[[lines]] name = "DC1"` yields `lines` and `lines.name`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        keys.extend(walk_toml_keys(item, &path));
                    }
                }
                _ => {}
            }
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

/// Replace user-chosen segments under [`OPEN_TABLES`] with `*`.
fn normalise_key(key: &str) -> String {
    for open in OPEN_TABLES {
        if let Some(rest) = key.strip_prefix(open).and_then(|r| r.strip_prefix('.')) {
            let mut parts = rest.splitn(2, '.');
            let _name = parts.next();
            return match parts.next() {
                Some(tail) => format!("{open}.*.{tail}"),
                None => format!("{open}.*"),
            };
        }
    }
    key.to_string()
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .filter(|k| !k.contains('*'))
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Parse errors are left to serde, which reports them with line numbers.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(normalise_key(key).as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}
