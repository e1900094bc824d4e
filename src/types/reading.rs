use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One cumulative counter observation from a device.
///
/// Immutable once ingested. Ordering key is `timestamp`; equal timestamps keep
/// their ingestion order (all sorts over readings are stable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Canonical uppercase device token
    pub device_id: String,
    /// Stage/position the device is mounted at
    pub position: String,
    pub timestamp: DateTime<Utc>,
    /// Monotonic-until-reset production counter
    pub cumulative_count: u64,
    /// Cumulative reject counter, when the source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
}

impl Reading {
    pub fn new(
        device_id: impl Into<String>,
        position: impl Into<String>,
        timestamp: DateTime<Utc>,
        cumulative_count: u64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            position: position.into(),
            timestamp,
            cumulative_count,
            error_count: None,
        }
    }

    #[must_use]
    pub const fn with_errors(mut self, error_count: u64) -> Self {
        self.error_count = Some(error_count);
        self
    }
}

/// Where a reading series comes from: one device at one place on one line.
///
/// Several brick-type variants of the same position are distinct keys; the
/// stage aggregator sums them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub line: String,
    pub position: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brick_type: Option<String>,
    pub device_id: String,
}

impl SourceKey {
    pub fn new(
        line: impl Into<String>,
        position: impl Into<String>,
        brick_type: Option<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            line: line.into(),
            position: position.into(),
            brick_type,
            device_id: device_id.into(),
        }
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.brick_type {
            Some(bt) => write!(f, "{}/{}/{}/{}", self.line, bt, self.position, self.device_id),
            None => write!(f, "{}/{}/{}", self.line, self.position, self.device_id),
        }
    }
}
