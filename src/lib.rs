//! Brickline: production counter reconciliation for tile/brick lines
//!
//! Turns cumulative device counters into trustworthy production totals,
//! stage-to-stage waste and live line metrics.
//!
//! ## Architecture
//!
//! - **Acquisition**: log-line parsing, path discovery, tail cursors, reading store
//! - **Reconciler**: reset-aware counter deltas and bounded per-device windows
//! - **Aggregation**: stage totals, waste/percentage view, quota comparison
//! - **Analytics**: speed, trend, uptime, KPIs/OEE, line rollups
//! - **Anomaly**: statistical and rule-based per-cycle checks
//! - **Pipeline**: live/polling scheduler, publisher, metrics sinks

pub mod acquisition;
pub mod aggregation;
pub mod analytics;
pub mod anomaly;
pub mod api;
pub mod config;
pub mod pipeline;
pub mod reconciler;
pub mod report;
pub mod types;

pub use config::EngineConfig;

pub use types::{
    AggregateMetrics, AnomalyRecord, AnomalyType, DeviceMetrics, LineMetrics, Reading, SourceKey, StageTotals, Trend,
    WasteMetrics,
};

pub use reconciler::{CounterReconciler, DeviceRegistry, DeviceState, Reconciliation};

pub use pipeline::{CycleReport, Engine, MetricsPipeline};
