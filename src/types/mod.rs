//! Shared data structures for production counter reconciliation
//!
//! - `Reading` / `SourceKey`: ingested counter observations and their origin
//! - `StageTotals` / `WasteMetrics`: per-stage production and the loss view
//! - `DeviceMetrics` / `LineMetrics`: sliding-window live telemetry
//! - `AnomalyRecord`: per-cycle anomaly verdicts

mod anomaly;
mod metrics;
mod reading;
mod stage;

pub use anomaly::*;
pub use metrics::*;
pub use reading::*;
pub use stage::*;
