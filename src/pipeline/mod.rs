//! Metrics Pipeline Module
//!
//! ## Cycle
//!
//! ```text
//! Ingestor (tail | batch)  ->  DeviceRegistry (reconcile, bounded window)
//!                          ->  MetricsPipeline (stages, waste, analytics, anomalies)
//!                          ->  Publisher (line channels, snapshot keys, aggregate)
//! ```
//!
//! Live and polling modes differ only in the ingestor; everything after the
//! registry is shared, including on-demand batch analysis.

mod cycle;
pub mod publisher;
pub mod scheduler;
pub mod sink;

pub use cycle::{absorb, load_line_grades, CycleReport, LineSnapshot, MetricsPipeline};
pub use publisher::{PublishSummary, Publisher};
pub use scheduler::{run_cycle, CycleSource, Engine, EngineStats};
pub use sink::{BusMessage, MemoryBus, MetricsSink, SinkError, StoredSnapshot, WebhookSink};
