//! Reading acquisition
//!
//! Turns raw counter sources into typed [`Reading`](crate::types::Reading)s:
//! - `log_parser`: the `[timestamp] Count: n` line format
//! - `discovery`: date/line/position layout and whole-file batch reads
//! - `tail`: byte-offset cursors for live incremental reads
//! - `watcher`: polling change notifier with debounce
//! - `store`: sled-backed datastore rows keyed by numeric device id
//! - `classification`: finished-goods grade source
//! - `device_map`: static device → stage overrides
//! - `ingestor`: the batch and live strategies feeding the core

pub mod classification;
pub mod device_map;
pub mod discovery;
pub mod ingestor;
pub mod log_parser;
pub mod store;
pub mod tail;
pub mod watcher;

pub use classification::{load_classification, ClassificationError, ClassificationSource};
pub use device_map::{canonical_device_id, DeviceMap};
pub use discovery::{date_dir, discover_sources, ingest_batch, SourceFile, SourceFilter};
pub use ingestor::{CollectMode, Collected, FileBatchIngestor, Ingestor, StoreBatchIngestor, TailIngestor};
pub use log_parser::{parse_line, parse_readings, ParseStats};
pub use store::{MeasurementPayload, MeasurementRow, ReadingStore, StoreError};
pub use tail::{ingest_incremental, TailReader};
pub use watcher::{SourceEvent, SourceWatcher};

use std::path::PathBuf;

/// Errors raised while reading sources.
///
/// Only `RootUnreadable` is fatal to a run; everything else is isolated to
/// the source it concerns.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("log root {} is not readable: {}", .path.display(), .source)]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
