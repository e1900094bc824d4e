//! Ingestion strategies
//!
//! The reconciliation core is fed by exactly one interface. Batch strategies
//! return a day's complete reading set (replace device state); the tail
//! strategy returns only readings appended since the previous call (extend
//! device state). Both hand the same `Reading` values to the same core.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::device_map::DeviceMap;
use super::discovery::{
    date_dir, discover_sources, ingest_batch, key_from_path, relative_segments, SourceFile, SourceFilter,
};
use super::log_parser::ParseStats;
use super::store::{readings_for_date, ReadingStore};
use super::tail::TailReader;
use super::IngestError;
use crate::types::{Reading, SourceKey};

/// Whether collected readings replace or extend current device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Replace,
    Append,
}

/// Readings gathered for one cycle.
#[derive(Debug)]
pub struct Collected {
    pub mode: CollectMode,
    pub readings: BTreeMap<SourceKey, Vec<Reading>>,
    /// Every source seen this cycle, including ones with no new readings
    pub sources: Vec<SourceKey>,
    pub stats: ParseStats,
    pub failed_sources: usize,
}

/// A way of turning raw sources into readings.
pub trait Ingestor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Gather the readings for `date`.
    fn collect(&self, date: NaiveDate) -> Result<Collected, IngestError>;
}

// ============================================================================
// Log files, whole-day
// ============================================================================

/// Full re-read of every log file of a date.
pub struct FileBatchIngestor {
    root: PathBuf,
    filter: SourceFilter,
    device_map: DeviceMap,
}

impl FileBatchIngestor {
    pub fn new(root: impl Into<PathBuf>, filter: SourceFilter, device_map: DeviceMap) -> Self {
        Self {
            root: root.into(),
            filter,
            device_map,
        }
    }
}

impl Ingestor for FileBatchIngestor {
    fn name(&self) -> &'static str {
        "log-files"
    }

    fn collect(&self, date: NaiveDate) -> Result<Collected, IngestError> {
        let sources = discover_sources(&self.root, date, &self.filter, &self.device_map)?;
        let batch = ingest_batch(&sources);
        let stats = batch.total_stats();
        let mut keys: Vec<SourceKey> = sources.into_iter().map(|s| s.key).collect();
        keys.sort();
        keys.dedup();
        Ok(Collected {
            mode: CollectMode::Replace,
            sources: keys,
            stats,
            failed_sources: batch.failed.len(),
            readings: batch.readings,
        })
    }
}

// ============================================================================
// Datastore, whole-day
// ============================================================================

/// Full re-read of a date from the reading store.
pub struct StoreBatchIngestor {
    store: ReadingStore,
    device_map: DeviceMap,
    line: Option<String>,
}

impl StoreBatchIngestor {
    pub fn new(store: ReadingStore, device_map: DeviceMap, line: Option<String>) -> Self {
        Self {
            store,
            device_map,
            line,
        }
    }
}

impl Ingestor for StoreBatchIngestor {
    fn name(&self) -> &'static str {
        "reading-store"
    }

    fn collect(&self, date: NaiveDate) -> Result<Collected, IngestError> {
        let readings = readings_for_date(&self.store, &self.device_map, date, self.line.as_deref())?;
        let parsed = readings.values().map(Vec::len).sum();
        Ok(Collected {
            mode: CollectMode::Replace,
            sources: readings.keys().cloned().collect(),
            stats: ParseStats {
                lines: parsed,
                parsed,
                skipped: 0,
            },
            failed_sources: 0,
            readings,
        })
    }
}

// ============================================================================
// Log files, incremental
// ============================================================================

/// Tails every log file of a date, returning only appended readings.
pub struct TailIngestor {
    root: PathBuf,
    filter: SourceFilter,
    device_map: DeviceMap,
    tail: TailReader,
}

impl TailIngestor {
    pub fn new(root: impl Into<PathBuf>, filter: SourceFilter, device_map: DeviceMap) -> Self {
        Self {
            root: root.into(),
            filter,
            device_map,
            tail: TailReader::new(),
        }
    }

    /// Forget every cursor (production date rollover).
    pub fn reset(&self) {
        self.tail.reset();
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read only the given paths (change notifications).
    ///
    /// Paths outside the date directory or the layout are ignored.
    pub fn collect_paths(&self, date: NaiveDate, paths: &[PathBuf]) -> Collected {
        let dir = date_dir(&self.root, date);
        let sources: Vec<SourceFile> = paths
            .iter()
            .filter(|p| self.filter.accepts_path(&relative_segments(&dir, p)))
            .filter_map(|p| {
                let key = self.device_map.resolve(key_from_path(&dir, p)?);
                Some(SourceFile { key, path: p.clone() })
            })
            .filter(|s| self.filter.accepts_line(&s.key.line))
            .collect();
        self.read_sources(&sources)
    }

    fn read_sources(&self, sources: &[SourceFile]) -> Collected {
        let mut out = Collected {
            mode: CollectMode::Append,
            readings: BTreeMap::new(),
            sources: Vec::with_capacity(sources.len()),
            stats: ParseStats::default(),
            failed_sources: 0,
        };
        for source in sources {
            out.sources.push(source.key.clone());
            match self.tail.read_new(source) {
                Ok((readings, stats)) => {
                    out.stats.absorb(stats);
                    if !readings.is_empty() {
                        out.readings.entry(source.key.clone()).or_default().extend(readings);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Tail read failed, will retry next cycle");
                    out.failed_sources += 1;
                }
            }
        }
        out.sources.sort();
        out.sources.dedup();
        debug!(
            sources = out.sources.len(),
            readings = out.readings.values().map(Vec::len).sum::<usize>(),
            "Tail read complete"
        );
        out
    }
}

impl Ingestor for TailIngestor {
    fn name(&self) -> &'static str {
        "log-tail"
    }

    fn collect(&self, date: NaiveDate) -> Result<Collected, IngestError> {
        let sources = discover_sources(&self.root, date, &self.filter, &self.device_map)?;
        Ok(self.read_sources(&sources))
    }
}
