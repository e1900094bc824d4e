//! Source discovery and whole-file (batch) ingestion
//!
//! Layout under the log root:
//!
//! ```text
//! <root>/<YYYY-MM-DD>/<line>/[<brick_type>/]<position>/<device>[_<stamp>].txt
//! ```
//!
//! Every `.txt` file is one source. The device token is the file stem up to
//! the first `_`, uppercased. A `no-brick-type` folder means "no variant".

use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use super::device_map::{canonical_device_id, DeviceMap};
use super::log_parser::{parse_readings, ParseStats};
use super::IngestError;
use crate::types::{Reading, SourceKey};

/// Folder name standing in for "no brick-type variant".
pub const NO_BRICK_TYPE: &str = "no-brick-type";

/// One discovered counter log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub key: SourceKey,
    pub path: PathBuf,
}

/// Which parts of a date tree are counter sources.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    /// Restrict to these lines (case-insensitive); empty means every line
    pub lines: Vec<String>,
    /// Position folders that are not counter sources (classification)
    pub excluded_positions: Vec<String>,
}

impl SourceFilter {
    pub fn for_line(line: &str) -> Self {
        Self {
            lines: vec![line.to_string()],
            excluded_positions: Vec::new(),
        }
    }

    #[must_use]
    pub fn excluding(mut self, position: impl Into<String>) -> Self {
        self.excluded_positions.push(position.into());
        self
    }

    pub(crate) fn accepts_line(&self, line: &str) -> bool {
        self.lines.is_empty() || self.lines.iter().any(|l| l.eq_ignore_ascii_case(line))
    }

    pub(crate) fn accepts_path(&self, segments: &[String]) -> bool {
        !segments
            .iter()
            .any(|s| self.excluded_positions.iter().any(|p| p.eq_ignore_ascii_case(s)))
    }
}

/// Directory holding one production date.
pub fn date_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("%Y-%m-%d").to_string())
}

/// Derive a source key from a file path relative to its date directory.
///
/// Returns `None` for paths that do not match the layout.
pub fn key_from_path(date_dir: &Path, path: &Path) -> Option<SourceKey> {
    let rel = path.strip_prefix(date_dir).ok()?;
    let segments: Vec<&str> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let (line, brick_type, position, file) = match segments.as_slice() {
        [line, position, file] => (*line, None, *position, *file),
        [line, brick_type, position, file] => (*line, Some(*brick_type), *position, *file),
        _ => return None,
    };

    let stem = Path::new(file).file_stem()?.to_str()?;
    let device = stem.split('_').next().filter(|d| !d.is_empty())?;

    let brick_type = brick_type
        .filter(|bt| !bt.eq_ignore_ascii_case(NO_BRICK_TYPE))
        .map(str::to_string);

    Some(SourceKey::new(line, position, brick_type, canonical_device_id(device)))
}

/// Path segments of `path` below `dir`.
pub(crate) fn relative_segments(dir: &Path, path: &Path) -> Vec<String> {
    path.strip_prefix(dir)
        .map(|rel| {
            rel.components()
                .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Every `.txt` file below `dir`, sorted by path.
pub fn list_log_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            debug!(dir = %current.display(), "Skipping unreadable directory");
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("txt")) {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

/// Check that the log root exists and is a readable directory.
pub fn check_root(root: &Path) -> Result<(), IngestError> {
    std::fs::read_dir(root)
        .map(|_| ())
        .map_err(|source| IngestError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        })
}

/// Discover every counter source for one production date.
///
/// A missing date directory is not an error: it yields no sources and a
/// warning. An unreadable root is.
pub fn discover_sources(
    root: &Path,
    date: NaiveDate,
    filter: &SourceFilter,
    device_map: &DeviceMap,
) -> Result<Vec<SourceFile>, IngestError> {
    check_root(root)?;
    let dir = date_dir(root, date);
    if !dir.is_dir() {
        warn!(date = %date, dir = %dir.display(), "No log directory for date");
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    for path in list_log_files(&dir) {
        let Some(derived) = key_from_path(&dir, &path) else {
            debug!(path = %path.display(), "Path does not match the source layout, skipping");
            continue;
        };
        if !filter.accepts_path(&relative_segments(&dir, &path)) {
            continue;
        }
        let key = device_map.resolve(derived);
        if !filter.accepts_line(&key.line) {
            continue;
        }
        sources.push(SourceFile { key, path });
    }

    debug!(date = %date, count = sources.len(), "Discovered counter sources");
    Ok(sources)
}

/// Read and parse one whole source file.
pub fn ingest_file(source: &SourceFile) -> Result<(Vec<Reading>, ParseStats), IngestError> {
    let bytes = std::fs::read(&source.path).map_err(|e| IngestError::Read {
        path: source.path.clone(),
        source: e,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_readings(&text, &source.key.device_id, &source.key.position))
}

/// Readings of a batch, grouped per source key and time-ordered.
#[derive(Debug, Default)]
pub struct BatchIngest {
    pub readings: BTreeMap<SourceKey, Vec<Reading>>,
    pub stats: BTreeMap<SourceKey, ParseStats>,
    /// Files that could not be read; their devices contribute nothing
    pub failed: Vec<PathBuf>,
}

impl BatchIngest {
    pub fn total_stats(&self) -> ParseStats {
        let mut total = ParseStats::default();
        for s in self.stats.values() {
            total.absorb(*s);
        }
        total
    }
}

/// Read every source in parallel and merge per device.
///
/// Files of the same device are concatenated in path order, then stably
/// sorted by timestamp so ties keep ingestion order.
pub fn ingest_batch(sources: &[SourceFile]) -> BatchIngest {
    let parsed: Vec<(&SourceFile, Result<(Vec<Reading>, ParseStats), IngestError>)> =
        sources.par_iter().map(|s| (s, ingest_file(s))).collect();

    let mut batch = BatchIngest::default();
    for (source, result) in parsed {
        match result {
            Ok((readings, stats)) => {
                if stats.skipped > 0 {
                    debug!(source = %source.key, skipped = stats.skipped, "Skipped malformed lines");
                }
                batch
                    .readings
                    .entry(source.key.clone())
                    .or_default()
                    .extend(readings);
                batch.stats.entry(source.key.clone()).or_default().absorb(stats);
            }
            Err(e) => {
                warn!(error = %e, "Source unreadable, device contributes zero");
                batch.failed.push(source.path.clone());
            }
        }
    }

    for readings in batch.readings.values_mut() {
        readings.sort_by_key(|r| r.timestamp);
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_key_from_path_with_and_without_brick_type() {
        let dir = Path::new("/logs/2025-11-21");
        let k = key_from_path(dir, &dir.join("DC1/sau-me/sau-me-01_20251121T060000.txt")).unwrap();
        assert_eq!(k, SourceKey::new("DC1", "sau-me", None, "SAU-ME-01"));

        let k = key_from_path(dir, &dir.join("DC1/300x600/truoc-ln/truoc-ln-02.txt")).unwrap();
        assert_eq!(k.brick_type.as_deref(), Some("300x600"));
        assert_eq!(k.device_id, "TRUOC-LN-02");

        let k = key_from_path(dir, &dir.join("DC1/no-brick-type/sau-ln/sau-ln-01.txt")).unwrap();
        assert_eq!(k.brick_type, None);

        assert!(key_from_path(dir, &dir.join("DC1/stray.txt")).is_none());
    }

    #[test]
    fn test_discover_missing_root_is_error_missing_date_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 11, 21).unwrap();
        let map = DeviceMap::default();

        let missing = tmp.path().join("nope");
        assert!(matches!(
            discover_sources(&missing, date, &SourceFilter::default(), &map),
            Err(IngestError::RootUnreadable { .. })
        ));

        let found = discover_sources(tmp.path(), date, &SourceFilter::default(), &map).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_discover_filters_lines_and_classification() {
        let tmp = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 11, 21).unwrap();
        let day = date_dir(tmp.path(), date);
        write(&day.join("DC1/sau-me/sau-me-01.txt"), "");
        write(&day.join("DC1/nhap-kho/a1/a1-01.txt"), "");
        write(&day.join("DC2/sau-me/sau-me-01.txt"), "");

        let filter = SourceFilter::for_line("dc1").excluding("nhap-kho");
        let found = discover_sources(tmp.path(), date, &filter, &DeviceMap::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.line, "DC1");
        assert_eq!(found[0].key.position, "sau-me");
    }

    #[test]
    fn test_ingest_batch_concatenates_device_files_in_time_order() {
        let tmp = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 11, 21).unwrap();
        let day = date_dir(tmp.path(), date);
        write(
            &day.join("DC1/sau-me/sau-me-01_20251121T060000.txt"),
            "[2025-11-21T06:00:00.000Z] Count: 100\n[2025-11-21T06:00:10.000Z] Count: 110\n",
        );
        write(
            &day.join("DC1/sau-me/sau-me-01_20251121T120000.txt"),
            "[2025-11-21T12:00:00.000Z] Count: 5\nnot a reading\n",
        );

        let sources = discover_sources(tmp.path(), date, &SourceFilter::default(), &DeviceMap::default()).unwrap();
        assert_eq!(sources.len(), 2);
        let batch = ingest_batch(&sources);
        assert_eq!(batch.readings.len(), 1);
        let readings = batch.readings.values().next().unwrap();
        let counts: Vec<u64> = readings.iter().map(|r| r.cumulative_count).collect();
        assert_eq!(counts, vec![100, 110, 5]);
        assert_eq!(batch.total_stats().skipped, 1);
    }
}
