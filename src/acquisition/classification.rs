//! Finished-goods classification source
//!
//! The warehouse intake folder of a line holds the grade breakdown either as
//! a small JSON table:
//!
//! ```text
//! <line>/nhap-kho/classification.json   {"A1": 9000, "A2": 300, "CL": 120}
//! ```
//!
//! or as one counter log folder per grade (`<line>/nhap-kho/a1/*.txt`),
//! which must be reconciled like any other counter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::discovery::list_log_files;
use super::log_parser::parse_readings;
use crate::types::{GradeBreakdown, Reading};

pub const CLASSIFICATION_FILE: &str = "classification.json";

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("invalid classification table {}: {}", .0.display(), .1)]
    Parse(PathBuf, serde_json::Error),
}

/// Raw grade data for one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationSource {
    /// Final unit counts per grade
    Table(GradeBreakdown),
    /// Cumulative counter readings per grade, time-ordered
    Counters(BTreeMap<String, Vec<Reading>>),
}

/// Load the classification of one line directory, if present.
///
/// The JSON table wins over grade folders when both exist.
pub fn load_classification(
    line_dir: &Path,
    position: &str,
) -> Result<Option<ClassificationSource>, ClassificationError> {
    let dir = line_dir.join(position);
    if !dir.is_dir() {
        return Ok(None);
    }

    let table = dir.join(CLASSIFICATION_FILE);
    if table.is_file() {
        let text = std::fs::read_to_string(&table)
            .map_err(|e| ClassificationError::Io(table.clone(), e))?;
        let raw: BTreeMap<String, u64> =
            serde_json::from_str(&text).map_err(|e| ClassificationError::Parse(table.clone(), e))?;
        let grades = raw
            .into_iter()
            .map(|(grade, units)| (grade.trim().to_uppercase(), units))
            .collect();
        return Ok(Some(ClassificationSource::Table(GradeBreakdown { grades })));
    }

    let mut counters: BTreeMap<String, Vec<Reading>> = BTreeMap::new();
    let entries = std::fs::read_dir(&dir).map_err(|e| ClassificationError::Io(dir.clone(), e))?;
    for entry in entries.flatten() {
        let grade_dir = entry.path();
        if !grade_dir.is_dir() {
            continue;
        }
        let Some(grade) = grade_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let grade = grade.trim().to_uppercase();
        for file in list_log_files(&grade_dir) {
            let text = std::fs::read(&file).map_err(|e| ClassificationError::Io(file.clone(), e))?;
            let (readings, stats) = parse_readings(&String::from_utf8_lossy(&text), &grade, position);
            if stats.skipped > 0 {
                debug!(grade = %grade, skipped = stats.skipped, "Skipped malformed grade lines");
            }
            counters.entry(grade.clone()).or_default().extend(readings);
        }
    }

    if counters.is_empty() {
        return Ok(None);
    }
    for readings in counters.values_mut() {
        readings.sort_by_key(|r| r.timestamp);
    }
    Ok(Some(ClassificationSource::Counters(counters)))
}
