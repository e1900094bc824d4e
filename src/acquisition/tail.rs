//! Incremental (live) ingestion
//!
//! Each source has a byte-offset cursor. A read seeks to the cursor, consumes
//! every complete line up to EOF and advances the cursor past them; a trailing
//! partial line stays unread until its newline arrives. When a file shrinks
//! below its cursor (truncation or rotation) the cursor resets to zero and the
//! file is read as if newly discovered.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::discovery::SourceFile;
use super::log_parser::{parse_readings, ParseStats};
use super::IngestError;
use crate::types::Reading;

/// Result of one incremental read of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    /// Complete new lines, newline-terminated
    pub text: String,
    /// Offset to store for the next read
    pub cursor: u64,
    /// The file was smaller than the previous cursor
    pub truncated: bool,
}

/// Read complete lines appended to `path` since `cursor`.
pub fn ingest_incremental(path: &Path, cursor: u64) -> std::io::Result<Increment> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();

    let (start, truncated) = if len < cursor { (0, true) } else { (cursor, false) };
    if len == start {
        return Ok(Increment {
            text: String::new(),
            cursor: start,
            truncated,
        });
    }

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity(usize::try_from(len - start).unwrap_or(0));
    file.read_to_end(&mut buf)?;

    let complete = buf.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    buf.truncate(complete);
    let text = String::from_utf8_lossy(&buf).into_owned();

    Ok(Increment {
        text,
        cursor: start + complete as u64,
        truncated,
    })
}

/// Per-source cursors, safe to share between the periodic driver and the
/// change notifier.
#[derive(Debug, Default)]
pub struct TailReader {
    cursors: Mutex<HashMap<PathBuf, u64>>,
}

impl TailReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// New readings of `source` since its last read.
    ///
    /// The cursor lock is held across the read, so two concurrent calls for
    /// the same source cannot both consume the same bytes.
    pub fn read_new(&self, source: &SourceFile) -> Result<(Vec<Reading>, ParseStats), IngestError> {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.get(&source.path).copied().unwrap_or(0);

        let inc = ingest_incremental(&source.path, cursor).map_err(|e| IngestError::Read {
            path: source.path.clone(),
            source: e,
        })?;
        if inc.truncated {
            info!(source = %source.key, previous = cursor, "Source shrank, re-reading from start");
        }
        cursors.insert(source.path.clone(), inc.cursor);
        drop(cursors);

        Ok(parse_readings(&inc.text, &source.key.device_id, &source.key.position))
    }

    /// Current cursor of a source (0 when never read).
    pub fn cursor(&self, path: &Path) -> u64 {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Forget every cursor (production date rollover).
    pub fn reset(&self) {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn tracked(&self) -> usize {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
