//! Counter log line parser
//!
//! Devices append one line per sample:
//!
//! ```text
//! [2025-11-21T06:00:01.250Z] Count: 10432
//! ```
//!
//! Anything else is skipped and counted, never fatal to the batch.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::types::Reading;

const LINE_PATTERN: &str =
    r"^\s*\[(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z)\]\s*Count:\s*(\d+)\s*$";

#[allow(clippy::expect_used)]
fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LINE_PATTERN).expect("counter line pattern is a valid regex"))
}

/// Per-source parse bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub lines: usize,
    pub parsed: usize,
    pub skipped: usize,
}

impl ParseStats {
    pub fn absorb(&mut self, other: Self) {
        self.lines += other.lines;
        self.parsed += other.parsed;
        self.skipped += other.skipped;
    }
}

/// Parse one log line into `(timestamp, cumulative count)`.
///
/// The whole line must match; surrounding whitespace is allowed. Returns
/// `None` for blank lines, lines with anything before or after the pattern,
/// unparseable timestamps, and counts that do not fit in `u64`.
pub fn parse_line(line: &str) -> Option<(DateTime<Utc>, u64)> {
    let caps = line_regex().captures(line)?;
    let ts = DateTime::parse_from_rfc3339(caps.get(1)?.as_str())
        .ok()?
        .with_timezone(&Utc);
    let count = caps.get(2)?.as_str().parse::<u64>().ok()?;
    Some((ts, count))
}

/// Parse a block of text into readings for one device, in file order.
pub fn parse_readings(text: &str, device_id: &str, position: &str) -> (Vec<Reading>, ParseStats) {
    let mut stats = ParseStats::default();
    let mut readings = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;
        match parse_line(line) {
            Some((ts, count)) => {
                stats.parsed += 1;
                readings.push(Reading::new(device_id, position, ts, count));
            }
            None => stats.skipped += 1,
        }
    }

    (readings, stats)
}
