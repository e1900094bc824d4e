//! Reading store backed by sled
//!
//! Rows arriving from the datastore collaborator (numeric device id,
//! timestamp, JSON payload) are kept in one sled tree. Keys are
//! `device_id (u32 BE) ++ timestamp nanos (sign-flipped i64 BE)`, so a prefix
//! scan yields one device's rows in time order and re-importing the same row
//! overwrites it instead of duplicating it.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::device_map::DeviceMap;
use crate::types::{Reading, SourceKey};

/// Measurement payload as delivered by the devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPayload {
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
}

/// One datastore row (also the JSON-lines import format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub device_id: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: MeasurementPayload,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("reading store error: {0}")]
    Db(#[from] sled::Error),
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("import I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct ReadingStore {
    db: Arc<sled::Db>,
}

fn ts_key(ts: DateTime<Utc>) -> [u8; 8] {
    let nanos = ts
        .timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp().saturating_mul(1_000_000_000));
    // Flip the sign bit so negative timestamps sort before positive ones
    ((nanos as u64) ^ (1 << 63)).to_be_bytes()
}

fn row_key(device_id: u32, ts: DateTime<Utc>) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&device_id.to_be_bytes());
    key[4..].copy_from_slice(&ts_key(ts));
    key
}

fn key_timestamp(key: &[u8]) -> Option<DateTime<Utc>> {
    let bytes: [u8; 8] = key.get(4..12)?.try_into().ok()?;
    let nanos = (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64;
    Some(Utc.timestamp_nanos(nanos))
}

impl ReadingStore {
    /// Open or create the store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        info!("Reading store opened at {:?}", path_ref);
        Ok(Self { db: Arc::new(db) })
    }

    /// Temporary in-memory store (tests, dry runs).
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn insert(&self, row: &MeasurementRow) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&row.payload)?;
        self.db.insert(row_key(row.device_id, row.timestamp), value)?;
        Ok(())
    }

    /// Insert many rows in one sled batch and flush.
    pub fn insert_batch(&self, rows: &[MeasurementRow]) -> Result<usize, StoreError> {
        let mut batch = sled::Batch::default();
        for row in rows {
            batch.insert(&row_key(row.device_id, row.timestamp)[..], serde_json::to_vec(&row.payload)?);
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(rows.len())
    }

    /// Import newline-delimited JSON rows. Malformed lines are skipped and
    /// counted; returns `(imported, skipped)`.
    pub fn import_jsonl<R: BufRead>(&self, reader: R) -> Result<(usize, usize), StoreError> {
        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MeasurementRow>(&line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    skipped += 1;
                    debug!(line = lineno + 1, error = %e, "Skipping malformed measurement row");
                }
            }
        }
        let imported = self.insert_batch(&rows)?;
        if skipped > 0 {
            warn!(skipped, "Some measurement rows could not be parsed");
        }
        Ok((imported, skipped))
    }

    /// Rows of one device with `from <= timestamp < to`, in time order.
    pub fn range(
        &self,
        device_id: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, MeasurementPayload)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.range(row_key(device_id, from)..row_key(device_id, to)) {
            let (key, value) = item?;
            let Some(ts) = key_timestamp(&key) else {
                continue;
            };
            match serde_json::from_slice::<MeasurementPayload>(&value) {
                Ok(payload) => out.push((ts, payload)),
                Err(e) => warn!(device_id, error = %e, "Corrupt payload in reading store, skipping"),
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

/// Start of `date` in `tz`, as a UTC instant.
///
/// A midnight skipped by a DST jump falls forward to the first hour that
/// exists; a zone without either is read as UTC.
fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + chrono::Duration::hours(1))).earliest())
        .map_or_else(|| Utc.from_utc_datetime(&midnight), |t| t.with_timezone(&Utc))
}

/// `[from, to)` UTC window covering production date `date` in `tz`.
pub fn day_window<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = local_midnight(date, tz);
    let to = date.succ_opt().map_or(from + chrono::Duration::days(1), |next| local_midnight(next, tz));
    (from, to)
}

/// Readings for one production date, drawn from the store for every mapped
/// device with a `store_id`. Devices without rows are simply absent.
///
/// The date follows the local clock, like the dated log directories.
pub fn readings_for_date(
    store: &ReadingStore,
    device_map: &DeviceMap,
    date: NaiveDate,
    line: Option<&str>,
) -> Result<BTreeMap<SourceKey, Vec<Reading>>, StoreError> {
    readings_for_date_in(store, device_map, date, line, &Local)
}

/// [`readings_for_date`] with the production day cut in `tz`.
pub fn readings_for_date_in<Tz: TimeZone>(
    store: &ReadingStore,
    device_map: &DeviceMap,
    date: NaiveDate,
    line: Option<&str>,
    tz: &Tz,
) -> Result<BTreeMap<SourceKey, Vec<Reading>>, StoreError> {
    let (from, to) = day_window(date, tz);

    let mut out = BTreeMap::new();
    for store_id in device_map.store_ids() {
        let Some(key) = device_map.for_store_id(store_id) else {
            continue;
        };
        if line.is_some_and(|l| !l.eq_ignore_ascii_case(&key.line)) {
            continue;
        }
        let rows = store.range(store_id, from, to)?;
        if rows.is_empty() {
            continue;
        }
        let readings = rows
            .into_iter()
            .map(|(ts, p)| Reading {
                device_id: key.device_id.clone(),
                position: key.position.clone(),
                timestamp: ts,
                cumulative_count: p.count,
                error_count: p.error,
            })
            .collect();
        out.insert(key, readings);
    }
    Ok(out)
}
