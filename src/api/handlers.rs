//! Snapshot endpoint handlers
//!
//! Everything served here is read from the in-process snapshot store the
//! publisher writes each cycle; expired snapshots are treated as absent.

use axum::extract::{Path, State};
use axum::response::Response;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::envelope::{self, Freshness};
use crate::pipeline::publisher::{line_key, AGGREGATE_KEY, LINE_KEY_PREFIX};
use crate::pipeline::{LineSnapshot, MemoryBus};

#[derive(Clone)]
pub struct ApiState {
    pub bus: Arc<MemoryBus>,
    pub started: Instant,
}

impl ApiState {
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self {
            bus,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub lines_published: usize,
    pub aggregate_available: bool,
}

/// Short per-line view for the line list.
#[derive(Debug, Serialize)]
pub struct LineSummary {
    pub line: String,
    pub total_devices: usize,
    pub running_devices: usize,
    pub total_produced: u64,
    pub total_waste: u64,
    pub anomaly: bool,
    pub anomaly_score: f64,
}

impl From<&LineSnapshot> for LineSummary {
    fn from(s: &LineSnapshot) -> Self {
        let score = s
            .devices
            .iter()
            .map(|d| d.anomaly.score)
            .fold(s.anomaly.score, f64::max);
        Self {
            line: s.line.clone(),
            total_devices: s.metrics.total_devices,
            running_devices: s.metrics.running_devices,
            total_produced: s.metrics.total_produced,
            total_waste: s.waste.total_waste(),
            anomaly: s.has_anomaly(),
            anomaly_score: score,
        }
    }
}

/// GET /api/v1/health
pub async fn get_health(State(state): State<ApiState>) -> Response {
    let lines = state.bus.keys(LINE_KEY_PREFIX).await;
    let aggregate = state.bus.get_entry(AGGREGATE_KEY).await;
    let freshness = Freshness::of(aggregate.as_ref());
    envelope::ok(
        HealthResponse {
            status: "ok",
            uptime_secs: state.started.elapsed().as_secs(),
            lines_published: lines.len(),
            aggregate_available: aggregate.is_some(),
        },
        freshness,
    )
}

/// GET /api/v1/lines
pub async fn list_lines(State(state): State<ApiState>) -> Response {
    let mut summaries = Vec::new();
    let mut used = Vec::new();
    for key in state.bus.keys(LINE_KEY_PREFIX).await {
        let Some(entry) = state.bus.get_entry(&key).await else {
            continue;
        };
        match serde_json::from_value::<LineSnapshot>(entry.payload.clone()) {
            Ok(snapshot) => {
                summaries.push(LineSummary::from(&snapshot));
                used.push(entry);
            }
            Err(e) => debug!(key = %key, error = %e, "Skipping undecodable line snapshot"),
        }
    }
    envelope::ok(summaries, Freshness::of(&used))
}

/// GET /api/v1/lines/:line
pub async fn get_line(State(state): State<ApiState>, Path(line): Path<String>) -> Response {
    if let Some(entry) = state.bus.get_entry(&line_key(&line)).await {
        return envelope::snapshot(entry);
    }
    // Line names in paths are matched case-insensitively
    for key in state.bus.keys(LINE_KEY_PREFIX).await {
        let name = &key[LINE_KEY_PREFIX.len()..];
        if name.eq_ignore_ascii_case(&line) {
            if let Some(entry) = state.bus.get_entry(&key).await {
                return envelope::snapshot(entry);
            }
        }
    }
    envelope::not_found(format!("no current snapshot for line {line}"))
}

/// GET /api/v1/aggregate
pub async fn get_aggregate(State(state): State<ApiState>) -> Response {
    match state.bus.get_entry(AGGREGATE_KEY).await {
        Some(entry) => envelope::snapshot(entry),
        None => envelope::no_cycle_yet("no cycle has been published yet"),
    }
}
