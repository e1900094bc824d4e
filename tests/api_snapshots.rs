//! Snapshot API Tests
//!
//! A computed cycle is published into the in-process bus, then read back
//! over HTTP through the full router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use brickline::acquisition::{date_dir, DeviceMap, FileBatchIngestor, SourceFilter};
use brickline::api::{create_app, ApiState};
use brickline::config::{EngineConfig, PublisherConfig};
use brickline::pipeline::{run_cycle, MemoryBus, MetricsPipeline, Publisher};
use brickline::reconciler::{CounterReconciler, DeviceRegistry};
use chrono::NaiveDate;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 21).unwrap()
}

fn write_counter(root: &Path, rel: &str, counts: &[u64]) {
    let path = date_dir(root, day()).join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let text: String = counts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[2025-11-21T06:00:{:02}.000Z] Count: {c}\n", i * 10))
        .collect();
    fs::write(path, text).unwrap();
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Compute one cycle over a small tree and publish it into a fresh bus.
async fn published_bus(root: &Path) -> Arc<MemoryBus> {
    write_counter(root, "DC1/sau-me/sau-me-01.txt", &[1000, 1050, 40]);
    write_counter(root, "DC1/truoc-ln/truoc-ln-01.txt", &[0, 85]);
    write_counter(root, "DC5/sau-me/sau-me-09.txt", &[0, 10, 20]);

    let mut config = EngineConfig::default_with_tables();
    config.engine.log_root = root.to_path_buf();
    let ingestor = FileBatchIngestor::new(root, SourceFilter::default(), DeviceMap::default());
    let registry = DeviceRegistry::new(CounterReconciler::default(), 10);
    let report = run_cycle(&ingestor, &registry, &MetricsPipeline::new(config), day()).unwrap();

    let bus = Arc::new(MemoryBus::new(16));
    let publisher = Publisher::new("analytics", &PublisherConfig::default()).with_sink(bus.clone());
    let summary = publisher.publish(&report).await;
    assert_eq!(summary.failed, 0);
    bus
}

#[tokio::test]
async fn line_list_summarises_every_published_line() {
    let tmp = tempfile::tempdir().unwrap();
    let app = create_app(ApiState::new(published_bus(tmp.path()).await));

    let (status, body) = get(&app, "/api/v1/lines").await;
    assert_eq!(status, StatusCode::OK);
    let lines = body["data"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["line"], "DC1");
    assert_eq!(lines[0]["total_devices"], 2);
    assert_eq!(lines[0]["total_produced"], 175);
    // 5 lost before the kiln, the remaining 85 never reach an instrumented stage
    assert_eq!(lines[0]["total_waste"], 90);
    assert_eq!(lines[1]["line"], "DC5");
}

#[tokio::test]
async fn line_detail_carries_stages_and_waste() {
    let tmp = tempfile::tempdir().unwrap();
    let app = create_app(ApiState::new(published_bus(tmp.path()).await));

    let (status, body) = get(&app, "/api/v1/lines/dc1").await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["line"], "DC1");
    assert_eq!(data["stages"][0]["stage_name"], "sau-me");
    assert_eq!(data["stages"][0]["combined_total"], 90);
    assert_eq!(data["waste"]["entry_total"], 90);
    assert_eq!(data["waste"]["boundaries"][0]["waste"], 5);
    // Freshly published, default five-minute expiry
    let age = body["freshness"]["snapshot_age_secs"].as_f64().unwrap();
    assert!(age < 5.0, "age {age}");
    assert!(body["freshness"]["expires_in_secs"].as_f64().unwrap() > 290.0);

    let (status, body) = get(&app, "/api/v1/lines/DC7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn aggregate_and_health_reflect_the_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let app = create_app(ApiState::new(published_bus(tmp.path()).await));

    let (status, body) = get(&app, "/api/v1/aggregate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_lines"], 2);
    assert_eq!(body["data"]["total_devices"], 3);

    let (_, health) = get(&app, "/api/v1/health").await;
    assert_eq!(health["data"]["status"], "ok");
    assert_eq!(health["data"]["lines_published"], 2);
    assert_eq!(health["data"]["aggregate_available"], true);
}
