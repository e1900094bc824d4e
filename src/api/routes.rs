//! API route definitions
//!
//! - /api/v1/health - process liveness and publish status
//! - /api/v1/lines - summary of every line with a current snapshot
//! - /api/v1/lines/:line - full snapshot of one line
//! - /api/v1/aggregate - factory-wide summary

use axum::routing::get;
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/lines", get(handlers::list_lines))
        .route("/lines/:line", get(handlers::get_line))
        .route("/aggregate", get(handlers::get_aggregate))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::publisher::{line_key, AGGREGATE_KEY};
    use crate::pipeline::{MemoryBus, MetricsSink};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_before_first_cycle() {
        let bus = Arc::new(MemoryBus::new(4));
        let (status, body) = get(api_routes(ApiState::new(bus)), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["lines_published"], 0);
        assert_eq!(body["data"]["aggregate_available"], false);
    }

    #[tokio::test]
    async fn test_aggregate_unavailable_then_served() {
        let bus = Arc::new(MemoryBus::new(4));
        let (status, _) = get(api_routes(ApiState::new(bus.clone())), "/aggregate").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        bus.store(AGGREGATE_KEY, &json!({"total_lines": 2}), Duration::from_secs(60)).await.unwrap();
        let (status, body) = get(api_routes(ApiState::new(bus)), "/aggregate").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_lines"], 2);
    }

    #[tokio::test]
    async fn test_line_lookup_is_case_insensitive_and_expires() {
        let bus = Arc::new(MemoryBus::new(4));
        bus.store(&line_key("DC1"), &json!({"line": "DC1"}), Duration::from_secs(60)).await.unwrap();
        bus.store(&line_key("DC2"), &json!({"line": "DC2"}), Duration::ZERO).await.unwrap();

        let (status, body) = get(api_routes(ApiState::new(bus.clone())), "/lines/dc1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["line"], "DC1");

        let (status, body) = get(api_routes(ApiState::new(bus)), "/lines/DC2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
