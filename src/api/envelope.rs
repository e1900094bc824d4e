//! Snapshot response bodies
//!
//! Every body is `{ "data" | "error", "freshness" }`. `freshness` tells a
//! dashboard how old the published snapshot behind the answer is, so a
//! stalled engine shows up as a growing age instead of silently stale
//! numbers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::StoredSnapshot;

/// How fresh the answer is.
#[derive(Debug, Serialize)]
pub struct Freshness {
    pub served_at: DateTime<Utc>,
    /// Seconds since the oldest snapshot used was published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_age_secs: Option<f64>,
    /// Seconds until the first snapshot used expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<f64>,
}

impl Freshness {
    /// Freshness of an answer built from `used` snapshots.
    pub fn of<'a>(used: impl IntoIterator<Item = &'a StoredSnapshot>) -> Self {
        let mut age: Option<f64> = None;
        let mut expires: Option<f64> = None;
        for s in used {
            let a = s.age.as_secs_f64();
            let e = s.expires_in.as_secs_f64();
            age = Some(age.map_or(a, |cur| cur.max(a)));
            expires = Some(expires.map_or(e, |cur| cur.min(e)));
        }
        Self {
            served_at: Utc::now(),
            snapshot_age_secs: age,
            expires_in_secs: expires,
        }
    }

    fn none() -> Self {
        Self::of(std::iter::empty::<&StoredSnapshot>())
    }
}

#[derive(Debug, Serialize)]
struct DataBody<T: Serialize> {
    data: T,
    freshness: Freshness,
}

/// 200 with `data` and the given freshness.
pub fn ok<T: Serialize>(data: T, freshness: Freshness) -> Response {
    (StatusCode::OK, axum::Json(DataBody { data, freshness })).into_response()
}

/// 200 serving one stored snapshot as-is.
pub fn snapshot(entry: StoredSnapshot) -> Response {
    let freshness = Freshness::of([&entry]);
    ok(entry.payload, freshness)
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    freshness: Freshness,
}

fn error(status: StatusCode, code: &'static str, message: String) -> Response {
    let body = ErrorBody {
        error: ErrorDetail { code, message },
        freshness: Freshness::none(),
    };
    (status, axum::Json(body)).into_response()
}

/// No current snapshot for the requested line.
pub fn not_found(message: impl Into<String>) -> Response {
    error(StatusCode::NOT_FOUND, "NOT_FOUND", message.into())
}

/// The engine has not published (or its snapshots expired).
pub fn no_cycle_yet(message: impl Into<String>) -> Response {
    error(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn stored(age: u64, expires_in: u64) -> StoredSnapshot {
        StoredSnapshot {
            payload: json!({"line": "DC1"}),
            age: Duration::from_secs(age),
            expires_in: Duration::from_secs(expires_in),
        }
    }

    async fn body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_freshness_uses_oldest_age_and_earliest_expiry() {
        let f = Freshness::of([&stored(4, 296), &stored(12, 288), &stored(1, 299)]);
        assert_eq!(f.snapshot_age_secs, Some(12.0));
        assert_eq!(f.expires_in_secs, Some(288.0));
        assert_eq!(Freshness::none().snapshot_age_secs, None);
    }

    #[tokio::test]
    async fn test_snapshot_body_carries_its_age() {
        let resp = snapshot(stored(7, 293));
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body(resp).await;
        assert_eq!(v["data"]["line"], "DC1");
        assert_eq!(v["freshness"]["snapshot_age_secs"], 7.0);
        assert_eq!(v["freshness"]["expires_in_secs"], 293.0);
    }

    #[tokio::test]
    async fn test_error_body_has_no_snapshot_age() {
        let resp = not_found("no current snapshot for line DC9");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let v = body(resp).await;
        assert_eq!(v["error"]["code"], "NOT_FOUND");
        assert_eq!(v["error"]["message"], "no current snapshot for line DC9");
        assert!(v["freshness"].get("snapshot_age_secs").is_none());
        assert!(v["freshness"]["served_at"].is_string());
    }
}
