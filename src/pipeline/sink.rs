//! Metrics sinks
//!
//! A sink is a publish/subscribe channel plus a keyed snapshot store with
//! expiry. [`MemoryBus`] is the in-process implementation the snapshot API
//! reads from; [`WebhookSink`] forwards every publish to an HTTP endpoint.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("{sink} publish timed out after {timeout:?}")]
    Timeout { sink: String, timeout: Duration },
}

/// Destination for per-cycle metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Broadcast `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &Value) -> Result<(), SinkError>;

    /// Store `payload` under `key`, expiring after `ttl`.
    async fn store(&self, key: &str, payload: &Value, ttl: Duration) -> Result<(), SinkError>;
}

// ============================================================================
// In-process bus
// ============================================================================

/// One message seen by bus subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Value,
}

struct Snapshot {
    payload: Value,
    stored_at: Instant,
    expires_at: Instant,
}

/// A live snapshot together with how fresh it is.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub payload: Value,
    /// Time since the publisher stored it
    pub age: Duration,
    /// Time until it expires
    pub expires_in: Duration,
}

/// Broadcast channel plus an expiring snapshot map.
pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    /// Snapshot stored under `key`, unless it has expired.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).await.map(|s| s.payload)
    }

    /// Like [`MemoryBus::get`], with the snapshot's age and remaining lifetime.
    pub async fn get_entry(&self, key: &str) -> Option<StoredSnapshot> {
        let now = Instant::now();
        let snapshots = self.snapshots.read().await;
        snapshots
            .get(key)
            .filter(|s| s.expires_at > now)
            .map(|s| StoredSnapshot {
                payload: s.payload.clone(),
                age: now.saturating_duration_since(s.stored_at),
                expires_in: s.expires_at.saturating_duration_since(now),
            })
    }

    /// Live keys starting with `prefix`, sorted.
    pub async fn keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let snapshots = self.snapshots.read().await;
        let mut keys: Vec<String> = snapshots
            .iter()
            .filter(|(k, s)| k.starts_with(prefix) && s.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop expired snapshots.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|_, s| s.expires_at > now);
        before - snapshots.len()
    }
}

#[async_trait]
impl MetricsSink for MemoryBus {
    fn name(&self) -> &str {
        "memory-bus"
    }

    async fn publish(&self, channel: &str, payload: &Value) -> Result<(), SinkError> {
        // No subscribers is not an error
        let _ = self.tx.send(BusMessage {
            channel: channel.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn store(&self, key: &str, payload: &Value, ttl: Duration) -> Result<(), SinkError> {
        let now = Instant::now();
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(
            key.to_string(),
            Snapshot {
                payload: payload.clone(),
                stored_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

// ============================================================================
// Webhook
// ============================================================================

/// POSTs every publish and store call as JSON.
#[derive(Clone)]
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, body: Value) -> Result<(), SinkError> {
        let resp = self.http.post(&self.url).json(&body).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SinkError::Status(resp.status()))
        }
    }
}

#[async_trait]
impl MetricsSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, channel: &str, payload: &Value) -> Result<(), SinkError> {
        self.post(serde_json::json!({ "channel": channel, "payload": payload }))
            .await
    }

    async fn store(&self, key: &str, payload: &Value, ttl: Duration) -> Result<(), SinkError> {
        self.post(serde_json::json!({
            "key": key,
            "ttl_secs": ttl.as_secs(),
            "payload": payload,
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = MemoryBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish("analytics:line:DC1", &json!({"total": 5})).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "analytics:line:DC1");
        assert_eq!(msg.payload["total"], 5);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new(8);
        assert!(bus.publish("analytics:aggregate", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshots_expire() {
        let bus = MemoryBus::new(8);
        bus.store("metrics:line:DC1", &json!(1), Duration::from_secs(300)).await.unwrap();
        bus.store("metrics:line:DC2", &json!(2), Duration::ZERO).await.unwrap();
        bus.store("metrics:aggregate", &json!(3), Duration::from_secs(300)).await.unwrap();

        assert_eq!(bus.get("metrics:line:DC1").await, Some(json!(1)));
        assert_eq!(bus.get("metrics:line:DC2").await, None);
        assert_eq!(bus.keys("metrics:line:").await, vec!["metrics:line:DC1".to_string()]);
        assert_eq!(bus.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_entry_reports_age_and_remaining_lifetime() {
        let bus = MemoryBus::new(8);
        bus.store("metrics:aggregate", &json!({"total_lines": 1}), Duration::from_secs(300))
            .await
            .unwrap();
        let entry = bus.get_entry("metrics:aggregate").await.unwrap();
        assert_eq!(entry.payload["total_lines"], 1);
        assert!(entry.age < Duration::from_secs(5));
        assert!(entry.expires_in > Duration::from_secs(290));
        assert!(bus.get_entry("metrics:line:DC9").await.is_none());
    }
}
