//! Cycle publisher
//!
//! Each line snapshot goes to `<namespace>:line:<line>` and is stored under
//! `metrics:line:<line>`; the factory summary goes to `<namespace>:aggregate`
//! and `metrics:aggregate`. Every call is bounded by a timeout so a slow sink
//! cannot stall the cycle. Failures are logged and retried by the next cycle.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cycle::CycleReport;
use super::sink::{MetricsSink, SinkError};
use crate::config::PublisherConfig;

pub const LINE_KEY_PREFIX: &str = "metrics:line:";
pub const AGGREGATE_KEY: &str = "metrics:aggregate";

pub fn line_channel(namespace: &str, line: &str) -> String {
    format!("{namespace}:line:{line}")
}

pub fn aggregate_channel(namespace: &str) -> String {
    format!("{namespace}:aggregate")
}

pub fn line_key(line: &str) -> String {
    format!("{LINE_KEY_PREFIX}{line}")
}

/// Outcome of publishing one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub delivered: usize,
    pub failed: usize,
}

enum Delivery<'a> {
    Publish(&'a str),
    Store(&'a str),
}

pub struct Publisher {
    namespace: String,
    sinks: Vec<Arc<dyn MetricsSink>>,
    timeout: Duration,
    ttl: Duration,
}

impl Publisher {
    pub fn new(namespace: impl Into<String>, config: &PublisherConfig) -> Self {
        Self {
            namespace: namespace.into(),
            sinks: Vec::new(),
            timeout: Duration::from_millis(config.timeout_ms),
            ttl: Duration::from_secs(config.snapshot_ttl_secs),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Publish every line snapshot and the aggregate of `report`.
    pub async fn publish(&self, report: &CycleReport) -> PublishSummary {
        let mut messages: Vec<(String, String, Value)> = Vec::with_capacity(report.lines.len() + 1);
        for line in &report.lines {
            match serde_json::to_value(line) {
                Ok(payload) => messages.push((line_channel(&self.namespace, &line.line), line_key(&line.line), payload)),
                Err(e) => warn!(line = %line.line, error = %e, "Failed to serialize line snapshot"),
            }
        }
        match serde_json::to_value(&report.aggregate) {
            Ok(payload) => messages.push((aggregate_channel(&self.namespace), AGGREGATE_KEY.to_string(), payload)),
            Err(e) => warn!(error = %e, "Failed to serialize aggregate metrics"),
        }

        let mut calls = Vec::with_capacity(messages.len() * self.sinks.len() * 2);
        for (channel, key, payload) in &messages {
            for sink in &self.sinks {
                calls.push(self.deliver(sink.as_ref(), Delivery::Publish(channel), payload));
                calls.push(self.deliver(sink.as_ref(), Delivery::Store(key), payload));
            }
        }

        let mut summary = PublishSummary::default();
        for result in join_all(calls).await {
            match result {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(error = %e, "Publish failed, will retry next cycle");
                    summary.failed += 1;
                }
            }
        }
        debug!(delivered = summary.delivered, failed = summary.failed, "Cycle published");
        summary
    }

    async fn deliver(&self, sink: &dyn MetricsSink, delivery: Delivery<'_>, payload: &Value) -> Result<(), SinkError> {
        let call = async {
            match delivery {
                Delivery::Publish(channel) => sink.publish(channel, payload).await,
                Delivery::Store(key) => sink.store(key, payload, self.ttl).await,
            }
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| SinkError::Timeout {
                sink: sink.name().to_string(),
                timeout: self.timeout,
            })?
    }
}
