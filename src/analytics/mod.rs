//! Sliding-Window Analytics
//!
//! Turns a device's reconciled state and bounded recent window into live
//! metrics: speed, trend, running/idle, uptime, efficiency and KPIs. Line and
//! factory rollups are always recomputed from the current device metrics,
//! never accumulated separately.

pub mod kpi;
pub mod window;

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::config::AnalyticsConfig;
use crate::reconciler::{CounterReconciler, DeviceState};
use crate::types::{AggregateMetrics, AnomalyRecord, DeviceMetrics, LineMetrics, Reading, SourceKey};

pub struct SlidingWindowAnalytics {
    config: AnalyticsConfig,
}

impl Default for SlidingWindowAnalytics {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

impl SlidingWindowAnalytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Fold new readings into `state`, then compute its metrics at `now`.
    pub fn update(
        &self,
        key: &SourceKey,
        state: &mut DeviceState,
        new_readings: &[Reading],
        reconciler: &CounterReconciler,
        now: DateTime<Utc>,
    ) -> DeviceMetrics {
        state.apply_all(new_readings, reconciler);
        self.metrics(key, state, now)
    }

    /// Metrics of one device as of `now`. The anomaly record is left clear.
    pub fn metrics(&self, key: &SourceKey, state: &DeviceState, now: DateTime<Utc>) -> DeviceMetrics {
        let w = &state.recent_window;
        let cfg = &self.config;

        let speed_per_minute = window::speed_per_minute(w);
        let speed_per_hour = speed_per_minute * 60.0;
        let idle = state
            .last_seen_timestamp
            .map_or(0.0, |last| window::seconds_between(last, now).max(0.0));
        let is_running = state.last_seen_timestamp.is_some() && idle < cfg.idle_threshold_secs;
        let produced_in_window = match (w.first(), w.last()) {
            (Some(a), Some(b)) => window::produced(a, b),
            _ => 0,
        };

        DeviceMetrics {
            source: key.clone(),
            total_produced: state.reconciled_total,
            reset_count: state.reset_count,
            current_count: state.last_seen_cumulative,
            last_seen: state.last_seen_timestamp,
            window_len: w.len(),
            produced_in_window,
            speed_per_minute,
            speed_per_hour,
            trend: window::classify_trend(w, cfg.trend_slope_threshold, cfg.stopped_speed),
            is_running,
            idle_time_seconds: idle,
            uptime_seconds: window::uptime_seconds(w, cfg.stillness_gap_secs),
            // A stopped device has no efficiency, not 0 %
            efficiency_percent: cfg
                .target_for(&key.position)
                .filter(|_| speed_per_hour > 0.0)
                .map(|target| speed_per_hour / target * 100.0),
            stats: window::window_stats(w),
            kpi: kpi::compute_kpi(w, cfg.downtime_gap_secs, cfg.ideal_cycle_secs),
            anomaly: AnomalyRecord::clear(),
        }
    }

    /// Rollup of the devices of one line.
    pub fn rollup(&self, line: &str, devices: &[&DeviceMetrics], now: DateTime<Utc>) -> LineMetrics {
        let total = devices.len();
        let running = devices.iter().filter(|d| d.is_running).count();
        #[allow(clippy::cast_precision_loss)]
        let mean_speed = if total > 0 {
            devices.iter().map(|d| d.speed_per_minute).sum::<f64>() / total as f64
        } else {
            0.0
        };
        LineMetrics {
            line: line.to_string(),
            total_devices: total,
            running_devices: running,
            stopped_devices: total - running,
            total_produced: devices.iter().map(|d| d.total_produced).sum(),
            mean_speed_per_minute: mean_speed,
            timestamp: now,
        }
    }

    /// Summary over every line.
    ///
    /// `anomalous` names the lines with at least one triggered check.
    pub fn aggregate(&self, lines: &[LineMetrics], anomalous: &BTreeSet<String>, now: DateTime<Utc>) -> AggregateMetrics {
        AggregateMetrics {
            total_lines: lines.len(),
            total_devices: lines.iter().map(|l| l.total_devices).sum(),
            running_devices: lines.iter().map(|l| l.running_devices).sum(),
            total_produced: lines.iter().map(|l| l.total_produced).sum(),
            anomalous_lines: lines.iter().filter(|l| anomalous.contains(&l.line)).count(),
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Trend;
    use chrono::{Duration, TimeZone};

    fn key(id: &str) -> SourceKey {
        SourceKey::new("DC1", "sau-me", None, id)
    }

    fn feed(counts: &[(i64, u64)]) -> (DeviceState, DateTime<Utc>) {
        let t0 = Utc.with_ymd_and_hms(2025, 11, 21, 6, 0, 0).unwrap();
        let rec = CounterReconciler::default();
        let mut state = DeviceState::new("A", 10);
        for (secs, c) in counts {
            state.apply(&Reading::new("A", "sau-me", t0 + Duration::seconds(*secs), *c), &rec);
        }
        (state, t0)
    }

    #[test]
    fn test_idle_device_is_not_running() {
        let (state, t0) = feed(&[(0, 0), (10, 10), (20, 20)]);
        let analytics = SlidingWindowAnalytics::default();
        let m = analytics.metrics(&key("A"), &state, t0 + Duration::seconds(90));
        assert!(!m.is_running);
        assert!((m.idle_time_seconds - 70.0).abs() < 1e-9);

        let fresh = analytics.metrics(&key("A"), &state, t0 + Duration::seconds(30));
        assert!(fresh.is_running);
    }

    #[test]
    fn test_metrics_speed_efficiency_and_totals() {
        let (state, t0) = feed(&[(0, 0), (60, 2), (120, 4), (180, 6)]);
        let m = SlidingWindowAnalytics::default().metrics(&key("A"), &state, t0 + Duration::seconds(185));
        assert!((m.speed_per_minute - 2.0).abs() < 1e-9);
        assert!((m.speed_per_hour - 120.0).abs() < 1e-9);
        assert!((m.efficiency_percent.unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(m.total_produced, 6);
        assert_eq!(m.produced_in_window, 6);
        assert_eq!(m.trend, Trend::Stable);
        assert!((m.uptime_seconds - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_efficiency_absent_without_speed_or_target() {
        let (flat, t0) = feed(&[(0, 50), (60, 50), (120, 50)]);
        let mut analytics = SlidingWindowAnalytics::default();
        let m = analytics.metrics(&key("A"), &flat, t0 + Duration::seconds(125));
        assert_eq!(m.speed_per_hour, 0.0);
        assert_eq!(m.efficiency_percent, None);

        let (moving, t0) = feed(&[(0, 0), (60, 2)]);
        analytics.config.target_speed_per_hour = 0.0;
        let m = analytics.metrics(&key("A"), &moving, t0 + Duration::seconds(65));
        assert_eq!(m.efficiency_percent, None);
    }

    #[test]
    fn test_update_applies_then_measures() {
        let (mut state, t0) = feed(&[(0, 100)]);
        let analytics = SlidingWindowAnalytics::default();
        let new = vec![Reading::new("A", "sau-me", t0 + Duration::seconds(10), 110)];
        let m = analytics.update(&key("A"), &mut state, &new, &CounterReconciler::default(), t0 + Duration::seconds(10));
        assert_eq!(m.total_produced, 10);
        assert_eq!(m.window_len, 2);
    }

    #[test]
    fn test_rollup_and_aggregate() {
        let analytics = SlidingWindowAnalytics::default();
        let (busy, t0) = feed(&[(0, 0), (60, 30)]);
        let (idle, _) = feed(&[(0, 0), (10, 5)]);
        let now = t0 + Duration::seconds(100);
        let a = analytics.metrics(&key("A"), &busy, now);
        let b = analytics.metrics(&key("B"), &idle, now);

        let line = analytics.rollup("DC1", &[&a, &b], now);
        assert_eq!(line.total_devices, 2);
        assert_eq!(line.running_devices, 1);
        assert_eq!(line.stopped_devices, 1);
        assert_eq!(line.total_produced, 35);
        assert!((line.mean_speed_per_minute - (30.0 + 30.0) / 2.0).abs() < 1e-9);

        let mut anomalous = BTreeSet::new();
        anomalous.insert("DC1".to_string());
        let agg = analytics.aggregate(&[line], &anomalous, now);
        assert_eq!(agg.total_lines, 1);
        assert_eq!(agg.anomalous_lines, 1);
        assert_eq!(agg.total_produced, 35);
    }
}
