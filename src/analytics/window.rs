//! Statistics over one device's bounded recent window
//!
//! All rates are derived from reconciled totals, so a counter reset inside
//! the window does not show up as negative speed.

use chrono::{DateTime, Utc};
use statrs::statistics::{Data, Distribution, OrderStatistics};

use crate::reconciler::{RecentWindow, WindowPoint};
use crate::types::{Trend, WindowStats};

pub(crate) fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let ms = (b - a).num_milliseconds() as f64;
    ms / 1000.0
}

/// Units produced between two window points.
pub(crate) fn produced(a: &WindowPoint, b: &WindowPoint) -> u64 {
    b.reconciled_total.saturating_sub(a.reconciled_total)
}

/// Per-interval speeds (units/second), oldest first.
///
/// Intervals with a non-positive duration are skipped.
pub fn interval_speeds(window: &RecentWindow) -> Vec<f64> {
    window
        .pairs()
        .filter_map(|(a, b)| {
            let dt = seconds_between(a.timestamp, b.timestamp);
            #[allow(clippy::cast_precision_loss)]
            let speed = produced(a, b) as f64 / dt;
            (dt > 0.0).then_some(speed)
        })
        .collect()
}

/// Per-interval production increments, oldest first.
pub fn increments(window: &RecentWindow) -> Vec<u64> {
    window.pairs().map(|(a, b)| produced(a, b)).collect()
}

/// Window speed in units/minute: first to last point.
pub fn speed_per_minute(window: &RecentWindow) -> f64 {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return 0.0;
    };
    let dt = seconds_between(first.timestamp, last.timestamp);
    if dt <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let units = produced(first, last) as f64;
    units / dt * 60.0
}

/// Contiguous running time ending at the latest point.
///
/// Walks backward accumulating gaps until one exceeds `stillness_gap_secs`
/// without any production.
pub fn uptime_seconds(window: &RecentWindow, stillness_gap_secs: f64) -> f64 {
    let points: Vec<&WindowPoint> = window.iter().collect();
    let mut uptime = 0.0;
    for pair in points.windows(2).rev() {
        let gap = seconds_between(pair[0].timestamp, pair[1].timestamp);
        if produced(pair[0], pair[1]) == 0 && gap > stillness_gap_secs {
            break;
        }
        uptime += gap;
    }
    uptime
}

/// Least-squares slope of `values` against their index.
pub fn regression_slope(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    (den > 0.0).then(|| num / den)
}

/// Classify the speed trend of a window.
///
/// Fewer than 3 readings is `Stable`. A window whose every interval is below
/// `stopped_speed` (or that has no usable interval) is `Stopped`, regardless
/// of slope.
pub fn classify_trend(window: &RecentWindow, slope_threshold: f64, stopped_speed: f64) -> Trend {
    if window.len() < 3 {
        return Trend::Stable;
    }
    let speeds = interval_speeds(window);
    if speeds.iter().all(|s| *s < stopped_speed) {
        return Trend::Stopped;
    }
    match regression_slope(&speeds) {
        Some(slope) if slope > slope_threshold => Trend::Increasing,
        Some(slope) if slope < -slope_threshold => Trend::Decreasing,
        _ => Trend::Stable,
    }
}

/// Mean, deviation and percentiles of per-interval speeds in units/minute.
pub fn window_stats(window: &RecentWindow) -> WindowStats {
    let per_minute: Vec<f64> = interval_speeds(window).into_iter().map(|s| s * 60.0).collect();
    if per_minute.is_empty() {
        return WindowStats::default();
    }
    let samples = per_minute.len();
    let mut data = Data::new(per_minute);
    WindowStats {
        samples,
        mean: data.mean().unwrap_or(0.0),
        std_dev: data.std_dev().filter(|s| s.is_finite()).unwrap_or(0.0),
        p25: data.percentile(25),
        p50: data.percentile(50),
        p75: data.percentile(75),
        p95: data.percentile(95),
    }
}
