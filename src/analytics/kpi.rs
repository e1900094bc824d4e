//! Production KPIs and OEE over a window of readings

use super::window::{interval_speeds, produced, seconds_between};
use crate::reconciler::RecentWindow;
use crate::types::{DeviceKpi, Oee};

/// `(error_increment, count_increment, error_rate)` across the window.
///
/// Requires reject counts on both ends of the window.
pub fn error_rate(window: &RecentWindow) -> Option<(u64, u64, f64)> {
    let (first, last) = (window.first()?, window.last()?);
    let errors = last.error_total?.saturating_sub(first.error_total?);
    let count = produced(first, last);
    #[allow(clippy::cast_precision_loss)]
    let rate = if count > 0 { errors as f64 / count as f64 } else { 0.0 };
    Some((errors, count, rate))
}

/// `(average, peak)` speed in units/hour over producing intervals only.
pub fn speed_profile(window: &RecentWindow) -> (f64, f64) {
    let producing: Vec<f64> = interval_speeds(window)
        .into_iter()
        .filter(|s| *s > 0.0)
        .map(|s| s * 3600.0)
        .collect();
    if producing.is_empty() {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let avg = producing.iter().sum::<f64>() / producing.len() as f64;
    let peak = producing.iter().copied().fold(0.0, f64::max);
    (avg, peak)
}

/// Sum of gaps longer than `gap_secs`.
pub fn downtime_seconds(window: &RecentWindow, gap_secs: f64) -> f64 {
    window
        .pairs()
        .map(|(a, b)| seconds_between(a.timestamp, b.timestamp))
        .filter(|gap| *gap > gap_secs)
        .sum()
}

/// Availability x performance x quality.
///
/// `scheduled_secs` is the time the device was expected to produce;
/// `ideal_cycle_secs` is the nominal time per unit.
pub fn oee(count: u64, errors: u64, downtime_secs: f64, scheduled_secs: f64, ideal_cycle_secs: f64) -> Oee {
    let production_time = scheduled_secs - downtime_secs;
    let availability = if scheduled_secs > 0.0 {
        (production_time / scheduled_secs).max(0.0)
    } else {
        0.0
    };
    #[allow(clippy::cast_precision_loss)]
    let output = count as f64;
    let performance = if production_time > 0.0 {
        (output * ideal_cycle_secs / production_time).min(1.0)
    } else {
        0.0
    };
    #[allow(clippy::cast_precision_loss)]
    let quality = if count > 0 {
        count.saturating_sub(errors) as f64 / output
    } else {
        0.0
    };
    Oee {
        availability,
        performance,
        quality,
        oee: availability * performance * quality,
    }
}

/// Full KPI set of a window; the window span is the scheduled time.
pub fn compute_kpi(window: &RecentWindow, downtime_gap_secs: f64, ideal_cycle_secs: f64) -> DeviceKpi {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return DeviceKpi::default();
    };
    let count_increment = produced(first, last);
    let (error_increment, error_rate) = error_rate(window).map_or((0, 0.0), |(e, _, r)| (e, r));
    let (avg, peak) = speed_profile(window);
    let downtime = downtime_seconds(window, downtime_gap_secs);
    let span = seconds_between(first.timestamp, last.timestamp);

    DeviceKpi {
        count_increment,
        error_increment,
        error_rate,
        avg_speed_per_hour: avg,
        peak_speed_per_hour: peak,
        downtime_seconds: downtime,
        oee: (span > 0.0).then(|| oee(count_increment, error_increment, downtime, span, ideal_cycle_secs)),
    }
}
