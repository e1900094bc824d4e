//! Daily quota comparison
//!
//! Monthly quotas are contractual figures in m². The daily share spreads the
//! monthly figure over the working days of the month (calendar days minus the
//! maintenance allowance).

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::{defaults, QuotaTarget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaComparison {
    pub product: String,
    pub date: NaiveDate,
    pub days_in_month: u32,
    pub working_days: f64,
    pub monthly_quota_m2: f64,
    pub daily_quota_m2: f64,
    pub actual_units: u64,
    pub tile_area_m2: f64,
    pub actual_m2: f64,
    /// `actual_m2 - daily_quota_m2`
    pub difference_m2: f64,
    /// Difference relative to the daily quota (positive = over quota)
    pub over_quota_percent: f64,
}

impl QuotaComparison {
    pub fn met(&self) -> bool {
        self.difference_m2 >= 0.0
    }
}

/// Number of calendar days in the month of `date`.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    match (first, next) {
        (Some(first), Some(next)) => u32::try_from((next - first).num_days()).unwrap_or(30),
        _ => 30,
    }
}

/// Compare one day's finished units with the product's quota.
pub fn compare_quota(product: &str, target: &QuotaTarget, date: NaiveDate, actual_units: u64) -> QuotaComparison {
    let days = days_in_month(date);
    let monthly = if days == 31 {
        target.monthly_quota_31
    } else {
        target.monthly_quota_30
    };
    let working_days = f64::from(days) - defaults::MAINTENANCE_DAYS_PER_MONTH;
    let daily = if working_days > 0.0 { monthly / working_days } else { 0.0 };

    #[allow(clippy::cast_precision_loss)]
    let actual_m2 = actual_units as f64 * target.tile_area_m2;
    let difference = actual_m2 - daily;
    let percent = if daily > 0.0 { difference / daily * 100.0 } else { 0.0 };

    QuotaComparison {
        product: product.to_string(),
        date,
        days_in_month: days,
        working_days,
        monthly_quota_m2: monthly,
        daily_quota_m2: daily,
        actual_units,
        tile_area_m2: target.tile_area_m2,
        actual_m2,
        difference_m2: difference,
        over_quota_percent: percent,
    }
}
