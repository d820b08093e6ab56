//! Calendar-month arithmetic and the report timeline anchored at "now"

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Months in the trailing historical window, counted back from the previous month
pub const HISTORY_WINDOW_MONTHS: i32 = 12;

/// Forecast months shown on the timeline: current month plus the next five
pub const FORECAST_WINDOW_MONTHS: usize = 6;

/// First day of the month containing `date`
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

/// Shift a date by whole calendar months, landing on the first of the month.
///
/// Uses month/year carry arithmetic, so January minus one is December of the
/// previous year. Saturates at the calendar bounds.
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(if months >= 0 {
        NaiveDate::MAX
    } else {
        NaiveDate::MIN
    })
}

/// Whole calendar months from `from` to `to` (negative when `to` is earlier)
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}

/// Dashboard month label, e.g. `Oct 2026`
pub fn month_label(date: NaiveDate) -> String {
    date.format("%b %Y").to_string()
}

/// Year-month key used to match forecast rows, e.g. `2026-10`
pub fn year_month(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// The `horizon` months following `last`
pub fn months_after(last: NaiveDate, horizon: usize) -> Vec<NaiveDate> {
    (1..=horizon as i32).map(|i| add_months(last, i)).collect()
}

/// Timeline anchors computed from the request time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub current_date: NaiveDate,
    pub current_month: NaiveDate,
    /// Last complete month
    pub previous_month: NaiveDate,
    /// Start of the trailing historical window
    pub historical_start: NaiveDate,
    /// Current month first, then the following months
    pub forecast_months: Vec<NaiveDate>,
}

impl Timeline {
    pub fn at(now: NaiveDateTime) -> Self {
        let current_date = now.date();
        let current_month = first_of_month(current_date);
        let previous_month = add_months(current_month, -1);
        let historical_start = add_months(previous_month, -HISTORY_WINDOW_MONTHS);
        let forecast_months = (0..FORECAST_WINDOW_MONTHS as i32)
            .map(|i| add_months(current_month, i))
            .collect();

        Self {
            current_date,
            current_month,
            previous_month,
            historical_start,
            forecast_months,
        }
    }

    /// Whether `month` falls inside the historical window (inclusive)
    pub fn is_historical(&self, month: NaiveDate) -> bool {
        month >= self.historical_start && month <= self.previous_month
    }
}
