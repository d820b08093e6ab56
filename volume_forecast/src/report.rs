//! Timeline rows and KPIs for the dashboard
//!
//! Historical rows carry each entity's actual value under its own name;
//! forecast rows carry the point estimate under `<entity>_pred`, matching
//! the dashboard's column convention.

use crate::aggregate::{GroupingKey, MonthlyTable};
use crate::driver::{RankedForecasts, SkippedEntity};
use crate::error::Result;
use crate::models::ForecastMethod;
use crate::timeline::{month_label, year_month, Timeline};
use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Suffix of forecast columns in serialised rows
pub const PREDICTION_SUFFIX: &str = "_pred";

/// One month of the report
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRow {
    pub month_start: NaiveDate,
    pub is_historical: bool,
    /// Only meaningful on forecast rows
    pub is_current_month: bool,
    /// Entity name to integer value
    pub values: BTreeMap<String, i64>,
}

impl TimelineRow {
    pub fn label(&self) -> String {
        month_label(self.month_start)
    }

    pub fn total(&self) -> i64 {
        self.values.values().sum()
    }
}

impl Serialize for TimelineRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let extra = if self.is_historical { 2 } else { 3 };
        let mut map = serializer.serialize_map(Some(self.values.len() + extra))?;
        map.serialize_entry("month", &self.label())?;
        map.serialize_entry("isHistorical", &self.is_historical)?;
        if self.is_historical {
            for (entity, value) in &self.values {
                map.serialize_entry(entity, value)?;
            }
        } else {
            map.serialize_entry("isCurrentMonth", &self.is_current_month)?;
            for (entity, value) in &self.values {
                map.serialize_entry(&format!("{}{}", entity, PREDICTION_SUFFIX), value)?;
            }
        }
        map.end()
    }
}

/// Dashboard headline figures
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub previous_month_total: i64,
    pub current_month_predicted: i64,
    pub next_month_predicted: i64,
    /// Percent, one decimal
    pub growth_current_vs_previous: f64,
    /// Percent, one decimal
    pub growth_next_vs_current: f64,
    #[serde(rename = "total6MonthForecast")]
    pub total_6_month_forecast: i64,
    /// Rounded to the nearest integer
    pub avg_monthly_forecast: i64,
    pub total_entities: usize,
}

/// How complete a report is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportStatus {
    Complete,
    /// Some selected entities were skipped
    PartialFailure,
    /// No selected entity produced a forecast; the report is empty
    AllEntitiesRejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineInfo {
    pub current_date: NaiveDate,
    pub current_month: String,
    pub previous_month: String,
    pub historical_start: String,
    pub forecast_start: String,
    pub forecast_end: String,
    pub historical_months: usize,
    pub forecast_months: usize,
}

impl TimelineInfo {
    fn new(timeline: &Timeline, historical_months: usize) -> Self {
        let first = timeline.forecast_months.first().copied().unwrap_or(timeline.current_month);
        let last = timeline.forecast_months.last().copied().unwrap_or(timeline.current_month);
        Self {
            current_date: timeline.current_date,
            current_month: month_label(timeline.current_month),
            previous_month: month_label(timeline.previous_month),
            historical_start: month_label(timeline.historical_start),
            forecast_start: month_label(first),
            forecast_end: month_label(last),
            historical_months,
            forecast_months: timeline.forecast_months.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub entity: String,
    pub method: ForecastMethod,
    pub mape: Option<f64>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub grouping: GroupingKey,
    /// Forecast entities in rank order
    pub entities: Vec<String>,
    pub models: Vec<EntitySummary>,
    pub skipped: Vec<SkippedEntity>,
    pub timeline: TimelineInfo,
    pub generated_at: String,
    pub total_entities: usize,
    pub status: ReportStatus,
}

/// Final report for one grouping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineReport {
    #[serde(rename = "forecastData")]
    pub rows: Vec<TimelineRow>,
    pub kpis: Kpis,
    pub metadata: ReportMetadata,
}

impl TimelineReport {
    pub fn historical_rows(&self) -> impl Iterator<Item = &TimelineRow> {
        self.rows.iter().filter(|r| r.is_historical)
    }

    pub fn forecast_rows(&self) -> impl Iterator<Item = &TimelineRow> {
        self.rows.iter().filter(|r| !r.is_historical)
    }
}

/// Merge actuals and forecasts into month rows anchored at `now`.
///
/// With no forecasts the report has no rows, zero KPIs and status
/// [`ReportStatus::AllEntitiesRejected`].
pub fn build_report(
    table: &MonthlyTable,
    outcome: &RankedForecasts,
    now: NaiveDateTime,
) -> Result<TimelineReport> {
    let timeline = Timeline::at(now);
    let entities = outcome.entities();

    let mut rows = Vec::new();
    if !entities.is_empty() {
        let columns: Vec<(String, Option<Vec<f64>>)> = entities
            .iter()
            .map(|e| (e.clone(), table.column(e).ok()))
            .collect();

        for (row, &month) in table.months().iter().enumerate() {
            if !timeline.is_historical(month) {
                continue;
            }
            let values = columns
                .iter()
                .map(|(entity, column)| {
                    let actual = column.as_ref().and_then(|c| c.get(row)).copied().unwrap_or(0.0);
                    (entity.clone(), actual as i64)
                })
                .collect();
            rows.push(TimelineRow {
                month_start: month,
                is_historical: true,
                is_current_month: false,
                values,
            });
        }

        for (i, &month) in timeline.forecast_months.iter().enumerate() {
            let key = year_month(month);
            let values = entities
                .iter()
                .map(|entity| {
                    let predicted = outcome
                        .get(entity)
                        .and_then(|f| f.forecast.iter().find(|p| year_month(p.month) == key))
                        .map(|p| (p.point as i64).max(0))
                        .unwrap_or(0);
                    (entity.clone(), predicted)
                })
                .collect();
            rows.push(TimelineRow {
                month_start: month,
                is_historical: false,
                is_current_month: i == 0,
                values,
            });
        }
    }
    rows.sort_by_key(|r| r.month_start);

    let kpis = calculate_kpis(&rows, entities.len());
    let historical_months = rows.iter().filter(|r| r.is_historical).count();
    let status = if entities.is_empty() {
        ReportStatus::AllEntitiesRejected
    } else if !outcome.skipped.is_empty() {
        ReportStatus::PartialFailure
    } else {
        ReportStatus::Complete
    };

    info!(
        grouping = %table.grouping(),
        entities = entities.len(),
        previous = kpis.previous_month_total,
        current = kpis.current_month_predicted,
        total_6_month = kpis.total_6_month_forecast,
        ?status,
        "report assembled"
    );

    Ok(TimelineReport {
        rows,
        metadata: ReportMetadata {
            grouping: table.grouping(),
            total_entities: entities.len(),
            models: outcome
                .forecasts
                .iter()
                .map(|f| EntitySummary {
                    entity: f.entity_name.clone(),
                    method: f.method_used,
                    mape: f.accuracy,
                    from_cache: f.from_cache,
                })
                .collect(),
            entities,
            skipped: outcome.skipped.clone(),
            timeline: TimelineInfo::new(&timeline, historical_months),
            generated_at: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            status,
        },
        kpis,
    })
}

/// KPIs over assembled rows, which must be sorted by month
pub fn calculate_kpis(rows: &[TimelineRow], total_entities: usize) -> Kpis {
    let previous = rows
        .iter()
        .filter(|r| r.is_historical)
        .last()
        .map(TimelineRow::total)
        .unwrap_or(0);
    let forecast: Vec<i64> = rows
        .iter()
        .filter(|r| !r.is_historical)
        .map(TimelineRow::total)
        .collect();

    let current = forecast.first().copied().unwrap_or(0);
    let next = forecast.get(1).copied().unwrap_or(0);
    let total: i64 = forecast.iter().sum();
    let avg = if forecast.is_empty() {
        0
    } else {
        (total as f64 / forecast.len() as f64).round() as i64
    };

    Kpis {
        previous_month_total: previous,
        current_month_predicted: current,
        next_month_predicted: next,
        growth_current_vs_previous: growth(previous, current),
        growth_next_vs_current: growth(current, next),
        total_6_month_forecast: total,
        avg_monthly_forecast: avg,
        total_entities,
    }
}

/// Percent change from `base` to `value`, one decimal; zero when `base` is not positive
fn growth(base: i64, value: i64) -> f64 {
    if base <= 0 {
        return 0.0;
    }
    let pct = (value - base) as f64 / base as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}
