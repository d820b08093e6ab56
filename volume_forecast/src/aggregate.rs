//! Monthly aggregation of cleaned records into per-entity series
//!
//! The pivot is held as a polars [`DataFrame`] with one `f64` column per
//! entity; the month index is kept alongside it in ascending order.

use crate::data::CleanRecord;
use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Field used to group records into entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingKey {
    Company,
    Region,
}

impl GroupingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingKey::Company => "company",
            GroupingKey::Region => "region",
        }
    }

    pub(crate) fn key_of<'a>(&self, record: &'a CleanRecord) -> &'a str {
        match self {
            GroupingKey::Company => &record.entity_name,
            GroupingKey::Region => &record.region,
        }
    }
}

impl std::fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One month of one entity's series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPoint {
    pub month: NaiveDate,
    pub value: f64,
}

/// An entity's values ordered by month, one point per month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySeries {
    entity: String,
    points: Vec<MonthlyPoint>,
}

impl MonthlySeries {
    /// Build a series, sorting points by month.
    ///
    /// Duplicate months are rejected.
    pub fn new(entity: &str, mut points: Vec<MonthlyPoint>) -> Result<Self> {
        points.sort_by_key(|p| p.month);
        if points.windows(2).any(|w| w[0].month == w[1].month) {
            return Err(ForecastError::DataError(format!(
                "Series for {} has duplicate months",
                entity
            )));
        }
        Ok(Self {
            entity: entity.to_string(),
            points,
        })
    }

    /// Series from parallel month and value slices
    pub fn from_values(entity: &str, months: &[NaiveDate], values: &[f64]) -> Result<Self> {
        if months.len() != values.len() {
            return Err(ForecastError::DataError(format!(
                "Months length ({}) doesn't match values length ({})",
                months.len(),
                values.len()
            )));
        }
        let points = months
            .iter()
            .zip(values.iter())
            .map(|(&month, &value)| MonthlyPoint { month, value })
            .collect();
        Self::new(entity, points)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn points(&self) -> &[MonthlyPoint] {
        &self.points
    }

    pub fn months(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.month).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn last_month(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.month)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Keep only the points matching `keep`
    pub fn filtered(&self, keep: impl Fn(&MonthlyPoint) -> bool) -> Self {
        Self {
            entity: self.entity.clone(),
            points: self.points.iter().copied().filter(|p| keep(p)).collect(),
        }
    }
}

/// Month-by-entity pivot table; cells with no records are zero
#[derive(Debug, Clone)]
pub struct MonthlyTable {
    grouping: GroupingKey,
    months: Vec<NaiveDate>,
    df: DataFrame,
}

impl MonthlyTable {
    pub fn grouping(&self) -> GroupingKey {
        self.grouping
    }

    /// Month index, ascending
    pub fn months(&self) -> &[NaiveDate] {
        &self.months
    }

    /// Entity columns in table order (alphabetical)
    pub fn entities(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn height(&self) -> usize {
        self.months.len()
    }

    pub fn width(&self) -> usize {
        self.df.width()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty() || self.df.width() == 0
    }

    /// All values of one entity column, in month order
    pub fn column(&self, entity: &str) -> Result<Vec<f64>> {
        let col = self.df.column(entity).map_err(|e| {
            ForecastError::DataError(format!("Column '{}' not found: {}", entity, e))
        })?;
        Ok(col.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
    }

    /// Full series of one entity, zero-filled months included
    pub fn series(&self, entity: &str) -> Result<MonthlySeries> {
        MonthlySeries::from_values(entity, &self.months, &self.column(entity)?)
    }

    /// Value of one cell, if the month is in the index
    pub fn value(&self, month: NaiveDate, entity: &str) -> Result<Option<f64>> {
        match self.months.binary_search(&month) {
            Ok(row) => Ok(self.column(entity)?.get(row).copied()),
            Err(_) => Ok(None),
        }
    }

    /// Sum of each entity over the last `window` months, in column order
    pub fn recent_totals(&self, window: usize) -> Result<Vec<(String, f64)>> {
        let start = self.height().saturating_sub(window);
        self.entities()
            .into_iter()
            .map(|entity| {
                let total = self.column(&entity)?[start..].iter().sum::<f64>();
                Ok((entity, total))
            })
            .collect()
    }
}

/// Aggregate cleaned records by (entity, calendar month), summing amounts.
///
/// Records whose grouping field is empty are skipped. Fails when there are
/// no records at all, or when no record carries the grouping field.
pub fn aggregate(records: &[CleanRecord], grouping: GroupingKey) -> Result<MonthlyTable> {
    if records.is_empty() {
        return Err(ForecastError::AggregationFailed(
            "No records to aggregate".to_string(),
        ));
    }

    let mut sums: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    let mut months = BTreeSet::new();
    let mut missing_key = 0usize;

    for record in records {
        let key = grouping.key_of(record);
        if key.is_empty() {
            missing_key += 1;
            continue;
        }
        let month = record.month();
        months.insert(month);
        *sums.entry(key).or_default().entry(month).or_insert(0.0) += record.amount;
    }

    if sums.is_empty() {
        return Err(ForecastError::AggregationFailed(format!(
            "Grouping key '{}' is absent from every record",
            grouping
        )));
    }
    if missing_key > 0 {
        warn!(grouping = %grouping, skipped = missing_key, "records without a grouping value");
    }

    let months: Vec<NaiveDate> = months.into_iter().collect();
    let columns: Vec<Series> = sums
        .iter()
        .map(|(entity, by_month)| {
            let values: Vec<f64> = months
                .iter()
                .map(|m| by_month.get(m).copied().unwrap_or(0.0))
                .collect();
            Series::new(entity, values)
        })
        .collect();

    let df = DataFrame::new(columns)
        .map_err(|e| ForecastError::AggregationFailed(e.to_string()))?;

    debug!(
        grouping = %grouping,
        months = months.len(),
        entities = df.width(),
        "aggregated monthly table"
    );

    Ok(MonthlyTable {
        grouping,
        months,
        df,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{clean_records, RawRecord};

    #[test]
    fn test_duplicate_months_rejected() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let points = vec![
            MonthlyPoint { month, value: 1.0 },
            MonthlyPoint { month, value: 2.0 },
        ];
        assert!(MonthlySeries::new("ACME", points).is_err());
    }

    #[test]
    fn test_region_grouping_sums_amounts() {
        let (records, _) = clean_records(&[
            RawRecord::new("2024-01-03", "acme", "ca", 10.0),
            RawRecord::new("2024-01-20", "globex", "CA", 5.0),
            RawRecord::new("2024-02-01", "acme", "NY", 7.0),
        ]);
        let table = aggregate(&records, GroupingKey::Region).unwrap();

        assert_eq!(table.entities(), vec!["CA".to_string(), "NY".to_string()]);
        assert_eq!(table.column("CA").unwrap(), vec![15.0, 0.0]);
        assert_eq!(table.column("NY").unwrap(), vec![0.0, 7.0]);
    }
}
