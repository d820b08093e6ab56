//! Forecasting tiers and the model traits they share
//!
//! Every tier produces the same shape: one [`ForecastPoint`] per requested
//! month, covering the training history followed by the future horizon.
//! Tier 1 is any [`PrimaryProcedure`]; tiers 2 and 3 are the built-in
//! [`SeasonalRegression`] and [`LinearExtrapolation`] fallbacks.

use crate::aggregate::MonthlySeries;
use crate::config::ProcedureConfig;
use crate::error::{ForecastError, Result};
use crate::timeline::{months_after, months_between};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

pub mod linear;
pub mod regression;
pub mod smoothing;

pub use linear::LinearExtrapolation;
pub use regression::SeasonalRegression;
pub use smoothing::{SmoothingProcedure, UnavailableProcedure};

/// Lower bound factor used by the fallback tiers
pub const FALLBACK_LOWER_FACTOR: f64 = 0.8;
/// Upper bound factor used by the fallback tiers
pub const FALLBACK_UPPER_FACTOR: f64 = 1.2;

/// One forecast row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub month: NaiveDate,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ForecastPoint {
    pub fn new(month: NaiveDate, point: f64, lower: f64, upper: f64) -> Self {
        Self {
            month,
            point,
            lower,
            upper,
        }
    }

    /// Point with the fixed +/-20% band of the fallback tiers.
    ///
    /// The band is an approximation, not a statistical interval.
    pub fn banded(month: NaiveDate, point: f64) -> Self {
        Self::new(
            month,
            point,
            point * FALLBACK_LOWER_FACTOR,
            point * FALLBACK_UPPER_FACTOR,
        )
    }
}

/// Which tier produced a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Primary,
    SeasonalRegression,
    LinearExtrapolation,
}

impl ForecastMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::Primary => "primary",
            ForecastMethod::SeasonalRegression => "seasonal_regression",
            ForecastMethod::LinearExtrapolation => "linear_extrapolation",
        }
    }
}

impl fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model fitted to one entity's series
pub trait FittedModel: Debug + Send {
    /// Tier that produced the model
    fn method(&self) -> ForecastMethod;

    /// One point per requested month, in the order given
    fn predict(&self, months: &[NaiveDate]) -> Result<Vec<ForecastPoint>>;

    /// Opaque serialised form, read back by the matching restore function
    fn to_bytes(&self) -> Result<Vec<u8>>;
}

/// Tier 1 forecasting engine.
///
/// Implementations are treated as black boxes: the adapter only fits,
/// predicts and (de)serialises through this trait, under a time budget.
pub trait PrimaryProcedure: Debug + Send + Sync {
    /// Engine name, recorded with persisted models
    fn name(&self) -> &str;

    /// Whether the engine can run in this environment
    fn is_available(&self) -> bool {
        true
    }

    /// Fit a model to the series
    fn fit(&self, series: &MonthlySeries, config: &ProcedureConfig)
        -> Result<Box<dyn FittedModel>>;

    /// Rebuild a model from [`FittedModel::to_bytes`] output
    fn restore(&self, bytes: &[u8]) -> Result<Box<dyn FittedModel>>;
}

/// Forecast for one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub entity_name: String,
    /// History followed by the future horizon
    pub forecast: Vec<ForecastPoint>,
    /// Series the model was trained on
    pub historical: MonthlySeries,
    /// MAPE over the historical overlap, when computable
    pub accuracy: Option<f64>,
    pub method_used: ForecastMethod,
    pub from_cache: bool,
}

impl ForecastResult {
    /// Forecast row for a month, if present
    pub fn point_for(&self, month: NaiveDate) -> Option<&ForecastPoint> {
        self.forecast.iter().find(|p| p.month == month)
    }
}

/// Months a forecast covers: the training months, then `horizon` more
pub fn forecast_months(series: &MonthlySeries, horizon: usize) -> Result<Vec<NaiveDate>> {
    let mut months = series.months();
    let last = months.last().copied().ok_or_else(|| {
        ForecastError::DataError(format!("Series for {} is empty", series.entity()))
    })?;
    months.extend(months_after(last, horizon));
    Ok(months)
}

/// Continuous time index of `month` relative to the training months.
///
/// Training months map to their position. Months past the end continue one
/// step per calendar month; months before the start go negative the same
/// way; months inside a gap are interpolated between their neighbours.
pub fn time_index(train_months: &[NaiveDate], month: NaiveDate) -> Option<f64> {
    let first = *train_months.first()?;
    let last = *train_months.last()?;
    let n = train_months.len();

    if month < first {
        return Some(months_between(first, month) as f64);
    }
    if month > last {
        return Some((n - 1) as f64 + months_between(last, month) as f64);
    }
    match train_months.binary_search(&month) {
        Ok(i) => Some(i as f64),
        Err(i) => {
            let prev = train_months[i - 1];
            let next = train_months[i];
            let span = months_between(prev, next) as f64;
            Some((i - 1) as f64 + months_between(prev, month) as f64 / span)
        }
    }
}

/// Serialised model as written to the model store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEnvelope {
    pub method: ForecastMethod,
    /// Engine name for tier 1 models, tier name otherwise
    pub engine: String,
    /// Hex-encoded engine payload
    pub payload: String,
}

impl ModelEnvelope {
    pub fn wrap(model: &dyn FittedModel, engine: &str) -> Result<Self> {
        Ok(Self {
            method: model.method(),
            engine: engine.to_string(),
            payload: hex::encode(model.to_bytes()?),
        })
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.payload)
            .map_err(|e| ForecastError::Registry(format!("Corrupt model payload: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ForecastError::Registry(format!("Corrupt model envelope: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn test_banded_bounds() {
        let p = ForecastPoint::banded(month(2024, 1), 100.0);
        assert_eq!(p.lower, 80.0);
        assert_eq!(p.upper, 120.0);
    }

    #[test]
    fn test_time_index_extends_and_interpolates() {
        let train = [month(2024, 1), month(2024, 2), month(2024, 5)];
        assert_eq!(time_index(&train, month(2024, 2)), Some(1.0));
        assert_eq!(time_index(&train, month(2024, 7)), Some(4.0));
        assert_eq!(time_index(&train, month(2023, 11)), Some(-2.0));
        let gap = time_index(&train, month(2024, 3)).unwrap();
        assert!((gap - (1.0 + 1.0 / 3.0)).abs() < 1e-12);
        assert_eq!(time_index(&[], month(2024, 1)), None);
    }

    #[test]
    fn test_method_names() {
        assert_eq!(ForecastMethod::SeasonalRegression.to_string(), "seasonal_regression");
        let json = serde_json::to_string(&ForecastMethod::LinearExtrapolation).unwrap();
        assert_eq!(json, "\"linear_extrapolation\"");
    }
}
