//! Tier 2: polynomial trend with a seasonal residual regression

use crate::aggregate::MonthlySeries;
use crate::error::{ForecastError, Result};
use crate::models::{time_index, FittedModel, ForecastMethod, ForecastPoint};
use chrono::{Datelike, NaiveDate};
use forecast_math::{LeastSquares, LinearTrend, PolynomialRegression};
use serde::{Deserialize, Serialize};

/// Series shorter than this get a plain linear trend and no seasonal term
const POLYNOMIAL_MIN_POINTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Trend {
    Linear(LinearTrend),
    Polynomial(PolynomialRegression),
}

/// Trend regression over `{time index, month, year, quarter}` plus a linear
/// regression of `{month, quarter}` onto the trend residuals.
///
/// Points are floored at zero and carry the fixed +/-20% band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalRegression {
    months: Vec<NaiveDate>,
    trend: Trend,
    seasonal: Option<LeastSquares>,
}

fn features(t: f64, month: NaiveDate) -> Vec<f64> {
    vec![
        t,
        month.month() as f64,
        month.year() as f64,
        month.month0().div_euclid(3) as f64 + 1.0,
    ]
}

fn seasonal_features(month: NaiveDate) -> Vec<f64> {
    vec![
        month.month() as f64,
        month.month0().div_euclid(3) as f64 + 1.0,
    ]
}

impl SeasonalRegression {
    /// Fit over the finite months of `series`.
    ///
    /// Missing months are skipped, as in [`LinearExtrapolation`], so this
    /// fails only when fewer than two finite points remain and the linear
    /// tier would fail on the same input.
    ///
    /// [`LinearExtrapolation`]: crate::models::LinearExtrapolation
    pub fn fit(series: &MonthlySeries) -> Result<Self> {
        let finite = series.filtered(|p| p.value.is_finite());
        let months = finite.months();
        let values = finite.values();
        let ts: Vec<f64> = (0..months.len()).map(|i| i as f64).collect();

        if months.len() < POLYNOMIAL_MIN_POINTS {
            let trend = LinearTrend::fit_points(&ts, &values)?;
            return Ok(Self {
                months,
                trend: Trend::Linear(trend),
                seasonal: None,
            });
        }

        let rows: Vec<Vec<f64>> = ts
            .iter()
            .zip(months.iter())
            .map(|(&t, &m)| features(t, m))
            .collect();
        let trend = PolynomialRegression::fit(&rows, &values, 2)?;

        let residuals = rows
            .iter()
            .zip(values.iter())
            .map(|(row, actual)| Ok(actual - trend.predict(row)?))
            .collect::<Result<Vec<f64>>>()?;
        let seasonal_rows: Vec<Vec<f64>> = months.iter().map(|&m| seasonal_features(m)).collect();
        let seasonal = LeastSquares::fit(&seasonal_rows, &residuals)?;

        Ok(Self {
            months,
            trend: Trend::Polynomial(trend),
            seasonal: Some(seasonal),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Box<dyn FittedModel>> {
        let model: Self = serde_json::from_slice(bytes)?;
        Ok(Box::new(model))
    }

    fn estimate(&self, month: NaiveDate) -> Result<f64> {
        let t = time_index(&self.months, month).ok_or_else(|| {
            ForecastError::ProcedureFailed("Model has no training months".to_string())
        })?;
        let trend = match &self.trend {
            Trend::Linear(line) => line.predict(t),
            Trend::Polynomial(poly) => poly.predict(&features(t, month))?,
        };
        let seasonal = match &self.seasonal {
            Some(model) => model.predict(&seasonal_features(month))?,
            None => 0.0,
        };
        Ok((trend + seasonal).max(0.0))
    }
}

impl FittedModel for SeasonalRegression {
    fn method(&self) -> ForecastMethod {
        ForecastMethod::SeasonalRegression
    }

    fn predict(&self, months: &[NaiveDate]) -> Result<Vec<ForecastPoint>> {
        months
            .iter()
            .map(|&month| Ok(ForecastPoint::banded(month, self.estimate(month)?)))
            .collect()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forecast_months;
    use crate::timeline::add_months;
    use approx::assert_relative_eq;

    fn series(values: &[f64]) -> MonthlySeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let months: Vec<NaiveDate> = (0..values.len() as i32)
            .map(|i| add_months(start, i))
            .collect();
        MonthlySeries::from_values("ACME", &months, values).unwrap()
    }

    #[test]
    fn test_short_series_uses_linear_trend() {
        let s = series(&[10.0, 20.0, 30.0, 40.0]);
        let model = SeasonalRegression::fit(&s).unwrap();
        assert!(model.seasonal.is_none());

        let points = model.predict(&forecast_months(&s, 2).unwrap()).unwrap();
        assert_relative_eq!(points[4].point, 50.0, epsilon = 1e-9);
        assert_relative_eq!(points[5].point, 60.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bands_and_floor() {
        let s = series(&[500.0, 400.0, 300.0, 200.0, 100.0, 50.0]);
        let model = SeasonalRegression::fit(&s).unwrap();
        let points = model.predict(&forecast_months(&s, 12).unwrap()).unwrap();

        assert_eq!(points.len(), 18);
        for p in &points {
            assert!(p.point >= 0.0);
            assert_eq!(p.lower, p.point * 0.8);
            assert_eq!(p.upper, p.point * 1.2);
        }
    }

    #[test]
    fn test_fits_growing_history() {
        let values: Vec<f64> = (1..=12).map(|i| 100.0 * i as f64).collect();
        let s = series(&values);
        let model = SeasonalRegression::fit(&s).unwrap();
        let points = model.predict(&s.months()).unwrap();
        for (p, actual) in points.iter().zip(values.iter()) {
            assert!((p.point - actual).abs() / actual < 0.05);
        }
    }
}
