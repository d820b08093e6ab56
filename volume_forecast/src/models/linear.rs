//! Tier 3: straight-line extrapolation

use crate::aggregate::MonthlySeries;
use crate::error::{ForecastError, Result};
use crate::models::{time_index, FittedModel, ForecastMethod, ForecastPoint};
use chrono::NaiveDate;
use forecast_math::LinearTrend;
use serde::{Deserialize, Serialize};

/// Least-squares line over (position, value).
///
/// Training months echo their actual values; other months follow the line,
/// floored at zero. Both carry the fixed +/-20% band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearExtrapolation {
    months: Vec<NaiveDate>,
    actuals: Vec<f64>,
    line: LinearTrend,
}

impl LinearExtrapolation {
    /// Fit the line; missing values are skipped and two valid points are required
    pub fn fit(series: &MonthlySeries) -> Result<Self> {
        let actuals = series.values();
        let line = LinearTrend::fit(&actuals)?;
        Ok(Self {
            months: series.months(),
            actuals,
            line,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Box<dyn FittedModel>> {
        let model: Self = serde_json::from_slice(bytes)?;
        Ok(Box::new(model))
    }

    pub fn slope(&self) -> f64 {
        self.line.slope()
    }
}

impl FittedModel for LinearExtrapolation {
    fn method(&self) -> ForecastMethod {
        ForecastMethod::LinearExtrapolation
    }

    fn predict(&self, months: &[NaiveDate]) -> Result<Vec<ForecastPoint>> {
        months
            .iter()
            .map(|&month| {
                let actual = self
                    .months
                    .binary_search(&month)
                    .ok()
                    .map(|i| self.actuals[i])
                    .filter(|v| v.is_finite());
                let point = match actual {
                    Some(value) => value,
                    None => {
                        let t = time_index(&self.months, month).ok_or_else(|| {
                            ForecastError::ProcedureFailed(
                                "Model has no training months".to_string(),
                            )
                        })?;
                        self.line.predict(t).max(0.0)
                    }
                };
                Ok(ForecastPoint::banded(month, point))
            })
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
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let months: Vec<NaiveDate> = (0..values.len() as i32)
            .map(|i| add_months(start, i))
            .collect();
        MonthlySeries::from_values("ACME", &months, values).unwrap()
    }

    #[test]
    fn test_history_is_echoed() {
        let s = series(&[100.0, 250.0, 180.0, 400.0]);
        let model = LinearExtrapolation::fit(&s).unwrap();
        let points = model.predict(&s.months()).unwrap();
        let echoed: Vec<f64> = points.iter().map(|p| p.point).collect();
        assert_eq!(echoed, vec![100.0, 250.0, 180.0, 400.0]);
    }

    #[test]
    fn test_continues_trend() {
        let values: Vec<f64> = (1..=12).map(|i| 100.0 * i as f64).collect();
        let s = series(&values);
        let model = LinearExtrapolation::fit(&s).unwrap();
        let points = model.predict(&forecast_months(&s, 6).unwrap()).unwrap();

        assert_relative_eq!(points[12].point, 1300.0, epsilon = 1e-6);
        assert_relative_eq!(points[17].point, 1800.0, epsilon = 1e-6);
        assert_relative_eq!(model.slope(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_declining_line_floors_at_zero() {
        let s = series(&[300.0, 200.0, 100.0]);
        let model = LinearExtrapolation::fit(&s).unwrap();
        let points = model.predict(&forecast_months(&s, 4).unwrap()).unwrap();
        assert_eq!(points[6].point, 0.0);
        assert_eq!(points[6].lower, 0.0);
    }

    #[test]
    fn test_needs_two_valid_points() {
        let s = series(&[f64::NAN, 5.0, f64::NAN]);
        assert!(LinearExtrapolation::fit(&s).is_err());
    }
}
