//! Bundled primary engine: seasonal exponential smoothing

use crate::aggregate::MonthlySeries;
use crate::config::{ProcedureConfig, SeasonalityMode};
use crate::error::{ForecastError, Result};
use crate::models::{time_index, FittedModel, ForecastMethod, ForecastPoint, PrimaryProcedure};
use chrono::NaiveDate;
use forecast_math::{Seasonality, SeasonalSmoother, SmootherParams};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Months per seasonal cycle
const YEAR: usize = 12;

/// Level, trend and yearly seasonal index smoothing.
///
/// Seasonality is used only with two full years of data and
/// `yearly_seasonality` enabled; it is additive or multiplicative per the
/// configured mode. Interval half-width is the normal z-score of
/// `interval_width` times the one-step residual deviation, widened by the
/// square root of the steps ahead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmoothingProcedure {
    params: SmootherParams,
}

impl SmoothingProcedure {
    pub fn new(params: SmootherParams) -> Self {
        Self { params }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SmoothingModel {
    months: Vec<NaiveDate>,
    smoother: SeasonalSmoother,
    z: f64,
}

impl PrimaryProcedure for SmoothingProcedure {
    fn name(&self) -> &str {
        "exponential_smoothing"
    }

    fn fit(
        &self,
        series: &MonthlySeries,
        config: &ProcedureConfig,
    ) -> Result<Box<dyn FittedModel>> {
        let finite = series.filtered(|p| p.value.is_finite());
        let values = finite.values();

        let seasonality = if config.yearly_seasonality && values.len() >= 2 * YEAR {
            match config.seasonality_mode {
                SeasonalityMode::Additive => Seasonality::Additive,
                SeasonalityMode::Multiplicative => Seasonality::Multiplicative,
            }
        } else {
            Seasonality::None
        };

        let params = SmootherParams {
            period: YEAR,
            ..self.params
        };
        let smoother = SeasonalSmoother::fit(&values, params, seasonality)?;

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ForecastError::ProcedureFailed(e.to_string()))?;
        let z = normal.inverse_cdf((1.0 + config.interval_width) / 2.0);

        Ok(Box::new(SmoothingModel {
            months: finite.months(),
            smoother,
            z,
        }))
    }

    fn restore(&self, bytes: &[u8]) -> Result<Box<dyn FittedModel>> {
        let model: SmoothingModel = serde_json::from_slice(bytes)?;
        Ok(Box::new(model))
    }
}

impl FittedModel for SmoothingModel {
    fn method(&self) -> ForecastMethod {
        ForecastMethod::Primary
    }

    fn predict(&self, months: &[NaiveDate]) -> Result<Vec<ForecastPoint>> {
        let fitted = self.smoother.fitted();
        let last = fitted.len().saturating_sub(1);
        let spread = self.z * self.smoother.residual_std();

        months
            .iter()
            .map(|&month| {
                let t = time_index(&self.months, month).ok_or_else(|| {
                    ForecastError::ProcedureFailed("Model has no training months".to_string())
                })?;
                let (point, half_width) = if t > last as f64 {
                    let steps = (t - last as f64).round().max(1.0);
                    let point = self.smoother.forecast(steps as usize)?;
                    (point, spread * steps.sqrt())
                } else {
                    let i = t.round().clamp(0.0, last as f64) as usize;
                    (fitted[i], spread)
                };
                Ok(ForecastPoint::new(
                    month,
                    point,
                    point - half_width,
                    point + half_width,
                ))
            })
            .collect()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Stand-in for an environment with no primary engine installed
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableProcedure;

impl PrimaryProcedure for UnavailableProcedure {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn fit(&self, _series: &MonthlySeries, _config: &ProcedureConfig) -> Result<Box<dyn FittedModel>> {
        Err(ForecastError::ProcedureUnavailable(
            "No primary forecasting engine installed".to_string(),
        ))
    }

    fn restore(&self, _bytes: &[u8]) -> Result<Box<dyn FittedModel>> {
        Err(ForecastError::ProcedureUnavailable(
            "No primary forecasting engine installed".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forecast_months;
    use crate::timeline::add_months;
    use approx::assert_relative_eq;

    fn series(values: &[f64]) -> MonthlySeries {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let months: Vec<NaiveDate> = (0..values.len() as i32)
            .map(|i| add_months(start, i))
            .collect();
        MonthlySeries::from_values("ACME", &months, values).unwrap()
    }

    #[test]
    fn test_history_plus_horizon() {
        let s = series(&[100.0, 120.0, 140.0, 160.0, 180.0, 200.0]);
        let model = SmoothingProcedure::default()
            .fit(&s, &ProcedureConfig::default())
            .unwrap();
        let months = forecast_months(&s, 6).unwrap();
        let points = model.predict(&months).unwrap();

        assert_eq!(points.len(), 12);
        for p in &points {
            assert!(p.lower <= p.point && p.point <= p.upper);
        }
        assert!(points[11].point > points[6].point);
    }

    #[test]
    fn test_seasonal_fit_with_two_years() {
        let values: Vec<f64> = (0..24)
            .map(|i| 1000.0 + 10.0 * i as f64 + if i % 12 == 11 { 400.0 } else { 0.0 })
            .collect();
        let s = series(&values);
        let model = SmoothingProcedure::default()
            .fit(&s, &ProcedureConfig::default())
            .unwrap();
        let months = forecast_months(&s, 12).unwrap();
        let points = model.predict(&months).unwrap();

        // December of the forecast year keeps its seasonal peak
        let november = points[24 + 10].point;
        let december = points[24 + 11].point;
        assert!(december > november);
    }

    #[test]
    fn test_restore_round_trip() {
        let s = series(&[5.0, 7.0, 6.0, 8.0, 9.0]);
        let procedure = SmoothingProcedure::default();
        let model = procedure.fit(&s, &ProcedureConfig::default()).unwrap();
        let restored = procedure.restore(&model.to_bytes().unwrap()).unwrap();
        let months = forecast_months(&s, 3).unwrap();

        let a = model.predict(&months).unwrap();
        let b = restored.predict(&months).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x.point, y.point);
        }
    }

    #[test]
    fn test_unavailable_procedure() {
        let procedure = UnavailableProcedure;
        assert!(!procedure.is_available());
        let err = procedure
            .fit(&series(&[1.0, 2.0, 3.0, 4.0]), &ProcedureConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "ProcedureUnavailable");
    }
}
