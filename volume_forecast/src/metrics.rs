//! Accuracy of a forecast over its historical overlap

use crate::aggregate::MonthlySeries;
use crate::error::{ForecastError, Result};
use crate::models::ForecastPoint;
use serde::Serialize;

/// Error metrics between actual and fitted values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastAccuracy {
    /// Mean Absolute Error
    pub mae: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error, in percent
    pub mape: f64,
    /// Months compared
    pub overlap: usize,
}

/// Compare fitted rows with actuals for every month present in both.
///
/// Months with a missing actual are skipped; MAPE ignores zero actuals.
pub fn historical_accuracy(
    historical: &MonthlySeries,
    forecast: &[ForecastPoint],
) -> Result<ForecastAccuracy> {
    let pairs: Vec<(f64, f64)> = historical
        .points()
        .iter()
        .filter(|p| p.value.is_finite())
        .filter_map(|p| {
            forecast
                .iter()
                .find(|f| f.month == p.month)
                .map(|f| (p.value, f.point))
        })
        .collect();

    if pairs.is_empty() {
        return Err(ForecastError::DataError(format!(
            "No historical overlap for {}",
            historical.entity()
        )));
    }

    let n = pairs.len() as f64;
    let mae = pairs.iter().map(|(a, f)| (a - f).abs()).sum::<f64>() / n;
    let rmse = (pairs.iter().map(|(a, f)| (a - f).powi(2)).sum::<f64>() / n).sqrt();
    let (actual, fitted): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
    let mape = forecast_math::mape(&actual, &fitted)?;

    Ok(ForecastAccuracy {
        mae,
        rmse,
        mape,
        overlap: actual.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::add_months;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    #[test]
    fn test_accuracy_over_overlap() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let months: Vec<NaiveDate> = (0..3).map(|i| add_months(start, i)).collect();
        let historical = MonthlySeries::from_values("ACME", &months, &[100.0, 200.0, 400.0]).unwrap();
        let forecast = vec![
            ForecastPoint::banded(months[0], 110.0),
            ForecastPoint::banded(months[1], 180.0),
            ForecastPoint::banded(months[2], 400.0),
            ForecastPoint::banded(add_months(start, 3), 500.0),
        ];

        let accuracy = historical_accuracy(&historical, &forecast).unwrap();
        assert_eq!(accuracy.overlap, 3);
        assert_relative_eq!(accuracy.mape, 20.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(accuracy.mae, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_overlap_is_error() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let historical = MonthlySeries::from_values("ACME", &[month], &[1.0]).unwrap();
        let forecast = vec![ForecastPoint::banded(add_months(month, 1), 1.0)];
        assert!(historical_accuracy(&historical, &forecast).is_err());
    }
}
