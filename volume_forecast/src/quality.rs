//! Per-entity data quality gate run before any model is fitted

use crate::aggregate::MonthlySeries;
use forecast_math::stats::quartiles;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Why an entity's series was not forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    InsufficientData,
    AllMissing,
    NoVariance,
    NonPositive,
    ExtremeOutliers,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::InsufficientData => "insufficient data points",
            Rejection::AllMissing => "all values missing",
            Rejection::NoVariance => "no variance",
            Rejection::NonPositive => "non-positive data",
            Rejection::ExtremeOutliers => "too many extreme outliers",
        };
        f.write_str(reason)
    }
}

/// Thresholds applied by [`QualityGate::check`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    pub min_points: usize,
    /// Outliers lie above `Q3 + multiplier * IQR`
    pub outlier_iqr_multiplier: f64,
    /// Reject when the outlier share is strictly above this
    pub max_outlier_ratio: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_points: 4,
            outlier_iqr_multiplier: 3.0,
            max_outlier_ratio: 0.5,
        }
    }
}

impl QualityGate {
    /// Validate one entity's series.
    ///
    /// Non-positive months are removed first; the returned series is what
    /// the forecasting tiers train on. Checks run in a fixed order and the
    /// first failing one names the rejection.
    pub fn check(&self, series: &MonthlySeries) -> Result<MonthlySeries, Rejection> {
        let kept = series.filtered(|p| p.value > 0.0 || p.value.is_nan());
        let values = kept.values();

        if values.len() < self.min_points {
            return Err(Rejection::InsufficientData);
        }

        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Err(Rejection::AllMissing);
        }

        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        if max == min {
            return Err(Rejection::NoVariance);
        }

        if finite.iter().all(|v| *v <= 0.0) {
            return Err(Rejection::NonPositive);
        }

        let ratio = self.outlier_ratio(&finite);
        if ratio > self.max_outlier_ratio {
            debug!(entity = series.entity(), ratio, "outlier share above limit");
            return Err(Rejection::ExtremeOutliers);
        }

        Ok(kept)
    }

    /// Share of values above `Q3 + multiplier * IQR`
    pub fn outlier_ratio(&self, values: &[f64]) -> f64 {
        let Ok((q1, q3)) = quartiles(values) else {
            return 0.0;
        };
        let threshold = q3 + self.outlier_iqr_multiplier * (q3 - q1);
        let outliers = values.iter().filter(|v| **v > threshold).count();
        outliers as f64 / values.len() as f64
    }
}
