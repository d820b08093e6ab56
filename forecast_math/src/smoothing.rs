//! Exponential smoothing with level, trend and optional seasonal indices
//!
//! A Holt-Winters style smoother: Holt's linear method extended with one
//! seasonal index per position in the cycle. Seasonality can be additive
//! (`y = level + trend + s`) or multiplicative (`y = (level + trend) * s`).

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// How the seasonal index combines with level and trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seasonality {
    None,
    Additive,
    Multiplicative,
}

/// Smoothing factors and seasonal period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmootherParams {
    /// Level smoothing factor
    pub alpha: f64,
    /// Trend smoothing factor
    pub beta: f64,
    /// Seasonal smoothing factor
    pub gamma: f64,
    /// Observations per seasonal cycle
    pub period: usize,
}

impl Default for SmootherParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 0.1,
            gamma: 0.3,
            period: 12,
        }
    }
}

impl SmootherParams {
    fn validate(&self) -> Result<()> {
        for (name, value) in [("Alpha", self.alpha), ("Beta", self.beta), ("Gamma", self.gamma)] {
            if value <= 0.0 || value >= 1.0 {
                return Err(MathError::InvalidInput(format!(
                    "{} must be between 0 and 1 (exclusive)",
                    name
                )));
            }
        }
        if self.period < 2 {
            return Err(MathError::InvalidInput(
                "Seasonal period must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// A smoother fitted to a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalSmoother {
    params: SmootherParams,
    seasonality: Seasonality,
    level: f64,
    trend: f64,
    seasonal: Vec<f64>,
    fitted: Vec<f64>,
    residual_std: f64,
}

impl SeasonalSmoother {
    /// Fit the smoother to `values`.
    ///
    /// Seasonal variants need two full cycles of data; multiplicative
    /// seasonality additionally needs a positive first-cycle mean.
    pub fn fit(values: &[f64], params: SmootherParams, seasonality: Seasonality) -> Result<Self> {
        params.validate()?;

        if values.len() < 2 {
            return Err(MathError::InsufficientData(
                "Not enough data for smoothing. Need at least 2 points.".to_string(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MathError::InvalidInput(
                "Smoothing input must be finite".to_string(),
            ));
        }

        let period = params.period;
        let (mut level, mut trend, mut seasonal) = match seasonality {
            Seasonality::None => (values[0], values[1] - values[0], vec![0.0; period]),
            _ => {
                if values.len() < 2 * period {
                    return Err(MathError::InsufficientData(format!(
                        "Seasonal smoothing needs at least {} points",
                        2 * period
                    )));
                }
                let first = values[..period].iter().sum::<f64>() / period as f64;
                let second = values[period..2 * period].iter().sum::<f64>() / period as f64;
                let indices = match seasonality {
                    Seasonality::Multiplicative => {
                        if first <= 0.0 {
                            return Err(MathError::CalculationError(
                                "Multiplicative seasonality needs a positive first cycle"
                                    .to_string(),
                            ));
                        }
                        values[..period].iter().map(|v| v / first).collect()
                    }
                    _ => values[..period].iter().map(|v| v - first).collect(),
                };
                (first, (second - first) / period as f64, indices)
            }
        };

        let mut fitted = Vec::with_capacity(values.len());
        let start = if seasonality == Seasonality::None {
            fitted.push(values[0]);
            1
        } else {
            0
        };

        for (t, &value) in values.iter().enumerate().skip(start) {
            let slot = t % period;
            let index = seasonal[slot];
            fitted.push(combine(seasonality, level + trend, index));

            let deseasoned = match seasonality {
                Seasonality::None => value,
                Seasonality::Additive => value - index,
                Seasonality::Multiplicative if index.abs() > 1e-12 => value / index,
                Seasonality::Multiplicative => value,
            };

            let new_level =
                params.alpha * deseasoned + (1.0 - params.alpha) * (level + trend);
            let new_trend = params.beta * (new_level - level) + (1.0 - params.beta) * trend;

            seasonal[slot] = match seasonality {
                Seasonality::None => 0.0,
                Seasonality::Additive => {
                    params.gamma * (value - new_level) + (1.0 - params.gamma) * index
                }
                Seasonality::Multiplicative if new_level.abs() > 1e-12 => {
                    params.gamma * (value / new_level) + (1.0 - params.gamma) * index
                }
                Seasonality::Multiplicative => index,
            };

            level = new_level;
            trend = new_trend;
        }

        let n = values.len() as f64;
        let residual_std = (values
            .iter()
            .zip(fitted.iter())
            .map(|(v, f)| (v - f).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        Ok(Self {
            params,
            seasonality,
            level,
            trend,
            seasonal,
            fitted,
            residual_std,
        })
    }

    /// One-step-ahead fitted values over the training data
    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    /// Forecast `h` steps past the end of the training data (`h >= 1`)
    pub fn forecast(&self, h: usize) -> Result<f64> {
        if h == 0 {
            return Err(MathError::InvalidInput(
                "Forecast step must be at least 1".to_string(),
            ));
        }
        let slot = (self.fitted.len() + h - 1) % self.params.period;
        Ok(combine(
            self.seasonality,
            self.level + h as f64 * self.trend,
            self.seasonal[slot],
        ))
    }

    /// Population standard deviation of the one-step residuals
    pub fn residual_std(&self) -> f64 {
        self.residual_std
    }

    pub fn seasonality(&self) -> Seasonality {
        self.seasonality
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn trend(&self) -> f64 {
        self.trend
    }
}

fn combine(seasonality: Seasonality, base: f64, index: f64) -> f64 {
    match seasonality {
        Seasonality::None => base,
        Seasonality::Additive => base + index,
        Seasonality::Multiplicative => base * index,
    }
}
