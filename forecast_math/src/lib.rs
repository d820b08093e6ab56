//! # Forecast Math
//!
//! Numeric building blocks for monthly volume forecasting.
//! This crate provides least-squares regressions (a single trend line and a
//! multivariate solver with polynomial feature expansion) and an exponential
//! smoother with optional seasonal indices, plus the quantile and error
//! statistics the quality checks rely on.

use thiserror::Error;

pub mod regression;
pub mod smoothing;
pub mod stats;

pub use regression::{polynomial_features, LeastSquares, LinearTrend, PolynomialRegression};
pub use smoothing::{Seasonality, SeasonalSmoother, SmootherParams};
pub use stats::{mape, mean, quantile, quartiles};

/// Errors that can occur in forecasting calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for forecasting math operations
pub type Result<T> = std::result::Result<T, MathError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let err = MathError::InsufficientData("need 2 points".to_string());
        assert_eq!(err.to_string(), "Insufficient data for calculation: need 2 points");
    }
}
