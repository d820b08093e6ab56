//! Error types for the volume_forecast crate

use forecast_math::MathError;
use polars::prelude::PolarsError;
use std::time::Duration;
use thiserror::Error;

/// Custom error types for the volume_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The request carried no usable records
    #[error("No data: {0}")]
    NoData(String),

    /// Records could not be turned into a monthly table
    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error related to data validation or processing
    #[error("Data error: {0}")]
    DataError(String),

    /// The primary forecasting procedure is not present in this environment
    #[error("Primary procedure unavailable: {0}")]
    ProcedureUnavailable(String),

    /// A forecasting tier raised or produced unusable output
    #[error("Forecasting error: {0}")]
    ProcedureFailed(String),

    /// The primary procedure overran its wall-clock budget
    #[error("Primary procedure timed out after {0:?}")]
    Timeout(Duration),

    /// Model registry or model blob could not be read or written
    #[error("Registry error: {0}")]
    Registry(String),

    /// Error from mathematical operations
    #[error("Math error: {0}")]
    MathError(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON encoding or decoding
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error from CSV reading
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),
}

impl ForecastError {
    /// Stable machine-readable code for the error variant
    pub fn code(&self) -> &'static str {
        match self {
            ForecastError::NoData(_) => "NoData",
            ForecastError::AggregationFailed(_) => "AggregationFailed",
            ForecastError::InvalidParameter(_) => "InvalidParameter",
            ForecastError::DataError(_) => "DataError",
            ForecastError::ProcedureUnavailable(_) => "ProcedureUnavailable",
            ForecastError::ProcedureFailed(_) => "ProcedureFailed",
            ForecastError::Timeout(_) => "Timeout",
            ForecastError::Registry(_) => "Registry",
            ForecastError::MathError(_) => "MathError",
            ForecastError::IoError(_) => "IoError",
            ForecastError::JsonError(_) => "JsonError",
            ForecastError::CsvError(_) => "CsvError",
            ForecastError::PolarsError(_) => "PolarsError",
        }
    }

    /// Whether the error ends the whole request rather than one entity
    pub fn is_batch_level(&self) -> bool {
        matches!(
            self,
            ForecastError::NoData(_) | ForecastError::AggregationFailed(_)
        )
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}
