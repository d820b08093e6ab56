//! # Volume Forecast Workspace
//!
//! Facade over the workspace crates:
//!
//! - [`forecast`]: the forecasting engine (`volume_forecast`)
//! - [`math`]: numeric building blocks (`forecast_math`)
//!
//! ```
//! use volume_forecast_workspace::math::quantile;
//!
//! let median = quantile(&[4.0, 1.0, 3.0, 2.0], 0.5).unwrap();
//! assert_eq!(median, 2.5);
//! ```

pub use forecast_math as math;
pub use volume_forecast as forecast;

pub use volume_forecast::{ForecastBundle, ForecastConfig, ForecastError, ForecastRequest, Forecaster};
