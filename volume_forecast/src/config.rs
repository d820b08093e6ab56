//! Runtime configuration
//!
//! Defaults mirror the dashboard service: top 5 entities, six months ahead,
//! models cached under `models/`. [`ForecastConfig::from_env`] layers
//! `FORECAST_*` environment variables (optionally from a `.env` file) on
//! top of the defaults.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which data a stored model hash is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashScope {
    /// One hash over the whole cleaned dataset, compared against every
    /// entity's stored hash. Any change anywhere retrains every entity.
    #[default]
    Dataset,
    /// One hash per entity over that entity's own records
    Entity,
}

impl FromStr for HashScope {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dataset" => Ok(HashScope::Dataset),
            "entity" => Ok(HashScope::Entity),
            other => Err(ForecastError::InvalidParameter(format!(
                "Unknown hash scope: {}",
                other
            ))),
        }
    }
}

/// How seasonal effects combine with the trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    #[default]
    Multiplicative,
}

/// Configuration contract handed to the primary procedure.
///
/// Engines consume the knobs they understand and ignore the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureConfig {
    pub seasonality_mode: SeasonalityMode,
    pub yearly_seasonality: bool,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    /// Period in days of the custom monthly seasonality
    pub monthly_period_days: f64,
    pub monthly_fourier_order: u32,
    /// Coverage of the uncertainty interval, in (0, 1)
    pub interval_width: f64,
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            seasonality_mode: SeasonalityMode::Multiplicative,
            yearly_seasonality: true,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            monthly_period_days: 30.5,
            monthly_fourier_order: 3,
            interval_width: 0.8,
        }
    }
}

/// Top-level forecasting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub top_n: usize,
    pub horizon_months: usize,
    pub model_dir: PathBuf,
    pub primary_timeout_secs: u64,
    pub enable_primary: bool,
    pub enable_regression: bool,
    pub hash_scope: HashScope,
    pub procedure: ProcedureConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            horizon_months: 6,
            model_dir: PathBuf::from("models"),
            primary_timeout_secs: 60,
            enable_primary: true,
            enable_regression: true,
            hash_scope: HashScope::Dataset,
            procedure: ProcedureConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Defaults overridden by `FORECAST_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Some(v) = env_parse("FORECAST_TOP_N")? {
            config.top_n = v;
        }
        if let Some(v) = env_parse("FORECAST_HORIZON_MONTHS")? {
            config.horizon_months = v;
        }
        if let Ok(v) = env::var("FORECAST_MODEL_DIR") {
            config.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse("FORECAST_PRIMARY_TIMEOUT_SECS")? {
            config.primary_timeout_secs = v;
        }
        if let Some(v) = env_flag("FORECAST_ENABLE_PRIMARY")? {
            config.enable_primary = v;
        }
        if let Some(v) = env_flag("FORECAST_ENABLE_REGRESSION")? {
            config.enable_regression = v;
        }
        if let Some(v) = env_parse("FORECAST_HASH_SCOPE")? {
            config.hash_scope = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(ForecastError::InvalidParameter(
                "top_n must be positive".to_string(),
            ));
        }
        if self.horizon_months == 0 {
            return Err(ForecastError::InvalidParameter(
                "horizon_months must be positive".to_string(),
            ));
        }
        if self.primary_timeout_secs == 0 {
            return Err(ForecastError::InvalidParameter(
                "primary_timeout_secs must be positive".to_string(),
            ));
        }
        let width = self.procedure.interval_width;
        if width <= 0.0 || width >= 1.0 {
            return Err(ForecastError::InvalidParameter(
                "interval_width must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Wall-clock budget for one primary procedure call
    pub fn primary_timeout(&self) -> Duration {
        Duration::from_secs(self.primary_timeout_secs)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ForecastError::InvalidParameter(format!("{}={:?}: {}", key, raw, e))
        }),
        Err(_) => Ok(None),
    }
}

/// Boolean variable: true/false/1/0, case-insensitive
fn env_flag(key: &str) -> Result<Option<bool>> {
    match env::var(key) {
        Ok(raw) => parse_flag(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    let v = raw.trim();
    if v.eq_ignore_ascii_case("true") || v == "1" {
        Ok(true)
    } else if v.eq_ignore_ascii_case("false") || v == "0" {
        Ok(false)
    } else {
        Err(ForecastError::InvalidParameter(format!(
            "{}={:?}: expected true, false, 1 or 0",
            key, raw
        )))
    }
}
