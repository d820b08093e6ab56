//! Tiered forecast execution with a wall-clock budget on the primary engine
//!
//! Order of attempts for one entity:
//! 1. the primary procedure, on a worker thread bounded by the timeout;
//! 2. [`SeasonalRegression`], unless disabled;
//! 3. [`LinearExtrapolation`].
//!
//! Unavailability, errors, panics and timeouts of a tier all fall through
//! to the next one. Tiers 2 and 3 both skip missing months, so in practice
//! tier 3 runs when tier 2 is disabled. A timed-out worker is abandoned: its result is dropped
//! whenever it finishes and it holds no shared state.

use crate::aggregate::MonthlySeries;
use crate::config::{ForecastConfig, ProcedureConfig};
use crate::error::{ForecastError, Result};
use crate::models::{
    forecast_months, FittedModel, ForecastMethod, ForecastPoint, LinearExtrapolation,
    ModelEnvelope, PrimaryProcedure, SeasonalRegression,
};
use chrono::NaiveDate;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Output of the first tier that succeeded
#[derive(Debug)]
pub struct TierForecast {
    pub method: ForecastMethod,
    /// Engine name recorded with the persisted model
    pub engine: String,
    /// History followed by the future horizon
    pub forecast: Vec<ForecastPoint>,
    pub model: Box<dyn FittedModel>,
}

impl TierForecast {
    pub fn envelope(&self) -> Result<ModelEnvelope> {
        ModelEnvelope::wrap(self.model.as_ref(), &self.engine)
    }
}

/// Runs the forecasting tiers for one series at a time
#[derive(Debug, Clone)]
pub struct ProcedureAdapter {
    primary: Option<Arc<dyn PrimaryProcedure>>,
    config: ProcedureConfig,
    timeout: Duration,
    enable_regression: bool,
}

impl ProcedureAdapter {
    pub fn new(
        primary: Option<Arc<dyn PrimaryProcedure>>,
        config: ProcedureConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            config,
            timeout,
            enable_regression: true,
        }
    }

    /// Adapter configured from the top-level settings.
    ///
    /// The primary engine is dropped when `enable_primary` is off.
    pub fn from_config(config: &ForecastConfig, primary: Option<Arc<dyn PrimaryProcedure>>) -> Self {
        let primary = primary.filter(|_| config.enable_primary);
        Self::new(primary, config.procedure.clone(), config.primary_timeout())
            .with_regression(config.enable_regression)
    }

    pub fn with_regression(mut self, enabled: bool) -> Self {
        self.enable_regression = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forecast `horizon` months past the end of `series`.
    ///
    /// Fails only when every tier failed; the error is the last tier's.
    pub fn forecast(&self, series: &MonthlySeries, horizon: usize) -> Result<TierForecast> {
        if horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "horizon_months must be positive".to_string(),
            ));
        }
        let months = forecast_months(series, horizon)?;
        let entity = series.entity();

        match self.run_primary(series, &months) {
            Ok(tier) => return Ok(tier),
            Err(e) => warn!(entity, code = e.code(), error = %e, "primary procedure failed, falling back"),
        }

        if self.enable_regression {
            match fallback(SeasonalRegression::fit(series), &months) {
                Ok(tier) => return Ok(tier),
                Err(e) => warn!(entity, error = %e, "seasonal regression failed, falling back"),
            }
        }

        fallback(LinearExtrapolation::fit(series), &months).map_err(|e| {
            warn!(entity, error = %e, "linear extrapolation failed");
            ForecastError::ProcedureFailed(format!("All forecasting tiers failed for {}: {}", entity, e))
        })
    }

    fn run_primary(&self, series: &MonthlySeries, months: &[NaiveDate]) -> Result<TierForecast> {
        let primary = self.primary.clone().ok_or_else(|| {
            ForecastError::ProcedureUnavailable("No primary procedure configured".to_string())
        })?;
        if !primary.is_available() {
            return Err(ForecastError::ProcedureUnavailable(format!(
                "{} is not available",
                primary.name()
            )));
        }

        let engine = primary.name().to_string();
        let series = series.clone();
        let config = self.config.clone();
        let requested = months.to_vec();

        let (model, forecast) = run_with_timeout(self.timeout, move || {
            let model = primary.fit(&series, &config)?;
            let forecast = model.predict(&requested)?;
            Ok((model, forecast))
        })?;

        debug!(engine = %engine, rows = forecast.len(), "primary procedure succeeded");
        Ok(TierForecast {
            method: ForecastMethod::Primary,
            engine,
            forecast: checked_forecast(forecast, months)?,
            model,
        })
    }

    /// Rebuild a persisted model.
    ///
    /// Tier 1 blobs are handed to the configured primary engine, which must
    /// carry the same name as the one that wrote them.
    pub fn restore(&self, envelope: &ModelEnvelope) -> Result<Box<dyn FittedModel>> {
        let bytes = envelope.payload_bytes()?;
        match envelope.method {
            ForecastMethod::Primary => match &self.primary {
                Some(primary) if primary.name() == envelope.engine => primary.restore(&bytes),
                _ => Err(ForecastError::ProcedureUnavailable(format!(
                    "No primary engine named {} to restore with",
                    envelope.engine
                ))),
            },
            ForecastMethod::SeasonalRegression => SeasonalRegression::from_bytes(&bytes),
            ForecastMethod::LinearExtrapolation => LinearExtrapolation::from_bytes(&bytes),
        }
    }

    /// Predict history plus `horizon` months from an already fitted model.
    ///
    /// Primary models predict under the same time budget as fitting.
    pub fn predict_cached(
        &self,
        model: Box<dyn FittedModel>,
        series: &MonthlySeries,
        horizon: usize,
    ) -> Result<Vec<ForecastPoint>> {
        let months = forecast_months(series, horizon)?;
        let forecast = if model.method() == ForecastMethod::Primary {
            let requested = months.clone();
            run_with_timeout(self.timeout, move || model.predict(&requested))?
        } else {
            model.predict(&months)?
        };
        checked_forecast(forecast, &months)
    }
}

fn fallback<M>(fitted: Result<M>, months: &[NaiveDate]) -> Result<TierForecast>
where
    M: FittedModel + 'static,
{
    let model = fitted?;
    let forecast = checked_forecast(model.predict(months)?, months)?;
    let method = model.method();
    Ok(TierForecast {
        method,
        engine: method.as_str().to_string(),
        forecast,
        model: Box::new(model),
    })
}

/// Reject output of the wrong length or with non-finite points, and order
/// each row's bounds around its point
fn checked_forecast(forecast: Vec<ForecastPoint>, months: &[NaiveDate]) -> Result<Vec<ForecastPoint>> {
    if forecast.len() != months.len() {
        return Err(ForecastError::ProcedureFailed(format!(
            "Expected {} forecast rows, got {}",
            months.len(),
            forecast.len()
        )));
    }
    forecast
        .into_iter()
        .map(|p| {
            if !p.point.is_finite() {
                return Err(ForecastError::ProcedureFailed(format!(
                    "Non-finite forecast for {}",
                    p.month
                )));
            }
            let lower = if p.lower.is_finite() { p.lower.min(p.point) } else { p.point };
            let upper = if p.upper.is_finite() { p.upper.max(p.point) } else { p.point };
            Ok(ForecastPoint::new(p.month, p.point, lower, upper))
        })
        .collect()
}

/// Run `job` on a worker thread and wait at most `timeout` for its result.
///
/// On timeout the worker is detached and left to finish on its own. A
/// panicking job surfaces as [`ForecastError::ProcedureFailed`].
pub fn run_with_timeout<T, F>(timeout: Duration, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("primary-procedure".to_string())
        .spawn(move || {
            // Receiver is gone after a timeout
            let _ = tx.send(job());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(?timeout, "primary procedure timed out, abandoning worker");
            Err(ForecastError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ForecastError::ProcedureFailed(
            "Primary procedure worker exited without a result".to_string(),
        )),
    }
}
