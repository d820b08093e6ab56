//! Ranking by recent volume and the per-entity forecast loop

use crate::adapter::ProcedureAdapter;
use crate::aggregate::{MonthlySeries, MonthlyTable};
use crate::cache::{ChangeSet, ModelCache};
use crate::error::Result;
use crate::metrics::historical_accuracy;
use crate::models::{ForecastPoint, ForecastResult, ModelEnvelope};
use crate::quality::QualityGate;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Months summed when ranking entities
pub const RANKING_WINDOW_MONTHS: usize = 6;

/// Top `top_n` entities by their total over the last six months of the
/// table, largest first. Ties keep table column order.
pub fn rank_entities(table: &MonthlyTable, top_n: usize) -> Result<Vec<(String, f64)>> {
    let mut totals = table.recent_totals(RANKING_WINDOW_MONTHS)?;
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals.truncate(top_n);
    Ok(totals)
}

/// Inputs to the retrain decision
#[derive(Debug, Clone)]
pub struct RetrainPolicy {
    pub force: bool,
    pub changes: ChangeSet,
    /// Timestamp written to registry entries
    pub trained_at: NaiveDateTime,
}

/// Stage at which an entity dropped out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    QualityGate,
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntity {
    pub entity: String,
    pub stage: SkipStage,
    pub reason: String,
}

/// Outcome of one ranking pass
#[derive(Debug, Clone, Default)]
pub struct RankedForecasts {
    /// Selected entities with their recent volume, in rank order
    pub ranked: Vec<(String, f64)>,
    /// Successful forecasts, in rank order
    pub forecasts: Vec<ForecastResult>,
    pub skipped: Vec<SkippedEntity>,
    /// Whether the batch was retrained rather than served from cache
    pub retrained: bool,
}

impl RankedForecasts {
    pub fn get(&self, entity: &str) -> Option<&ForecastResult> {
        self.forecasts.iter().find(|f| f.entity_name == entity)
    }

    /// Forecast entity names in rank order
    pub fn entities(&self) -> Vec<String> {
        self.forecasts.iter().map(|f| f.entity_name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.forecasts.is_empty()
    }
}

/// Drives the quality gate, the model cache and the adapter for one grouping
#[derive(Debug)]
pub struct ForecastDriver<'a> {
    adapter: &'a ProcedureAdapter,
    cache: &'a ModelCache,
    gate: QualityGate,
}

impl<'a> ForecastDriver<'a> {
    pub fn new(adapter: &'a ProcedureAdapter, cache: &'a ModelCache) -> Self {
        Self {
            adapter,
            cache,
            gate: QualityGate::default(),
        }
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gate = gate;
        self
    }

    /// Rank entities and forecast each selected one.
    ///
    /// Every ranked entity goes through the gate first and only those that
    /// pass take part in the retrain decision. Entities failing the gate or
    /// every forecasting tier are skipped; a tier failure is remembered
    /// against the data hash so it does not force a retrain next time. The
    /// pass itself only fails when the table cannot be read.
    pub fn rank_and_forecast(
        &self,
        table: &MonthlyTable,
        top_n: usize,
        horizon: usize,
        policy: &RetrainPolicy,
    ) -> Result<RankedForecasts> {
        let ranked = rank_entities(table, top_n)?;
        info!(
            grouping = %table.grouping(),
            ranked = ?ranked,
            "selected entities by recent volume"
        );

        let mut skipped = Vec::new();
        let mut passed = Vec::new();
        for (entity, _) in &ranked {
            let series = table.series(entity)?;
            match self.gate.check(&series) {
                Ok(checked) => passed.push(checked),
                Err(rejection) => {
                    info!(entity = %entity, reason = %rejection, "entity rejected by quality gate");
                    skipped.push(SkippedEntity {
                        entity: entity.clone(),
                        stage: SkipStage::QualityGate,
                        reason: rejection.to_string(),
                    });
                }
            }
        }

        // Rejected entities never get a model, so they stay out of the decision
        let names: Vec<String> = passed.iter().map(|s| s.entity().to_string()).collect();
        let retrained = self
            .cache
            .should_retrain(&policy.changes.restricted_to(&names), policy.force);

        let mut outcome = RankedForecasts {
            ranked,
            skipped,
            retrained,
            ..RankedForecasts::default()
        };

        for checked in &passed {
            let entity = checked.entity();
            if !retrained {
                if let Some(result) = self.forecast_from_cache(checked, horizon) {
                    self.cache.note_lookup(true);
                    outcome.forecasts.push(result);
                    continue;
                }
                self.cache.note_lookup(false);
            }

            match self.forecast_fresh(checked, horizon, policy) {
                Ok(result) => outcome.forecasts.push(result),
                Err(e) => {
                    warn!(entity, code = e.code(), error = %e, "entity skipped");
                    let reason = e.to_string();
                    if let Some(hash) = policy.changes.hash_for(entity) {
                        if let Err(e) =
                            self.cache
                                .record_failure(entity, &reason, hash, policy.trained_at)
                        {
                            warn!(entity, error = %e, "could not record forecast failure");
                        }
                    }
                    outcome.skipped.push(SkippedEntity {
                        entity: entity.to_string(),
                        stage: SkipStage::Forecast,
                        reason,
                    });
                }
            }
        }

        if let Err(e) = self.cache.flush() {
            warn!(error = %e, "could not write model registry");
        }
        Ok(outcome)
    }

    fn forecast_fresh(
        &self,
        series: &MonthlySeries,
        horizon: usize,
        policy: &RetrainPolicy,
    ) -> Result<ForecastResult> {
        let entity = series.entity();
        let tier = self.adapter.forecast(series, horizon)?;

        match policy.changes.hash_for(entity) {
            Some(hash) => {
                let persisted = tier.envelope().and_then(|envelope| {
                    self.cache
                        .record(entity, &envelope.to_bytes()?, tier.method, hash, policy.trained_at)
                });
                if let Err(e) = persisted {
                    warn!(entity, error = %e, "could not persist model");
                }
            }
            None => warn!(entity, "no data hash for entity, model not persisted"),
        }

        let accuracy = accuracy_of(series, &tier.forecast);
        info!(entity, method = %tier.method, mape = ?accuracy, "entity forecast");

        Ok(ForecastResult {
            entity_name: entity.to_string(),
            forecast: tier.forecast,
            historical: series.clone(),
            accuracy,
            method_used: tier.method,
            from_cache: false,
        })
    }

    /// Forecast with the stored model; any failure is a cache miss
    fn forecast_from_cache(&self, series: &MonthlySeries, horizon: usize) -> Option<ForecastResult> {
        let entity = series.entity();
        let (entry, blob) = self.cache.cached(entity)?;

        let restored = ModelEnvelope::from_bytes(&blob)
            .and_then(|envelope| self.adapter.restore(&envelope))
            .and_then(|model| self.adapter.predict_cached(model, series, horizon));

        match restored {
            Ok(forecast) => {
                debug!(entity, method = %entry.method, "served from cached model");
                Some(ForecastResult {
                    entity_name: entity.to_string(),
                    accuracy: accuracy_of(series, &forecast),
                    forecast,
                    historical: series.clone(),
                    method_used: entry.method,
                    from_cache: true,
                })
            }
            Err(e) => {
                warn!(entity, error = %e, "cached model unusable, refitting");
                None
            }
        }
    }
}

fn accuracy_of(series: &MonthlySeries, forecast: &[ForecastPoint]) -> Option<f64> {
    historical_accuracy(series, forecast).ok().map(|a| a.mape)
}
