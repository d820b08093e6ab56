//! Request entry point: records in, company and region reports out

use crate::adapter::ProcedureAdapter;
use crate::aggregate::{aggregate, GroupingKey};
use crate::cache::{ChangeSet, DataHash, FileModelStore, MemoryModelStore, ModelCache, ModelStore};
use crate::config::ForecastConfig;
use crate::data::{clean_records, structural_check, CleanRecord, CleaningReport, RawRecord, RecordSource};
use crate::driver::{ForecastDriver, RetrainPolicy};
use crate::error::{ForecastError, Result};
use crate::models::{PrimaryProcedure, SmoothingProcedure};
use crate::quality::QualityGate;
use crate::report::{build_report, TimelineReport};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span};

/// Per-request knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastRequest {
    pub top_n: usize,
    pub horizon_months: usize,
    pub force_retrain: bool,
}

impl Default for ForecastRequest {
    fn default() -> Self {
        Self {
            top_n: 5,
            horizon_months: 6,
            force_retrain: false,
        }
    }
}

impl ForecastRequest {
    fn validate(&self) -> Result<()> {
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
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub generated_at: String,
    pub top_n: usize,
    pub horizon_months: usize,
    pub records_received: usize,
    pub records_processed: usize,
    pub records_dropped: usize,
    pub cleaning: CleaningReport,
    pub dataset_hash: DataHash,
    /// Whether either grouping refitted its models
    pub models_retrained: bool,
}

/// Both reports of one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastBundle {
    #[serde(rename = "companyForecasts")]
    pub company_report: TimelineReport,
    #[serde(rename = "stateForecasts")]
    pub state_report: TimelineReport,
    pub metadata: BundleMetadata,
}

/// Long-lived engine holding the configured tiers and model stores
#[derive(Debug)]
pub struct Forecaster {
    config: ForecastConfig,
    adapter: ProcedureAdapter,
    company_store: Arc<dyn ModelStore>,
    region_store: Arc<dyn ModelStore>,
    gate: QualityGate,
}

impl Forecaster {
    /// Engine with the bundled smoothing procedure and file stores under
    /// `config.model_dir`
    pub fn new(config: ForecastConfig) -> Result<Self> {
        let company_store = Arc::new(FileModelStore::new(&config.model_dir, GroupingKey::Company));
        let region_store = Arc::new(FileModelStore::new(&config.model_dir, GroupingKey::Region));
        Self::with_parts(
            config,
            Some(Arc::new(SmoothingProcedure::default())),
            company_store,
            region_store,
        )
    }

    /// Engine with in-memory stores
    pub fn in_memory(
        config: ForecastConfig,
        primary: Option<Arc<dyn PrimaryProcedure>>,
    ) -> Result<Self> {
        Self::with_parts(
            config,
            primary,
            Arc::new(MemoryModelStore::new()),
            Arc::new(MemoryModelStore::new()),
        )
    }

    pub fn with_parts(
        config: ForecastConfig,
        primary: Option<Arc<dyn PrimaryProcedure>>,
        company_store: Arc<dyn ModelStore>,
        region_store: Arc<dyn ModelStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            adapter: ProcedureAdapter::from_config(&config, primary),
            config,
            company_store,
            region_store,
            gate: QualityGate::default(),
        })
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Request defaults taken from the configuration
    pub fn default_request(&self) -> ForecastRequest {
        ForecastRequest {
            top_n: self.config.top_n,
            horizon_months: self.config.horizon_months,
            force_retrain: false,
        }
    }

    /// Produce company and region reports for `records` as of `now`.
    ///
    /// Only batch-level problems are errors: an empty batch, a batch with no
    /// valid record, or a grouping that cannot be aggregated. Entity failures
    /// show up in each report's status and skip list.
    pub fn generate_forecast(
        &self,
        records: &[RawRecord],
        request: &ForecastRequest,
        now: NaiveDateTime,
    ) -> Result<ForecastBundle> {
        request.validate()?;
        structural_check(records)?;

        let (cleaned, cleaning) = clean_records(records);
        if cleaned.is_empty() {
            return Err(ForecastError::NoData(format!(
                "All {} records failed validation",
                cleaning.received
            )));
        }

        let (company_report, company_retrained) =
            self.run_grouping(&cleaned, GroupingKey::Company, request, now)?;
        let (state_report, state_retrained) =
            self.run_grouping(&cleaned, GroupingKey::Region, request, now)?;

        info!(
            received = cleaning.received,
            kept = cleaning.kept,
            companies = company_report.metadata.total_entities,
            regions = state_report.metadata.total_entities,
            "forecast generated"
        );

        Ok(ForecastBundle {
            company_report,
            state_report,
            metadata: BundleMetadata {
                generated_at: now.format("%Y-%m-%d %H:%M:%S").to_string(),
                top_n: request.top_n,
                horizon_months: request.horizon_months,
                records_received: cleaning.received,
                records_processed: cleaning.kept,
                records_dropped: cleaning.dropped(),
                dataset_hash: DataHash::of_records(&cleaned),
                cleaning,
                models_retrained: company_retrained || state_retrained,
            },
        })
    }

    /// Fetch from `source`, then [`Self::generate_forecast`]
    pub fn generate_from_source(
        &self,
        source: &dyn RecordSource,
        request: &ForecastRequest,
        now: NaiveDateTime,
    ) -> Result<ForecastBundle> {
        let records = source.fetch()?;
        if records.is_empty() {
            return Err(ForecastError::NoData("Source returned no records".to_string()));
        }
        self.generate_forecast(&records, request, now)
    }

    fn run_grouping(
        &self,
        records: &[CleanRecord],
        grouping: GroupingKey,
        request: &ForecastRequest,
        now: NaiveDateTime,
    ) -> Result<(TimelineReport, bool)> {
        let _span = info_span!("grouping", grouping = %grouping).entered();

        let table = aggregate(records, grouping)?;
        if table.is_empty() {
            return Err(ForecastError::AggregationFailed(format!(
                "Empty {} table",
                grouping
            )));
        }

        let store = match grouping {
            GroupingKey::Company => &self.company_store,
            GroupingKey::Region => &self.region_store,
        };
        let cache = ModelCache::open(Arc::clone(store));
        let policy = RetrainPolicy {
            force: request.force_retrain,
            changes: ChangeSet::compute(records, grouping, self.config.hash_scope),
            trained_at: now,
        };

        let outcome = ForecastDriver::new(&self.adapter, &cache)
            .with_gate(self.gate)
            .rank_and_forecast(&table, request.top_n, request.horizon_months, &policy)?;
        let report = build_report(&table, &outcome, now)?;
        Ok((report, outcome.retrained))
    }
}
