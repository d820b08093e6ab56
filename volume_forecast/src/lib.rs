//! # Volume Forecast
//!
//! Monthly transaction volume forecasting for dashboards.
//!
//! ## Features
//!
//! - Record cleaning and monthly aggregation per company or region
//! - A data quality gate ahead of every fit
//! - Three forecasting tiers: a pluggable primary engine under a time
//!   budget, a seasonal regression and a linear extrapolation
//! - A persisted per-entity model cache keyed by a data hash
//! - Timeline rows and KPIs anchored at the request time
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use volume_forecast::config::ForecastConfig;
//! use volume_forecast::data::RawRecord;
//! use volume_forecast::forecaster::{ForecastRequest, Forecaster};
//! use volume_forecast::models::SmoothingProcedure;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let records: Vec<RawRecord> = (1..=12)
//!     .map(|m| {
//!         let date = format!("2024-{:02}-15", m);
//!         RawRecord::new(&date, "Acme", "CA", 100.0 * m as f64)
//!     })
//!     .collect();
//!
//! let forecaster = Forecaster::in_memory(
//!     ForecastConfig::default(),
//!     Some(Arc::new(SmoothingProcedure::default())),
//! )?;
//! let now = chrono::NaiveDate::from_ymd_opt(2025, 1, 10)
//!     .and_then(|d| d.and_hms_opt(12, 0, 0))
//!     .ok_or("bad date")?;
//! let bundle = forecaster.generate_forecast(&records, &ForecastRequest::default(), now)?;
//!
//! assert_eq!(bundle.company_report.metadata.entities, vec!["ACME".to_string()]);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod aggregate;
pub mod cache;
pub mod config;
pub mod data;
pub mod driver;
pub mod error;
pub mod forecaster;
pub mod metrics;
pub mod models;
pub mod quality;
pub mod report;
pub mod timeline;

// Re-export commonly used types
pub use adapter::ProcedureAdapter;
pub use aggregate::{aggregate, GroupingKey, MonthlySeries, MonthlyTable};
pub use cache::{ChangeSet, DataHash, FileModelStore, MemoryModelStore, ModelCache, ModelStore};
pub use config::{ForecastConfig, HashScope, ProcedureConfig};
pub use data::{clean_records, CsvRecordSource, RawRecord, RecordSource, VecRecordSource};
pub use driver::{rank_entities, ForecastDriver, RankedForecasts, RetrainPolicy};
pub use error::{ForecastError, Result};
pub use forecaster::{ForecastBundle, ForecastRequest, Forecaster};
pub use models::{FittedModel, ForecastMethod, ForecastPoint, ForecastResult, PrimaryProcedure};
pub use quality::{QualityGate, Rejection};
pub use report::{Kpis, ReportStatus, TimelineReport};
