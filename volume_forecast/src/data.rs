//! Transaction records: raw input, cleaning, and record sources

use crate::error::{ForecastError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Amount as delivered by ingestion: a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    /// Parse into a finite number, if possible
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            RawAmount::Number(v) => *v,
            RawAmount::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for RawAmount {
    fn from(value: f64) -> Self {
        RawAmount::Number(value)
    }
}

/// One transaction as handed over by the ingestion service.
///
/// Field aliases accept the upstream .NET export column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "DateTransactionJulian")]
    pub transaction_date: String,
    #[serde(default, alias = "NameAlpha")]
    pub entity_name: String,
    #[serde(default, alias = "State")]
    pub region: String,
    #[serde(default, alias = "Orig_Inv_Ttl_Prod_Value")]
    pub amount: Option<RawAmount>,
}

impl RawRecord {
    pub fn new(transaction_date: &str, entity_name: &str, region: &str, amount: f64) -> Self {
        Self {
            transaction_date: transaction_date.to_string(),
            entity_name: entity_name.to_string(),
            region: region.to_string(),
            amount: Some(RawAmount::Number(amount)),
        }
    }
}

/// A record that passed semantic validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanRecord {
    pub transaction_date: NaiveDateTime,
    /// Company name, trimmed and upper-cased
    pub entity_name: String,
    /// Region code, trimmed and upper-cased
    pub region: String,
    pub amount: f64,
}

impl CleanRecord {
    /// First day of the record's calendar month
    pub fn month(&self) -> NaiveDate {
        let date = self.transaction_date.date();
        NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
    }
}

/// Counts of records dropped during cleaning, by reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleaningReport {
    pub received: usize,
    pub kept: usize,
    pub missing_fields: usize,
    pub invalid_dates: usize,
    pub invalid_amounts: usize,
    pub non_positive_amounts: usize,
    pub duplicates: usize,
}

impl CleaningReport {
    pub fn dropped(&self) -> usize {
        self.received - self.kept
    }
}

/// Structural check performed by ingestion before records reach the core
pub fn structural_check(records: &[RawRecord]) -> Result<()> {
    if records.is_empty() {
        return Err(ForecastError::NoData("Data array cannot be empty".to_string()));
    }
    Ok(())
}

/// Parse a transaction date in one of the accepted ISO forms:
/// `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DDTHH:MM:SS.ffffff`.
///
/// Anything else, including slash-separated or unpadded dates, is `None`.
pub fn parse_transaction_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    let bytes = s.as_bytes();
    if bytes.len() < 10 || !has_date_shape(&bytes[..10]) {
        return None;
    }

    if bytes.len() == 10 {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
    }

    let time = &bytes[10..];
    if time.len() < 9 || time[0] != b'T' || !has_time_shape(&time[1..9]) {
        return None;
    }
    match &time[9..] {
        [] => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok(),
        [b'.', frac @ ..] if !frac.is_empty() && frac.iter().all(u8::is_ascii_digit) => {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
        }
        _ => None,
    }
}

fn has_date_shape(b: &[u8]) -> bool {
    b.iter().enumerate().all(|(i, c)| match i {
        4 | 7 => *c == b'-',
        _ => c.is_ascii_digit(),
    })
}

fn has_time_shape(b: &[u8]) -> bool {
    b.iter().enumerate().all(|(i, c)| match i {
        2 | 5 => *c == b':',
        _ => c.is_ascii_digit(),
    })
}

/// Drop invalid records and normalise the rest.
///
/// Invalid rows are never fatal; they are counted in the returned report.
pub fn clean_records(records: &[RawRecord]) -> (Vec<CleanRecord>, CleaningReport) {
    let mut report = CleaningReport {
        received: records.len(),
        ..CleaningReport::default()
    };
    let mut seen = HashSet::new();
    let mut cleaned = Vec::with_capacity(records.len());

    for record in records {
        let entity_name = record.entity_name.trim().to_uppercase();
        let Some(amount) = record.amount.as_ref() else {
            report.missing_fields += 1;
            continue;
        };
        if entity_name.is_empty() || record.transaction_date.trim().is_empty() {
            report.missing_fields += 1;
            continue;
        }

        let Some(transaction_date) = parse_transaction_date(&record.transaction_date) else {
            report.invalid_dates += 1;
            continue;
        };
        let Some(amount) = amount.to_f64() else {
            report.invalid_amounts += 1;
            continue;
        };
        if amount <= 0.0 {
            report.non_positive_amounts += 1;
            continue;
        }

        let region = record.region.trim().to_uppercase();
        let key = (
            transaction_date,
            entity_name.clone(),
            region.clone(),
            amount.to_bits(),
        );
        if !seen.insert(key) {
            report.duplicates += 1;
            continue;
        }

        cleaned.push(CleanRecord {
            transaction_date,
            entity_name,
            region,
            amount,
        });
    }

    report.kept = cleaned.len();
    if report.dropped() > 0 {
        warn!(
            kept = report.kept,
            missing_fields = report.missing_fields,
            invalid_dates = report.invalid_dates,
            invalid_amounts = report.invalid_amounts,
            non_positive = report.non_positive_amounts,
            duplicates = report.duplicates,
            "records filtered during cleaning"
        );
    } else {
        info!(kept = report.kept, "all records passed cleaning");
    }

    (cleaned, report)
}

/// Anything that can hand the core a batch of raw records
pub trait RecordSource {
    fn fetch(&self) -> Result<Vec<RawRecord>>;
}

/// Records already held in memory
#[derive(Debug, Clone, Default)]
pub struct VecRecordSource {
    records: Vec<RawRecord>,
}

impl VecRecordSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

impl RecordSource for VecRecordSource {
    fn fetch(&self) -> Result<Vec<RawRecord>> {
        Ok(self.records.clone())
    }
}

/// Records loaded from a CSV file with a header row
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default, alias = "DateTransactionJulian")]
    transaction_date: String,
    #[serde(default, alias = "NameAlpha")]
    entity_name: String,
    #[serde(default, alias = "State")]
    region: String,
    #[serde(default, alias = "Orig_Inv_Ttl_Prod_Value")]
    amount: String,
}

impl CsvRecordSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RecordSource for CsvRecordSource {
    fn fetch(&self) -> Result<Vec<RawRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row?;
            let amount = (!row.amount.is_empty()).then(|| RawAmount::Text(row.amount));
            records.push(RawRecord {
                transaction_date: row.transaction_date,
                entity_name: row.entity_name,
                region: row.region,
                amount,
            });
        }

        info!(path = %self.path.display(), rows = records.len(), "loaded records from CSV");
        Ok(records)
    }
}
