//! Forecast monthly volumes from a transaction CSV and print the reports as JSON

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use volume_forecast::config::ForecastConfig;
use volume_forecast::data::CsvRecordSource;
use volume_forecast::error::{ForecastError, Result};
use volume_forecast::forecaster::{ForecastRequest, Forecaster};

#[derive(Debug, Parser)]
#[command(name = "volume_forecast", about = "Forecast top companies and regions by monthly volume")]
struct Args {
    /// CSV with transaction_date, entity_name, region and amount columns
    csv: PathBuf,

    /// Entities per report
    #[arg(long)]
    top_n: Option<usize>,

    /// Months to forecast past the last observed month
    #[arg(long)]
    horizon: Option<usize>,

    /// Directory for cached models
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Refit every model even when the data is unchanged
    #[arg(long)]
    force_retrain: bool,

    /// Report date (YYYY-MM-DD); defaults to the local time
    #[arg(long)]
    now: Option<NaiveDate>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn run(args: Args) -> Result<String> {
    let mut config = ForecastConfig::from_env()?;
    if let Some(dir) = args.model_dir {
        config.model_dir = dir;
    }

    let forecaster = Forecaster::new(config)?;
    let defaults = forecaster.default_request();
    let request = ForecastRequest {
        top_n: args.top_n.unwrap_or(defaults.top_n),
        horizon_months: args.horizon.unwrap_or(defaults.horizon_months),
        force_retrain: args.force_retrain,
    };

    let now = match args.now {
        Some(date) => date.and_hms_opt(0, 0, 0).ok_or_else(|| {
            ForecastError::InvalidParameter(format!("Invalid report date {}", date))
        })?,
        None => chrono::Local::now().naive_local(),
    };

    let source = CsvRecordSource::new(&args.csv);
    let bundle = forecaster.generate_from_source(&source, &request, now)?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&bundle)?
    } else {
        serde_json::to_string(&bundle)?
    };
    Ok(json)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(code = e.code(), error = %e, "forecast failed");
            eprintln!("{}: {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}

