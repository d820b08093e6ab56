use forecast_math::MathError;
use std::io;
use std::time::Duration;
use volume_forecast::error::ForecastError;

#[test]
fn test_error_conversion() {
    // IO error conversion
    let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
    let forecast_error = ForecastError::from(io_error);
    assert!(matches!(forecast_error, ForecastError::IoError(_)));

    // Math error conversion
    let math_error = MathError::InsufficientData("need 2 points".to_string());
    let forecast_error = ForecastError::from(math_error);
    assert!(matches!(forecast_error, ForecastError::MathError(_)));

    // JSON error conversion
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let forecast_error = ForecastError::from(json_error);
    assert_eq!(forecast_error.code(), "JsonError");
}

#[test]
fn test_error_display() {
    let error = ForecastError::InvalidParameter("top_n must be positive".to_string());
    assert!(error.to_string().contains("top_n must be positive"));

    let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
    let error = ForecastError::from(io_error);
    let error_string = error.to_string();
    assert!(error_string.contains("IO error"));
    assert!(error_string.contains("permission denied"));

    let timeout = ForecastError::Timeout(Duration::from_secs(60));
    assert_eq!(timeout.to_string(), "Primary procedure timed out after 60s");
}

#[test]
fn test_batch_level_errors() {
    assert!(ForecastError::NoData("empty".to_string()).is_batch_level());
    assert!(ForecastError::AggregationFailed("no key".to_string()).is_batch_level());
    assert!(!ForecastError::ProcedureFailed("tier 3".to_string()).is_batch_level());
    assert!(!ForecastError::Timeout(Duration::from_millis(5)).is_batch_level());
}

#[test]
fn test_codes_are_stable() {
    assert_eq!(ForecastError::NoData(String::new()).code(), "NoData");
    assert_eq!(
        ForecastError::AggregationFailed(String::new()).code(),
        "AggregationFailed"
    );
    assert_eq!(
        ForecastError::ProcedureUnavailable(String::new()).code(),
        "ProcedureUnavailable"
    );
    assert_eq!(ForecastError::Registry(String::new()).code(), "Registry");
}
