use chrono::NaiveDate;
use rstest::rstest;
use volume_forecast::aggregate::MonthlySeries;
use volume_forecast::quality::{QualityGate, Rejection};
use volume_forecast::timeline::add_months;

fn series(values: &[f64]) -> MonthlySeries {
    let start = NaiveDate::from_ymd_opt(2023, 7, 1).unwrap();
    let months: Vec<NaiveDate> = (0..values.len() as i32)
        .map(|i| add_months(start, i))
        .collect();
    MonthlySeries::from_values("ACME", &months, values).unwrap()
}

#[rstest]
#[case(&[])]
#[case(&[100.0])]
#[case(&[100.0, 200.0, 300.0])]
#[case(&[100.0, 200.0, 300.0, 0.0, -1.0, 0.0])]
fn test_short_series_rejected(#[case] values: &[f64]) {
    assert_eq!(
        QualityGate::default().check(&series(values)),
        Err(Rejection::InsufficientData)
    );
}

#[test]
fn test_constant_series_has_no_variance() {
    let err = QualityGate::default()
        .check(&series(&[50.0, 50.0, 50.0, 50.0, 50.0, 50.0]))
        .unwrap_err();
    assert_eq!(err, Rejection::NoVariance);
    assert_eq!(err.to_string(), "no variance");
}

#[test]
fn test_all_missing_rejected() {
    let err = QualityGate::default()
        .check(&series(&[f64::NAN; 5]))
        .unwrap_err();
    assert_eq!(err.to_string(), "all values missing");
}

#[test]
fn test_extreme_outliers_rejected() {
    // With Q3 + 3*IQR from the same points, at most about a quarter can
    // exceed the threshold, so a tighter ratio exercises the check
    let gate = QualityGate {
        max_outlier_ratio: 0.1,
        ..QualityGate::default()
    };
    let values = [100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0, 10_000_000.0];
    let err = gate.check(&series(&values)).unwrap_err();
    assert_eq!(err, Rejection::ExtremeOutliers);
    assert_eq!(err.to_string(), "too many extreme outliers");

    // The default gate tolerates a single spike
    assert!(QualityGate::default().check(&series(&values)).is_ok());
}

#[test]
fn test_passing_series_keeps_positive_months() {
    let checked = QualityGate::default()
        .check(&series(&[100.0, 0.0, 120.0, 130.0, 90.0, 110.0]))
        .unwrap();
    assert_eq!(checked.len(), 5);
    assert_eq!(checked.entity(), "ACME");
    assert!(checked.values().iter().all(|v| *v > 0.0));
}
