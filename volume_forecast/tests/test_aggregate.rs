use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use rstest::rstest;
use volume_forecast::aggregate::{aggregate, GroupingKey};
use volume_forecast::data::{clean_records, CleanRecord, RawRecord};
use volume_forecast::error::ForecastError;

fn cleaned(rows: &[(&str, &str, &str, f64)]) -> Vec<CleanRecord> {
    let raw: Vec<RawRecord> = rows
        .iter()
        .map(|(date, entity, region, amount)| RawRecord::new(date, entity, region, *amount))
        .collect();
    clean_records(&raw).0
}

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

#[test]
fn test_one_row_per_observed_month_and_zero_fill() {
    let records = cleaned(&[
        ("2024-01-03", "Acme", "CA", 10.0),
        ("2024-01-28T14:00:00", "Acme", "CA", 15.0),
        ("2024-03-02", "Acme", "CA", 7.0),
        ("2024-02-10", "Globex", "NY", 20.0),
        ("2024-05-10", "Globex", "NY", 5.0),
    ]);

    let table = aggregate(&records, GroupingKey::Company).unwrap();

    // April has no data anywhere, so it is absent rather than zero-filled
    assert_eq!(
        table.months(),
        &[month(2024, 1), month(2024, 2), month(2024, 3), month(2024, 5)]
    );
    assert_eq!(table.entities(), vec!["ACME".to_string(), "GLOBEX".to_string()]);
    assert_eq!(table.column("ACME").unwrap(), vec![25.0, 0.0, 7.0, 0.0]);
    assert_eq!(table.column("GLOBEX").unwrap(), vec![0.0, 20.0, 0.0, 5.0]);
    assert_eq!(table.height(), 4);
    assert_eq!(table.width(), 2);
    assert_eq!(table.dataframe().shape(), (4, 2));
}

#[test]
fn test_series_and_cell_lookup() {
    let records = cleaned(&[
        ("2024-01-03", "Acme", "CA", 10.0),
        ("2024-02-03", "Globex", "CA", 4.0),
    ]);
    let table = aggregate(&records, GroupingKey::Company).unwrap();

    let series = table.series("ACME").unwrap();
    assert_eq!(series.entity(), "ACME");
    assert_eq!(series.values(), vec![10.0, 0.0]);
    assert_eq!(table.value(month(2024, 2), "GLOBEX").unwrap(), Some(4.0));
    assert_eq!(table.value(month(2023, 2), "GLOBEX").unwrap(), None);
    assert!(table.column("INITECH").is_err());
}

#[rstest]
#[case(6, vec![("A".to_string(), 6.0), ("B".to_string(), 60.0)])]
#[case(2, vec![("A".to_string(), 2.0), ("B".to_string(), 20.0)])]
fn test_recent_totals_use_last_rows(#[case] window: usize, #[case] expected: Vec<(String, f64)>) {
    let rows: Vec<(String, &str, &str, f64)> = (1..=8)
        .flat_map(|m| {
            let date = format!("2024-{:02}-10", m);
            vec![(date.clone(), "A", "CA", 1.0), (date, "B", "CA", 10.0)]
        })
        .collect();
    let borrowed: Vec<(&str, &str, &str, f64)> = rows
        .iter()
        .map(|(d, e, r, a)| (d.as_str(), *e, *r, *a))
        .collect();
    let table = aggregate(&cleaned(&borrowed), GroupingKey::Company).unwrap();

    assert_eq!(table.recent_totals(window).unwrap(), expected);
}

#[test]
fn test_empty_input_fails() {
    let err = aggregate(&[], GroupingKey::Company).unwrap_err();
    assert!(matches!(err, ForecastError::AggregationFailed(_)));
}

#[test]
fn test_missing_grouping_key_fails() {
    let records = cleaned(&[("2024-01-03", "Acme", "", 10.0), ("2024-02-03", "Acme", " ", 5.0)]);
    let err = aggregate(&records, GroupingKey::Region).unwrap_err();
    assert!(matches!(err, ForecastError::AggregationFailed(_)));

    // Same records still aggregate by company
    assert!(aggregate(&records, GroupingKey::Company).is_ok());
}
