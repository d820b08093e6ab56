use chrono::{NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::tempdir;
use volume_forecast::aggregate::GroupingKey;
use volume_forecast::cache::{ChangeSet, FileModelStore, MemoryModelStore, ModelCache, ModelStore};
use volume_forecast::config::HashScope;
use volume_forecast::data::{clean_records, CleanRecord, RawRecord};
use volume_forecast::models::ForecastMethod;

fn records(rows: &[(&str, &str, f64)]) -> Vec<CleanRecord> {
    let raw: Vec<RawRecord> = rows
        .iter()
        .map(|(date, entity, amount)| RawRecord::new(date, entity, "CA", *amount))
        .collect();
    clean_records(&raw).0
}

fn baseline() -> Vec<CleanRecord> {
    records(&[
        ("2024-01-05", "Acme", 100.0),
        ("2024-02-05", "Acme", 120.0),
        ("2024-01-07", "Globex", 40.0),
        ("2024-02-07", "Globex", 45.0),
    ])
}

fn trained_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

fn record_all(cache: &ModelCache, changes: &ChangeSet) {
    for entity in changes.entities() {
        let hash = changes.hash_for(entity).unwrap();
        cache
            .record(entity, b"{}", ForecastMethod::LinearExtrapolation, hash, trained_at())
            .unwrap();
    }
}

#[test]
fn test_cold_start_retrains() {
    let cache = ModelCache::open(Arc::new(MemoryModelStore::new()));
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Dataset);
    assert!(cache.registry().is_none());
    assert!(cache.should_retrain(&changes, false));
}

#[test]
fn test_unchanged_data_reuses_models() {
    let cache = ModelCache::open(Arc::new(MemoryModelStore::new()));
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Dataset);
    record_all(&cache, &changes);

    assert!(!cache.should_retrain(&changes, false));
    // Asking again does not change the answer
    assert!(!cache.should_retrain(&changes, false));
    // Force always wins
    assert!(cache.should_retrain(&changes, true));
}

#[test]
fn test_new_entity_retrains() {
    let cache = ModelCache::open(Arc::new(MemoryModelStore::new()));
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Entity);
    record_all(&cache, &changes);

    let mut grown = baseline();
    grown.extend(records(&[("2024-02-09", "Initech", 10.0)]));
    let grown = ChangeSet::compute(&grown, GroupingKey::Company, HashScope::Entity);
    assert!(cache.should_retrain(&grown, false));

    // Restricted to the entities that already have models, nothing changed
    let known = vec!["ACME".to_string(), "GLOBEX".to_string()];
    assert!(!cache.should_retrain(&grown.restricted_to(&known), false));
}

#[test]
fn test_change_detection_by_scope() {
    let mut changed = baseline();
    changed.extend(records(&[("2024-03-01", "Globex", 5.0)]));
    let acme_only = vec!["ACME".to_string()];

    // Dataset scope: a Globex change invalidates Acme's model too
    let cache = ModelCache::open(Arc::new(MemoryModelStore::new()));
    record_all(
        &cache,
        &ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Dataset),
    );
    let dataset = ChangeSet::compute(&changed, GroupingKey::Company, HashScope::Dataset);
    assert!(cache.should_retrain(&dataset.restricted_to(&acme_only), false));

    // Entity scope: Acme's own records did not change
    let cache = ModelCache::open(Arc::new(MemoryModelStore::new()));
    record_all(
        &cache,
        &ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Entity),
    );
    let entity = ChangeSet::compute(&changed, GroupingKey::Company, HashScope::Entity);
    assert!(!cache.should_retrain(&entity.restricted_to(&acme_only), false));
    assert!(cache.should_retrain(&entity, false));
}

#[test]
fn test_corrupt_registry_is_cold_start() {
    let store = Arc::new(MemoryModelStore::new());
    store.set_raw_registry(b"{\"models\": [truncated").unwrap();

    let cache = ModelCache::open(store.clone());
    assert!(cache.registry().is_none());
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Dataset);
    assert!(cache.should_retrain(&changes, false));

    // Recording overwrites the corrupt document with a valid one
    record_all(&cache, &changes);
    let reloaded = store.load_registry().unwrap().unwrap();
    assert_eq!(reloaded.models.len(), 2);
}

#[test]
fn test_cached_lookup_and_counters() {
    let store = Arc::new(MemoryModelStore::new());
    let cache = ModelCache::open(store.clone());
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Dataset);
    record_all(&cache, &changes);

    let (entry, blob) = cache.cached("ACME").unwrap();
    assert_eq!(blob, b"{}".to_vec());
    assert_eq!(entry.method, ForecastMethod::LinearExtrapolation);
    assert_eq!(entry.last_trained, trained_at());
    assert!(cache.cached("INITECH").is_none());
    assert_eq!(store.model_count(), 2);

    cache.note_lookup(true);
    cache.note_lookup(true);
    cache.note_lookup(false);
    cache.flush().unwrap();
    let saved = store.load_registry().unwrap().unwrap();
    assert_eq!(saved.cache_hits, 2);
    assert_eq!(saved.cache_misses, 1);
    assert_eq!(saved.last_updated, Some(trained_at()));
}

#[test]
fn test_file_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Dataset);

    {
        let store = Arc::new(FileModelStore::new(dir.path(), GroupingKey::Company));
        let cache = ModelCache::open(store);
        record_all(&cache, &changes);
    }

    let store = FileModelStore::new(dir.path(), GroupingKey::Company);
    assert_eq!(
        store.registry_path(),
        dir.path().join("company").join("model_registry.json")
    );
    assert!(store.registry_path().exists());

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.registry_path()).unwrap()).unwrap();
    let acme = &raw["models"]["ACME"];
    assert_eq!(acme["data_hash"], changes.dataset_hash().as_str());
    assert_eq!(acme["method"], "linear_extrapolation");
    assert!(acme["model_location"].as_str().unwrap().ends_with(".model.json"));

    let cache = ModelCache::open(Arc::new(store));
    assert!(!cache.should_retrain(&changes, false));
    assert!(cache.cached("GLOBEX").is_some());

    // Region models live in their own directory
    let region = ModelCache::open(Arc::new(FileModelStore::new(dir.path(), GroupingKey::Region)));
    assert!(region.registry().is_none());
}

#[test]
fn test_missing_blob_is_a_miss() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileModelStore::new(dir.path(), GroupingKey::Company));
    let cache = ModelCache::open(store.clone());
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Dataset);
    record_all(&cache, &changes);

    let (entry, _) = cache.cached("ACME").unwrap();
    std::fs::remove_file(store.root().join(&entry.model_location)).unwrap();
    assert!(cache.cached("ACME").is_none());
}

#[test]
fn test_failure_marker_holds_until_data_changes() {
    let store = Arc::new(MemoryModelStore::new());
    let cache = ModelCache::open(store.clone());
    let changes = ChangeSet::compute(&baseline(), GroupingKey::Company, HashScope::Entity);
    let acme = changes.hash_for("ACME").unwrap();
    cache
        .record("ACME", b"{}", ForecastMethod::Primary, acme, trained_at())
        .unwrap();
    let globex = changes.hash_for("GLOBEX").unwrap();
    cache
        .record_failure("GLOBEX", "every tier failed", globex, trained_at())
        .unwrap();

    // Same data: GLOBEX has no model but failed on exactly this input
    assert!(!cache.should_retrain(&changes, false));
    let reloaded = store.load_registry().unwrap().unwrap();
    assert_eq!(reloaded.failed["GLOBEX"].reason, "every tier failed");

    let mut changed = baseline();
    changed.extend(records(&[("2024-03-07", "Globex", 50.0)]));
    let changed = ChangeSet::compute(&changed, GroupingKey::Company, HashScope::Entity);
    assert!(cache.should_retrain(&changed, false));

    // A successful fit clears the marker
    cache
        .record(
            "GLOBEX",
            b"{}",
            ForecastMethod::LinearExtrapolation,
            changed.hash_for("GLOBEX").unwrap(),
            trained_at(),
        )
        .unwrap();
    assert!(cache.registry().unwrap().failed.is_empty());
    assert!(!cache.should_retrain(&changed, false));
}
