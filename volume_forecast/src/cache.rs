//! Persisted per-entity models and the retrain-vs-reuse decision
//!
//! A registry document maps each entity to the hash of the data its model
//! was trained on. The decision compares those hashes with freshly computed
//! ones; [`HashScope`] selects whether that is one whole-dataset hash or a
//! hash of each entity's own records.

use crate::aggregate::GroupingKey;
use crate::config::HashScope;
use crate::data::CleanRecord;
use crate::error::{ForecastError, Result};
use crate::models::ForecastMethod;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const REGISTRY_FILE: &str = "model_registry.json";

/// Order-independent SHA-256 fingerprint of a record set, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataHash(String);

impl DataHash {
    /// Hash records after sorting by date, entity, region and amount
    pub fn of_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a CleanRecord>,
    {
        let mut sorted: Vec<&CleanRecord> = records.into_iter().collect();
        sorted.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then_with(|| a.entity_name.cmp(&b.entity_name))
                .then_with(|| a.region.cmp(&b.region))
                .then_with(|| a.amount.total_cmp(&b.amount))
        });

        let mut hasher = Sha256::new();
        for record in sorted {
            hasher.update(
                format!(
                    "{}|{}|{}|{}\n",
                    record.transaction_date.format("%Y-%m-%dT%H:%M:%S%.f"),
                    record.entity_name,
                    record.region,
                    record.amount
                )
                .as_bytes(),
            );
        }
        DataHash(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fresh hashes of the current data, for one grouping
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    scope: HashScope,
    dataset: DataHash,
    per_entity: BTreeMap<String, DataHash>,
}

impl ChangeSet {
    pub fn compute(records: &[CleanRecord], grouping: GroupingKey, scope: HashScope) -> Self {
        let mut groups: BTreeMap<&str, Vec<&CleanRecord>> = BTreeMap::new();
        for record in records {
            let key = grouping.key_of(record);
            if !key.is_empty() {
                groups.entry(key).or_default().push(record);
            }
        }

        Self {
            scope,
            dataset: DataHash::of_records(records),
            per_entity: groups
                .into_iter()
                .map(|(entity, rows)| (entity.to_string(), DataHash::of_records(rows)))
                .collect(),
        }
    }

    /// Same hashes, limited to the given entities
    pub fn restricted_to(&self, entities: &[String]) -> Self {
        Self {
            scope: self.scope,
            dataset: self.dataset.clone(),
            per_entity: self
                .per_entity
                .iter()
                .filter(|(entity, _)| entities.contains(entity))
                .map(|(entity, hash)| (entity.clone(), hash.clone()))
                .collect(),
        }
    }

    pub fn scope(&self) -> HashScope {
        self.scope
    }

    pub fn dataset_hash(&self) -> &DataHash {
        &self.dataset
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.per_entity.keys().map(String::as_str)
    }

    /// Hash a stored entry for `entity` is compared against.
    ///
    /// Under [`HashScope::Dataset`] this is the whole-dataset hash for
    /// every entity.
    pub fn hash_for(&self, entity: &str) -> Option<&DataHash> {
        match self.scope {
            HashScope::Dataset => self.per_entity.get(entity).map(|_| &self.dataset),
            HashScope::Entity => self.per_entity.get(entity),
        }
    }
}

/// One entity's persisted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub last_trained: NaiveDateTime,
    pub data_hash: DataHash,
    pub model_location: String,
    pub method: ForecastMethod,
}

/// Marker for an entity whose every forecasting tier failed on this data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub last_attempt: NaiveDateTime,
    pub data_hash: DataHash,
    pub reason: String,
}

/// Registry document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistry {
    pub models: BTreeMap<String, RegistryEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed: BTreeMap<String, FailedEntry>,
    pub last_updated: Option<NaiveDateTime>,
    #[serde(default)]
    pub cache_hits: u64,
    #[serde(default)]
    pub cache_misses: u64,
}

/// Get/put storage for the registry document and model blobs
pub trait ModelStore: fmt::Debug + Send + Sync {
    /// `Ok(None)` when no registry has been written yet
    fn load_registry(&self) -> Result<Option<ModelRegistry>>;

    fn save_registry(&self, registry: &ModelRegistry) -> Result<()>;

    /// Store a blob for `entity`, returning its location
    fn put_model(&self, entity: &str, blob: &[u8]) -> Result<String>;

    fn get_model(&self, location: &str) -> Result<Vec<u8>>;
}

/// Registry and blobs under one directory per grouping:
/// `<model_dir>/<grouping>/model_registry.json` and one
/// `<entity>-<hash prefix>.model.json` per entity
#[derive(Debug, Clone)]
pub struct FileModelStore {
    root: PathBuf,
}

impl FileModelStore {
    pub fn new<P: AsRef<Path>>(model_dir: P, grouping: GroupingKey) -> Self {
        Self {
            root: model_dir.as_ref().join(grouping.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// File name for an entity's blob; the hash suffix keeps names that
    /// sanitise alike apart
    fn blob_name(entity: &str) -> String {
        let safe: String = entity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let digest = hex::encode(Sha256::digest(entity.as_bytes()));
        format!("{}-{}.model.json", safe, &digest[..8])
    }

    /// Path of a stored blob. Locations come from the registry document and
    /// must be a bare file name inside the store directory.
    fn blob_path(&self, location: &str) -> Result<PathBuf> {
        let mut components = Path::new(location).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.root.join(name)),
            _ => Err(ForecastError::Registry(format!(
                "Model location {:?} is not a file name in the store",
                location
            ))),
        }
    }
}

impl ModelStore for FileModelStore {
    fn load_registry(&self) -> Result<Option<ModelRegistry>> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        let registry = serde_json::from_slice(&raw).map_err(|e| {
            ForecastError::Registry(format!("{} is corrupt: {}", path.display(), e))
        })?;
        Ok(Some(registry))
    }

    fn save_registry(&self, registry: &ModelRegistry) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.registry_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(registry)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn put_model(&self, entity: &str, blob: &[u8]) -> Result<String> {
        fs::create_dir_all(&self.root)?;
        let name = Self::blob_name(entity);
        fs::write(self.root.join(&name), blob)?;
        Ok(name)
    }

    fn get_model(&self, location: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.blob_path(location)?)?)
    }
}

/// In-memory store; the registry is kept serialised so corrupt documents
/// can be reproduced
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    registry: Mutex<Option<Vec<u8>>>,
    models: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored registry document with raw bytes
    pub fn set_raw_registry(&self, raw: &[u8]) -> Result<()> {
        *lock(&self.registry)? = Some(raw.to_vec());
        Ok(())
    }

    pub fn model_count(&self) -> usize {
        lock(&self.models).map(|m| m.len()).unwrap_or(0)
    }
}

impl ModelStore for MemoryModelStore {
    fn load_registry(&self) -> Result<Option<ModelRegistry>> {
        match lock(&self.registry)?.as_deref() {
            Some(raw) => serde_json::from_slice(raw)
                .map(Some)
                .map_err(|e| ForecastError::Registry(format!("Registry is corrupt: {}", e))),
            None => Ok(None),
        }
    }

    fn save_registry(&self, registry: &ModelRegistry) -> Result<()> {
        *lock(&self.registry)? = Some(serde_json::to_vec(registry)?);
        Ok(())
    }

    fn put_model(&self, entity: &str, blob: &[u8]) -> Result<String> {
        let location = format!("memory://{}", entity);
        lock(&self.models)?.insert(location.clone(), blob.to_vec());
        Ok(location)
    }

    fn get_model(&self, location: &str) -> Result<Vec<u8>> {
        lock(&self.models)?
            .get(location)
            .cloned()
            .ok_or_else(|| ForecastError::Registry(format!("No model at {}", location)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ForecastError::Registry("Model store lock poisoned".to_string()))
}

/// Registry loaded for one request, with serialised writes back to the store
#[derive(Debug)]
pub struct ModelCache {
    store: Arc<dyn ModelStore>,
    registry: Mutex<Option<ModelRegistry>>,
}

impl ModelCache {
    /// Load the registry; an unreadable or corrupt one counts as absent
    pub fn open(store: Arc<dyn ModelStore>) -> Self {
        let registry = match store.load_registry() {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "model registry unreadable, treating as cold start");
                None
            }
        };
        Self {
            store,
            registry: Mutex::new(registry),
        }
    }

    /// Snapshot of the registry as currently held
    pub fn registry(&self) -> Option<ModelRegistry> {
        lock(&self.registry).ok().and_then(|r| r.clone())
    }

    /// Decide whether models must be retrained.
    ///
    /// Forced requests and cold starts always retrain. Otherwise any entity
    /// in `changes` without an entry, or whose stored hash differs from
    /// [`ChangeSet::hash_for`], triggers a retrain of the batch. An entity
    /// with no model but a failure marker for the same hash does not.
    pub fn should_retrain(&self, changes: &ChangeSet, force: bool) -> bool {
        if force {
            info!("force retrain requested");
            return true;
        }
        let guard = match lock(&self.registry) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "registry unavailable, retraining");
                return true;
            }
        };
        let Some(registry) = guard.as_ref() else {
            info!("no existing models, training new ones");
            return true;
        };

        for entity in changes.entities() {
            let hash = changes.hash_for(entity);
            match (registry.models.get(entity), hash) {
                (None, Some(hash))
                    if registry
                        .failed
                        .get(entity)
                        .is_some_and(|failed| failed.data_hash == *hash) =>
                {
                    debug!(entity, "entity failed on this data before, not retraining for it");
                }
                (None, _) => {
                    info!(entity, "new entity found, retraining");
                    return true;
                }
                (Some(entry), Some(hash)) if entry.data_hash != *hash => {
                    info!(entity, scope = ?changes.scope(), "data changed, retraining");
                    return true;
                }
                _ => {}
            }
        }

        debug!("no data changes detected, reusing models");
        false
    }

    /// Stored entry and blob for an entity. Any failure is a miss.
    pub fn cached(&self, entity: &str) -> Option<(RegistryEntry, Vec<u8>)> {
        let entry = lock(&self.registry)
            .ok()?
            .as_ref()?
            .models
            .get(entity)
            .cloned()?;
        match self.store.get_model(&entry.model_location) {
            Ok(blob) => Some((entry, blob)),
            Err(e) => {
                warn!(entity, error = %e, "cached model unreadable");
                None
            }
        }
    }

    /// Persist a freshly trained model and replace the entity's entry
    pub fn record(
        &self,
        entity: &str,
        blob: &[u8],
        method: ForecastMethod,
        data_hash: &DataHash,
        trained_at: NaiveDateTime,
    ) -> Result<()> {
        let model_location = self.store.put_model(entity, blob)?;

        let mut guard = lock(&self.registry)?;
        let registry = guard.get_or_insert_with(ModelRegistry::default);
        registry.models.insert(
            entity.to_string(),
            RegistryEntry {
                last_trained: trained_at,
                data_hash: data_hash.clone(),
                model_location,
                method,
            },
        );
        registry.failed.remove(entity);
        registry.last_updated = Some(trained_at);
        self.store.save_registry(registry)?;
        debug!(entity, %method, "model registry updated");
        Ok(())
    }

    /// Remember that no tier could forecast `entity` on data with this hash
    pub fn record_failure(
        &self,
        entity: &str,
        reason: &str,
        data_hash: &DataHash,
        attempted_at: NaiveDateTime,
    ) -> Result<()> {
        let mut guard = lock(&self.registry)?;
        let registry = guard.get_or_insert_with(ModelRegistry::default);
        registry.failed.insert(
            entity.to_string(),
            FailedEntry {
                last_attempt: attempted_at,
                data_hash: data_hash.clone(),
                reason: reason.to_string(),
            },
        );
        self.store.save_registry(registry)?;
        debug!(entity, "forecast failure recorded");
        Ok(())
    }

    /// Count a reuse (`hit`) or a refit (`!hit`) in the registry
    pub fn note_lookup(&self, hit: bool) {
        if let Ok(mut guard) = lock(&self.registry) {
            if let Some(registry) = guard.as_mut() {
                if hit {
                    registry.cache_hits += 1;
                } else {
                    registry.cache_misses += 1;
                }
            }
        }
    }

    /// Write the held registry back, if there is one
    pub fn flush(&self) -> Result<()> {
        let guard = lock(&self.registry)?;
        match guard.as_ref() {
            Some(registry) => self.store.save_registry(registry),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{clean_records, RawRecord};

    fn records(rows: &[(&str, &str, &str, f64)]) -> Vec<CleanRecord> {
        let raw: Vec<RawRecord> = rows
            .iter()
            .map(|(d, e, r, a)| RawRecord::new(d, e, r, *a))
            .collect();
        clean_records(&raw).0
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = records(&[("2024-01-01", "ACME", "CA", 1.0), ("2024-02-01", "GLOBEX", "NY", 2.0)]);
        let b = records(&[("2024-02-01", "GLOBEX", "NY", 2.0), ("2024-01-01", "ACME", "CA", 1.0)]);
        assert_eq!(DataHash::of_records(&a), DataHash::of_records(&b));
        assert_eq!(DataHash::of_records(&a).as_str().len(), 64);
    }

    #[test]
    fn test_hash_for_by_scope() {
        let rows = records(&[("2024-01-01", "ACME", "CA", 1.0), ("2024-02-01", "GLOBEX", "NY", 2.0)]);
        let dataset = ChangeSet::compute(&rows, GroupingKey::Company, HashScope::Dataset);
        let entity = ChangeSet::compute(&rows, GroupingKey::Company, HashScope::Entity);

        assert_eq!(dataset.hash_for("ACME"), Some(dataset.dataset_hash()));
        assert_ne!(entity.hash_for("ACME"), entity.hash_for("GLOBEX"));
        assert_eq!(dataset.hash_for("INITECH"), None);
    }

    #[test]
    fn test_blob_names_do_not_collide() {
        assert_ne!(FileModelStore::blob_name("A B"), FileModelStore::blob_name("A_B"));
        assert!(FileModelStore::blob_name("A&B CO").starts_with("A_B_CO-"));
    }

    #[test]
    fn test_blob_path_rejects_escaping_locations() {
        let store = FileModelStore::new("/tmp/models", GroupingKey::Company);
        assert!(store.blob_path("ACME-1234abcd.model.json").is_ok());
        for location in ["../secret.json", "/etc/passwd", "nested/blob.json", "", "."] {
            assert!(
                matches!(store.blob_path(location), Err(ForecastError::Registry(_))),
                "{} accepted",
                location
            );
        }
    }

    #[test]
    fn test_memory_store_corrupt_registry() {
        let store = MemoryModelStore::new();
        store.set_raw_registry(b"{not json").unwrap();
        assert!(matches!(store.load_registry(), Err(ForecastError::Registry(_))));
    }
}
