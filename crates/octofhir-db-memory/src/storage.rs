use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use octofhir_storage::{MergeOperation, ResourceKey, ResourceRecord, ResourceStore, StorageError};
use papaya::HashMap as PapayaHashMap;
use parking_lot::Mutex;
use tokio::sync::RwLock;

pub type StorageKey = String; // Format: "ResourceType/id"

pub(crate) fn make_storage_key(resource_type: &str, id: &str) -> StorageKey {
    format!("{resource_type}/{id}")
}

/// Numeric value of a stored version. Versions written by this backend are always numeric.
fn version_number(record: &ResourceRecord) -> u64 {
    record
        .version_id
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// In-memory resource store using a papaya lock-free HashMap for current versions.
///
/// This storage implementation provides:
/// - Lock-free concurrent reads of current versions via papaya::HashMap
/// - Version history guarded by a single writer lock
/// - All-or-nothing multi-row merges
/// - Store-assigned monotonically increasing versions per logical resource
/// - Fault injection and call counters for exercising retry paths
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    /// Current version of every logical resource
    pub(crate) current: Arc<PapayaHashMap<StorageKey, ResourceRecord>>,
    /// History storage: key -> versions in ascending version order
    pub(crate) history: Arc<RwLock<HashMap<StorageKey, Vec<ResourceRecord>>>>,
    get_calls: AtomicU64,
    merge_calls: AtomicU64,
    faults: Mutex<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    get: Option<StorageError>,
    merge: Option<StorageError>,
}

impl InMemoryResourceStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `get` call fail with `error` until cleared.
    pub fn fail_gets_with(&self, error: Option<StorageError>) {
        self.faults.lock().get = error;
    }

    /// Makes every subsequent `merge` call fail with `error` until cleared.
    pub fn fail_merges_with(&self, error: Option<StorageError>) {
        self.faults.lock().merge = error;
    }

    /// Number of `get` calls served so far, including failed ones.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `merge` calls served so far, including failed ones.
    pub fn merge_calls(&self) -> u64 {
        self.merge_calls.load(Ordering::SeqCst)
    }

    /// Number of logical resources currently stored.
    pub fn count(&self) -> usize {
        self.current.pin().len()
    }

    /// Returns the current version of a resource, ignoring any version in `key`.
    pub fn current(&self, key: &ResourceKey) -> Option<ResourceRecord> {
        let storage_key = make_storage_key(&key.resource_type, &key.id);
        self.current.pin().get(&storage_key).cloned()
    }

    /// Returns every stored version of a resource, oldest first.
    pub async fn versions(&self, key: &ResourceKey) -> Vec<ResourceRecord> {
        let storage_key = make_storage_key(&key.resource_type, &key.id);
        let history = self.history.read().await;
        history.get(&storage_key).cloned().unwrap_or_default()
    }

    /// Validates one operation against the staged versions of its resource and applies it
    /// to the staging copy.
    fn apply(
        versions: &mut Vec<ResourceRecord>,
        operation: MergeOperation,
    ) -> Result<ResourceRecord, StorageError> {
        let MergeOperation {
            record,
            allow_create,
            allow_update,
            weak_etag,
            keep_history,
            keep_version,
        } = operation;

        let current = versions.last();
        match current {
            None if !allow_create => {
                return Err(StorageError::not_found(&record.resource_type, &record.id));
            }
            Some(_) if !allow_update => {
                return Err(StorageError::already_exists(record.logical_key()));
            }
            _ => {}
        }

        if let Some(expected) = weak_etag {
            let actual = current
                .and_then(|c| c.version_id.clone())
                .unwrap_or_default();
            if actual != expected {
                return Err(StorageError::version_conflict(expected, actual));
            }
        }

        let applied = if keep_version {
            let version = record.version_id.clone().ok_or_else(|| {
                StorageError::invalid_resource(format!(
                    "{} must carry a version to keep it",
                    record.logical_key()
                ))
            })?;
            version.parse::<u64>().map_err(|_| {
                StorageError::invalid_resource(format!("Version '{version}' is not numeric"))
            })?;
            if versions
                .iter()
                .any(|v| v.version_id.as_deref() == Some(version.as_str()))
            {
                return Err(StorageError::already_exists(record.key()));
            }
            record.assign_version(version)
        } else {
            let next = current.map(version_number).unwrap_or(0) + 1;
            record.assign_version(next.to_string())
        };

        if !keep_history {
            versions.clear();
        }
        let number = version_number(&applied);
        let position = versions.partition_point(|v| version_number(v) < number);
        versions.insert(position, applied.clone());

        Ok(applied)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, keys: &[ResourceKey]) -> Result<Vec<ResourceRecord>, StorageError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.faults.lock().get.clone();
        if let Some(error) = fault {
            return Err(error);
        }

        let mut found = Vec::new();
        let (latest, exact): (Vec<_>, Vec<_>) =
            keys.iter().partition(|key| key.version_id.is_none());

        {
            let guard = self.current.pin();
            for key in latest {
                if let Some(record) = guard.get(&make_storage_key(&key.resource_type, &key.id)) {
                    found.push(record.clone());
                }
            }
        }

        if !exact.is_empty() {
            let history = self.history.read().await;
            for key in exact {
                let storage_key = make_storage_key(&key.resource_type, &key.id);
                if let Some(record) = history.get(&storage_key).and_then(|versions| {
                    versions
                        .iter()
                        .find(|v| v.version_id == key.version_id)
                }) {
                    found.push(record.clone());
                }
            }
        }

        Ok(found)
    }

    async fn merge(
        &self,
        operations: Vec<MergeOperation>,
    ) -> Result<Vec<ResourceRecord>, StorageError> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.faults.lock().merge.clone();
        if let Some(error) = fault {
            return Err(error);
        }

        let mut history = self.history.write().await;

        // Stage every touched resource so a failing operation leaves the store untouched
        let mut staged: HashMap<StorageKey, Vec<ResourceRecord>> = HashMap::new();
        let mut applied = Vec::with_capacity(operations.len());
        for operation in operations {
            let key = make_storage_key(&operation.record.resource_type, &operation.record.id);
            let versions = staged
                .entry(key.clone())
                .or_insert_with(|| history.get(&key).cloned().unwrap_or_default());
            applied.push(Self::apply(versions, operation)?);
        }

        let guard = self.current.pin();
        for (key, versions) in staged {
            if let Some(latest) = versions.last() {
                guard.insert(key.clone(), latest.clone());
            }
            history.insert(key, versions);
        }

        Ok(applied)
    }

    fn backend_name(&self) -> &'static str {
        "in-memory-papaya"
    }
}
