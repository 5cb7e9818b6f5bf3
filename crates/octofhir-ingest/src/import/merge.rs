//! Batch deduplication and version resolution against the resource store.
//!
//! A batch is resolved in one of two ways depending on [`ImportMode`]:
//!
//! - **InitialLoad**: one item per logical resource survives (earliest `last_modified`),
//!   and it is only written if the store does not know the resource yet.
//! - **Incremental**: exact repeats collapse, explicitly versioned items are written
//!   unless that version is already stored, and version-less items are written with a
//!   store-assigned next version.
//!
//! Items dropped by either policy are reported back as duplicates.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use octofhir_storage::{
    DynResourceStore, MergeOperation, ResourceKey, ResourceRecord, StorageError,
};
use time::OffsetDateTime;

use super::resource::{ImportMode, ImportResource};

/// Outcome of resolving one batch.
#[derive(Debug, Default)]
pub struct BatchResolution {
    /// Items whose records were committed.
    pub loaded: Vec<ImportResource>,
    /// Items dropped as duplicates of another item or of stored state.
    pub duplicates: Vec<ImportResource>,
    /// Items that arrived with an upstream error, or carried a kept version the store
    /// cannot accept. None of them reached the store.
    pub errored: Vec<ImportResource>,
    /// Records as applied by the store, with their final versions.
    pub applied: Vec<ResourceRecord>,
}

impl BatchResolution {
    /// Number of items in the batch that produced an error entry.
    pub fn failed_count(&self) -> usize {
        self.duplicates.len() + self.errored.len()
    }
}

/// A clean item under consideration. `slot` indexes the batch's clean items.
#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    slot: usize,
    stream_index: u64,
    keep_version: bool,
    record: &'a ResourceRecord,
}

impl Candidate<'_> {
    fn logical_key(&self) -> ResourceKey {
        self.record.logical_key()
    }

    fn date_key(&self) -> (ResourceKey, OffsetDateTime) {
        (self.record.logical_key(), self.record.last_modified)
    }
}

/// Keeps one candidate per key. `replaces(new, current)` decides whether a later
/// candidate displaces the one already kept. The result is in stream order.
fn select<'a, K, F, P>(candidates: &[Candidate<'a>], key: F, replaces: P) -> Vec<Candidate<'a>>
where
    K: Hash + Eq,
    F: Fn(&Candidate<'a>) -> K,
    P: Fn(&Candidate<'a>, &Candidate<'a>) -> bool,
{
    let mut kept: HashMap<K, Candidate<'a>> = HashMap::with_capacity(candidates.len());
    for candidate in candidates {
        match kept.entry(key(candidate)) {
            Entry::Vacant(entry) => {
                entry.insert(*candidate);
            }
            Entry::Occupied(mut entry) => {
                if replaces(candidate, entry.get()) {
                    entry.insert(*candidate);
                }
            }
        }
    }
    let mut selected: Vec<_> = kept.into_values().collect();
    selected.sort_by_key(|c| c.stream_index);
    selected
}

fn earliest_modified(new: &Candidate<'_>, current: &Candidate<'_>) -> bool {
    let new_rank = (new.record.last_modified, new.stream_index);
    new_rank < (current.record.last_modified, current.stream_index)
}

fn first_in_stream(new: &Candidate<'_>, current: &Candidate<'_>) -> bool {
    new.stream_index < current.stream_index
}

fn last_in_stream(new: &Candidate<'_>, current: &Candidate<'_>) -> bool {
    new.stream_index > current.stream_index
}

/// Explains why an item's explicit version cannot be written verbatim. Kept versions
/// must be numeric so the store can order them.
fn invalid_kept_version(item: &ImportResource) -> Option<String> {
    let record = item.record()?;
    let version = record.version_id.as_deref()?;
    if !item.keep_version || version.parse::<u64>().is_ok() {
        return None;
    }
    Some(format!(
        "Invalid meta.versionId '{version}' for {}: must be numeric",
        record.logical_key()
    ))
}

/// Resolves import batches against a [`ResourceStore`](octofhir_storage::ResourceStore).
#[derive(Clone)]
pub struct BatchMerger {
    store: DynResourceStore,
}

impl BatchMerger {
    pub fn new(store: DynResourceStore) -> Self {
        Self { store }
    }

    /// Deduplicates `batch`, commits the survivors and reports what happened to every item.
    ///
    /// # Errors
    ///
    /// Any lookup or merge failure is returned as-is. Whatever was merged before the
    /// failure stays merged; re-resolving the same batch turns it into duplicates.
    pub async fn resolve(
        &self,
        batch: Vec<ImportResource>,
        mode: ImportMode,
    ) -> Result<BatchResolution, StorageError> {
        let (clean, mut errored): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(|item| item.record().is_some());
        let (clean, rejected): (Vec<_>, Vec<_>) = clean
            .into_iter()
            .partition(|item| invalid_kept_version(item).is_none());
        for item in rejected {
            let message = invalid_kept_version(&item).unwrap_or_default();
            errored.push(ImportResource::failed(
                item.stream_index,
                item.byte_offset,
                item.byte_length,
                message,
            ));
        }

        let candidates: Vec<Candidate<'_>> = clean
            .iter()
            .enumerate()
            .filter_map(|(slot, item)| {
                item.record().map(|record| Candidate {
                    slot,
                    stream_index: item.stream_index,
                    keep_version: item.keep_version && record.version_id.is_some(),
                    record,
                })
            })
            .collect();

        let (committed, applied) = match mode {
            ImportMode::InitialLoad => self.resolve_initial_load(&candidates).await?,
            ImportMode::Incremental => self.resolve_incremental(&candidates).await?,
        };
        drop(candidates);

        let mut resolution = BatchResolution {
            errored,
            applied,
            ..Default::default()
        };
        for (slot, item) in clean.into_iter().enumerate() {
            if committed.contains(&slot) {
                resolution.loaded.push(item);
            } else {
                resolution.duplicates.push(item);
            }
        }

        tracing::debug!(
            mode = %mode,
            loaded = resolution.loaded.len(),
            duplicates = resolution.duplicates.len(),
            errored = resolution.errored.len(),
            "Resolved import batch"
        );

        Ok(resolution)
    }

    async fn resolve_initial_load(
        &self,
        candidates: &[Candidate<'_>],
    ) -> Result<(HashSet<usize>, Vec<ResourceRecord>), StorageError> {
        let mut survivors = select(candidates, Candidate::logical_key, earliest_modified);

        let keys: Vec<ResourceKey> = survivors.iter().map(Candidate::logical_key).collect();
        let existing: HashSet<ResourceKey> = self
            .lookup(&keys)
            .await?
            .iter()
            .map(ResourceRecord::logical_key)
            .collect();
        survivors.retain(|c| !existing.contains(&c.logical_key()));

        let applied = self.merge(&survivors).await?;
        Ok((survivors.iter().map(|c| c.slot).collect(), applied))
    }

    async fn resolve_incremental(
        &self,
        candidates: &[Candidate<'_>],
    ) -> Result<(HashSet<usize>, Vec<ResourceRecord>), StorageError> {
        let representatives = select(candidates, Candidate::date_key, first_in_stream);
        let (versioned, unversioned): (Vec<_>, Vec<_>) =
            representatives.into_iter().partition(|c| c.keep_version);

        // Explicit versions: skip the ones the store already has
        let mut versioned = select(&versioned, |c| c.record.key(), first_in_stream);
        let keys: Vec<ResourceKey> = versioned.iter().map(|c| c.record.key()).collect();
        let existing: HashSet<ResourceKey> = self
            .lookup(&keys)
            .await?
            .iter()
            .map(ResourceRecord::key)
            .collect();
        versioned.retain(|c| !existing.contains(&c.record.key()));
        let mut applied = self.merge(&versioned).await?;

        // No version: one write per logical resource, the store assigns the next version
        let unversioned = select(&unversioned, Candidate::logical_key, last_in_stream);
        applied.extend(self.merge(&unversioned).await?);

        let committed = versioned
            .iter()
            .chain(unversioned.iter())
            .map(|c| c.slot)
            .collect();
        Ok((committed, applied))
    }

    async fn lookup(&self, keys: &[ResourceKey]) -> Result<Vec<ResourceRecord>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.store.get(keys).await
    }

    async fn merge(&self, selected: &[Candidate<'_>]) -> Result<Vec<ResourceRecord>, StorageError> {
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let operations = selected
            .iter()
            .map(|c| MergeOperation::upsert(c.record.clone()).keep_version(c.keep_version))
            .collect();
        self.store.merge(operations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_db_memory::InMemoryResourceStore;
    use octofhir_storage::ResourceStore;
    use std::sync::Arc;
    use time::Duration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    fn record(id: &str, offset_secs: i64) -> ResourceRecord {
        ResourceRecord::new(
            "Patient",
            id,
            T0 + Duration::seconds(offset_secs),
            serde_json::json!({"resourceType": "Patient", "id": id}),
        )
    }

    fn item(index: u64, record: ResourceRecord) -> ImportResource {
        ImportResource::parsed(index, index * 100, 100, record, false)
    }

    fn versioned(index: u64, id: &str, version: &str, offset_secs: i64) -> ImportResource {
        let record = record(id, offset_secs).with_version(version);
        ImportResource::parsed(index, index * 100, 100, record, true)
    }

    fn indices(items: &[ImportResource]) -> Vec<u64> {
        items.iter().map(|i| i.stream_index).collect()
    }

    fn merger() -> (Arc<InMemoryResourceStore>, BatchMerger) {
        let store = Arc::new(InMemoryResourceStore::new());
        (store.clone(), BatchMerger::new(store))
    }

    #[tokio::test]
    async fn test_initial_load_keeps_earliest_modified() {
        let (store, merger) = merger();
        let batch = vec![
            item(0, record("a", 30)),
            item(1, record("a", 10)),
            item(2, record("b", 0)),
        ];

        let resolution = merger.resolve(batch, ImportMode::InitialLoad).await.unwrap();

        assert_eq!(indices(&resolution.loaded), vec![1, 2]);
        assert_eq!(indices(&resolution.duplicates), vec![0]);
        let stored = store.current(&ResourceKey::new("Patient", "a")).unwrap();
        assert_eq!(stored.last_modified, T0 + Duration::seconds(10));
        assert_eq!(store.merge_calls(), 1);
    }

    #[tokio::test]
    async fn test_initial_load_skips_resources_already_stored() {
        let (store, merger) = merger();
        let batch = vec![item(0, record("a", 0)), item(1, record("a", 5))];

        let first = merger.resolve(batch.clone(), ImportMode::InitialLoad).await.unwrap();
        assert_eq!(first.loaded.len(), 1);

        let second = merger.resolve(batch, ImportMode::InitialLoad).await.unwrap();
        assert!(second.loaded.is_empty());
        assert_eq!(indices(&second.duplicates), vec![0, 1]);
        // Nothing left to write, so no second merge
        assert_eq!(store.merge_calls(), 1);
    }

    #[tokio::test]
    async fn test_errored_items_never_reach_the_store() {
        let (store, merger) = merger();
        let batch = vec![
            ImportResource::failed(0, 0, 12, "Invalid JSON"),
            ImportResource::failed(1, 12, 9, "Missing resourceType"),
        ];

        let resolution = merger.resolve(batch, ImportMode::InitialLoad).await.unwrap();

        assert_eq!(indices(&resolution.errored), vec![0, 1]);
        assert_eq!(resolution.failed_count(), 2);
        assert_eq!(store.get_calls(), 0);
        assert_eq!(store.merge_calls(), 0);
    }

    #[tokio::test]
    async fn test_non_numeric_kept_version_is_a_record_error() {
        let (store, merger) = merger();
        let batch = vec![item(0, record("a", 0)), versioned(1, "b", "abc", 0)];

        let resolution = merger.resolve(batch, ImportMode::Incremental).await.unwrap();

        assert_eq!(indices(&resolution.loaded), vec![0]);
        assert_eq!(indices(&resolution.errored), vec![1]);
        assert_eq!(
            resolution.errored[0].import_error(),
            Some("Invalid meta.versionId 'abc' for Patient/b: must be numeric")
        );
        assert_eq!(resolution.errored[0].byte_offset, 100);
        assert!(store.current(&ResourceKey::new("Patient", "b")).is_none());
    }

    #[tokio::test]
    async fn test_incremental_collapses_exact_repeats() {
        let (store, merger) = merger();
        let batch = vec![item(0, record("a", 0)), item(1, record("a", 0))];

        let resolution = merger.resolve(batch, ImportMode::Incremental).await.unwrap();

        assert_eq!(indices(&resolution.loaded), vec![0]);
        assert_eq!(indices(&resolution.duplicates), vec![1]);
        assert_eq!(store.versions(&ResourceKey::new("Patient", "a")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_incremental_explicit_versions() {
        let (store, merger) = merger();
        let batch = vec![
            versioned(0, "a", "3", 0),
            versioned(1, "a", "3", 60),
            versioned(2, "a", "4", 120),
        ];

        let resolution = merger.resolve(batch, ImportMode::Incremental).await.unwrap();

        assert_eq!(indices(&resolution.loaded), vec![0, 2]);
        assert_eq!(indices(&resolution.duplicates), vec![1]);
        let versions: Vec<_> = store
            .versions(&ResourceKey::new("Patient", "a"))
            .await
            .into_iter()
            .filter_map(|r| r.version_id)
            .collect();
        assert_eq!(versions, vec!["3", "4"]);

        // The same explicit version arriving again is a duplicate of stored state
        let again = merger
            .resolve(vec![versioned(3, "a", "4", 300)], ImportMode::Incremental)
            .await
            .unwrap();
        assert!(again.loaded.is_empty());
        assert_eq!(indices(&again.duplicates), vec![3]);
    }

    #[tokio::test]
    async fn test_incremental_versionless_last_in_stream_wins() {
        let (store, merger) = merger();
        let batch = vec![
            item(0, record("a", 0)),
            item(1, record("a", 50)),
            item(2, record("a", 20)),
        ];

        let resolution = merger.resolve(batch, ImportMode::Incremental).await.unwrap();

        assert_eq!(indices(&resolution.loaded), vec![2]);
        assert_eq!(indices(&resolution.duplicates), vec![0, 1]);
        let current = store.current(&ResourceKey::new("Patient", "a")).unwrap();
        assert_eq!(current.last_modified, T0 + Duration::seconds(20));
        assert_eq!(current.version_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_incremental_assigns_next_version_after_stored() {
        let (store, merger) = merger();
        store
            .merge(vec![MergeOperation::upsert(record("a", 0))])
            .await
            .unwrap();

        let resolution = merger
            .resolve(vec![item(0, record("a", 10))], ImportMode::Incremental)
            .await
            .unwrap();

        assert_eq!(resolution.applied[0].version_id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_keep_version_without_version_is_assigned() {
        let (_, merger) = merger();
        let batch = vec![ImportResource::parsed(0, 0, 10, record("a", 0), true)];

        let resolution = merger.resolve(batch, ImportMode::Incremental).await.unwrap();

        assert_eq!(resolution.loaded.len(), 1);
        assert_eq!(resolution.applied[0].version_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_store_failures_are_returned() {
        let (store, merger) = merger();
        store.fail_gets_with(Some(StorageError::connection_error("timeout")));

        let err = merger
            .resolve(vec![item(0, record("a", 0))], ImportMode::InitialLoad)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Connection error: timeout");

        store.fail_gets_with(None);
        store.fail_merges_with(Some(StorageError::transaction_error("deadlock")));
        let err = merger
            .resolve(vec![item(0, record("a", 0))], ImportMode::Incremental)
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }
}
