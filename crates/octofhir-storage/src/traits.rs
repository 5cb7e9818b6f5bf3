//! Storage traits for the write path.
//!
//! Two ports are defined here: [`ResourceStore`], the physical store the import engine and
//! the bundle orchestrator commit into, and [`ImportErrorStore`], the durable sink for
//! per-record import errors.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{MergeOperation, ResourceKey, ResourceRecord};

/// The resource store port.
///
/// Implementations must be thread-safe (`Send + Sync`) and must apply each
/// [`merge`](ResourceStore::merge) call atomically: either every operation in the call is
/// applied or none is.
///
/// # Example
///
/// ```ignore
/// use octofhir_storage::{MergeOperation, ResourceKey, ResourceStore};
///
/// async fn upsert_if_absent(store: &dyn ResourceStore, record: ResourceRecord) -> Result<(), StorageError> {
///     if store.get(&[record.logical_key()]).await?.is_empty() {
///         store.merge(vec![MergeOperation::upsert(record)]).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Looks up records by key.
    ///
    /// Keys without a version resolve to the current version of the logical resource;
    /// keys with a version resolve to that exact version. Only matches are returned,
    /// in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, never for missing records.
    async fn get(&self, keys: &[ResourceKey]) -> Result<Vec<ResourceRecord>, StorageError>;

    /// Applies a set of merge operations as one atomic unit.
    ///
    /// Returns the applied records with their final versions, in operation order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists`, `StorageError::NotFound` or
    /// `StorageError::VersionConflict` when an operation's preconditions fail, and
    /// infrastructure errors otherwise. On error nothing is applied.
    async fn merge(
        &self,
        operations: Vec<MergeOperation>,
    ) -> Result<Vec<ResourceRecord>, StorageError>;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Durable, append-only sink for import error entries.
#[async_trait]
pub trait ImportErrorStore: Send + Sync {
    /// Appends a batch of serialized error entries.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the import invocation that produced the entries.
    async fn upload_errors(&self, entries: &[String]) -> Result<(), StorageError>;
}
