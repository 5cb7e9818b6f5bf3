//! In-memory storage backend for the OctoFHIR write path.
//!
//! This crate provides in-memory implementations of the `ResourceStore` and
//! `ImportErrorStore` ports from `octofhir-storage`, using a papaya lock-free HashMap
//! for concurrent reads of current versions.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_db_memory::InMemoryResourceStore;
//! use octofhir_storage::{MergeOperation, ResourceStore};
//!
//! let store = InMemoryResourceStore::new();
//! let applied = store.merge(vec![MergeOperation::upsert(record)]).await?;
//! assert_eq!(applied[0].version_id.as_deref(), Some("1"));
//! ```

mod error_store;
pub mod storage;

// Re-export the port traits for convenience
pub use octofhir_storage::{ImportErrorStore, ResourceStore, StorageError};

pub use error_store::InMemoryErrorStore;
pub use storage::{InMemoryResourceStore, StorageKey};

/// Creates a new shareable in-memory resource store.
pub fn create_resource_store() -> std::sync::Arc<InMemoryResourceStore> {
    std::sync::Arc::new(InMemoryResourceStore::new())
}
