//! # octofhir-storage
//!
//! Storage ports for the OctoFHIR write path.
//!
//! This crate defines the traits and types that storage backends implement for bulk
//! import and bundle commits. It does not contain any implementations - those are
//! provided by separate crates.
//!
//! ## Overview
//!
//! - [`ResourceStore`]: get-by-key and atomic multi-row merge
//! - [`ImportErrorStore`]: append-only sink for per-record import errors
//! - [`StorageError`]: the error type of both, with retriable classification
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_storage::{MergeOperation, ResourceRecord, ResourceStore, StorageError};
//!
//! async fn save(store: &dyn ResourceStore, record: ResourceRecord) -> Result<String, StorageError> {
//!     let applied = store.merge(vec![MergeOperation::upsert(record)]).await?;
//!     Ok(applied[0].version_id.clone().unwrap_or_default())
//! }
//! ```

mod error;
mod traits;
mod types;

// Re-export everything from submodules
pub use error::{ErrorCategory, StorageError};
pub use traits::{ImportErrorStore, ResourceStore};
pub use types::{MergeOperation, ResourceKey, ResourceRecord};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared resource store.
pub type DynResourceStore = std::sync::Arc<dyn ResourceStore>;

/// Type alias for a shared error sink.
pub type DynImportErrorStore = std::sync::Arc<dyn ImportErrorStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::{ImportErrorStore, ResourceStore};
    pub use crate::types::{MergeOperation, ResourceKey, ResourceRecord};
    pub use crate::{DynImportErrorStore, DynResourceStore, StorageResult};
}
