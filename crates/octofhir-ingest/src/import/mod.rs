//! Bulk resource import.
//!
//! An import consumes a stream of [`ImportResource`] items, groups them into batches,
//! deduplicates each batch against itself and the store, and merges the survivors in one
//! store transaction per batch. Items that cannot be imported are written to an
//! [`ImportErrorStore`](octofhir_storage::ImportErrorStore) once the stream is done.
//!
//! ```ignore
//! let importer = ResourceImporter::new(store);
//! let input = NdjsonResourceReader::new(BufReader::new(file)).into_stream();
//! let progress = importer
//!     .import(input, &errors, ImportMode::InitialLoad, 1000, &CancellationToken::new())
//!     .await?;
//! ```

mod error;
mod error_entry;
mod file_sink;
mod merge;
mod ndjson;
mod pipeline;
mod resource;

pub use error::ImportError;
pub use error_entry::{ImportErrorSerializer, OperationOutcomeErrorSerializer};
pub use file_sink::NdjsonFileErrorStore;
pub use merge::{BatchMerger, BatchResolution};
pub use ndjson::NdjsonResourceReader;
pub use pipeline::ResourceImporter;
pub use resource::{ImportContent, ImportMode, ImportProcessingProgress, ImportResource};
