//! Streaming import: buffers incoming items into fixed-size batches, resolves each batch
//! through the [`BatchMerger`] and accumulates resumable progress.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use octofhir_storage::{DynResourceStore, ImportErrorStore};
use tokio_util::sync::CancellationToken;

use super::error::ImportError;
use super::error_entry::{ImportErrorSerializer, OperationOutcomeErrorSerializer};
use super::merge::{BatchMerger, BatchResolution};
use super::resource::{ImportMode, ImportProcessingProgress, ImportResource};

/// Progress plus the error entries produced so far by one invocation.
#[derive(Debug, Default)]
struct ImportState {
    progress: ImportProcessingProgress,
    errors: Vec<String>,
}

/// Drives an import stream into the resource store.
///
/// One importer may serve many invocations; each call to [`ResourceImporter::import`]
/// owns its own buffer and progress.
#[derive(Clone)]
pub struct ResourceImporter {
    merger: BatchMerger,
    serializer: Arc<dyn ImportErrorSerializer>,
}

impl ResourceImporter {
    pub fn new(store: DynResourceStore) -> Self {
        Self {
            merger: BatchMerger::new(store),
            serializer: Arc::new(OperationOutcomeErrorSerializer),
        }
    }

    /// Replaces the error entry format.
    pub fn with_serializer(mut self, serializer: Arc<dyn ImportErrorSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Imports every item of `stream`, `batch_size` items per store transaction.
    ///
    /// Cancellation is checked before each item is pulled; a batch that has started
    /// flushing always runs to completion. The error entries of every completed batch are
    /// uploaded once the invocation ends, whether it finished or aborted, so a resumed
    /// run never needs to report them again.
    ///
    /// # Errors
    ///
    /// - [`ImportError::Cancelled`] when `cancellation` fires.
    /// - [`ImportError::Retriable`] when a store lookup or merge fails. The carried
    ///   progress covers the batches completed before the failure.
    /// - [`ImportError::ErrorUpload`] when the error log cannot be written. This takes
    ///   precedence over a cancellation or store failure of the same invocation.
    pub async fn import<S>(
        &self,
        mut stream: S,
        error_store: &dyn ImportErrorStore,
        mode: ImportMode,
        batch_size: usize,
        cancellation: &CancellationToken,
    ) -> Result<ImportProcessingProgress, ImportError>
    where
        S: Stream<Item = ImportResource> + Unpin,
    {
        if batch_size == 0 {
            return Err(ImportError::InvalidBatchSize(batch_size));
        }

        tracing::info!(mode = %mode, batch_size, "Starting resource import");

        let mut state = ImportState::default();
        let outcome = self
            .drive(&mut stream, mode, batch_size, cancellation, &mut state)
            .await;

        if !state.errors.is_empty() {
            error_store.upload_errors(&state.errors).await.map_err(|e| {
                tracing::error!(
                    error = %e,
                    entries = state.errors.len(),
                    "Failed to upload import errors"
                );
                ImportError::ErrorUpload(e)
            })?;
        }
        outcome?;

        tracing::info!(
            succeeded = state.progress.succeeded_count,
            failed = state.progress.failed_count,
            processed_bytes = state.progress.processed_bytes,
            current_index = state.progress.current_index,
            "Resource import completed"
        );

        Ok(state.progress)
    }

    /// Pulls and flushes batches until the stream ends, the token fires or a flush fails.
    async fn drive<S>(
        &self,
        stream: &mut S,
        mode: ImportMode,
        batch_size: usize,
        cancellation: &CancellationToken,
        state: &mut ImportState,
    ) -> Result<(), ImportError>
    where
        S: Stream<Item = ImportResource> + Unpin,
    {
        let mut buffer: Vec<ImportResource> = Vec::with_capacity(batch_size);
        loop {
            let next = tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    tracing::info!(
                        current_index = state.progress.current_index,
                        buffered = buffer.len(),
                        "Resource import cancelled"
                    );
                    return Err(ImportError::Cancelled { progress: state.progress });
                }
                next = stream.next() => next,
            };
            let Some(resource) = next else { break };

            buffer.push(resource);
            if buffer.len() >= batch_size {
                self.flush(&mut buffer, mode, state).await?;
            }
        }
        self.flush(&mut buffer, mode, state).await
    }

    /// Resolves the buffered items and folds the outcome into `state`. The buffer is left
    /// empty on success.
    async fn flush(
        &self,
        buffer: &mut Vec<ImportResource>,
        mode: ImportMode,
        state: &mut ImportState,
    ) -> Result<(), ImportError> {
        let Some(last_index) = buffer.iter().map(|r| r.stream_index).max() else {
            return Ok(());
        };
        let bytes: u64 = buffer.iter().map(|r| r.byte_length).sum();
        let batch = std::mem::take(buffer);
        let size = batch.len();

        let resolution = self.merger.resolve(batch, mode).await.map_err(|source| {
            tracing::warn!(
                error = %source,
                current_index = state.progress.current_index,
                batch_size = size,
                "Import batch failed, invocation can be retried"
            );
            ImportError::Retriable {
                progress: state.progress,
                source,
            }
        })?;

        self.record(resolution, state);
        let progress = &mut state.progress;
        progress.processed_bytes += bytes;
        progress.current_index = progress.current_index.max(last_index + 1);

        tracing::debug!(
            batch_size = size,
            succeeded = progress.succeeded_count,
            failed = progress.failed_count,
            current_index = progress.current_index,
            "Flushed import batch"
        );
        Ok(())
    }

    fn record(&self, resolution: BatchResolution, state: &mut ImportState) {
        state.progress.succeeded_count += resolution.loaded.len() as u64;
        state.progress.failed_count += resolution.failed_count() as u64;

        let mut entries: Vec<(u64, String)> = Vec::with_capacity(resolution.failed_count());
        for item in &resolution.duplicates {
            let key = item
                .logical_key()
                .map(|k| k.to_string())
                .unwrap_or_default();
            let message = format!("Duplicate resource {key} at index {}", item.stream_index);
            entries.push((
                item.stream_index,
                self.serializer
                    .serialize(item.stream_index, &message, item.byte_offset),
            ));
        }
        for item in &resolution.errored {
            let message = item.import_error().unwrap_or_default();
            entries.push((
                item.stream_index,
                self.serializer
                    .serialize(item.stream_index, message, item.byte_offset),
            ));
        }
        entries.sort_by_key(|(index, _)| *index);
        state.errors.extend(entries.into_iter().map(|(_, entry)| entry));
    }
}
