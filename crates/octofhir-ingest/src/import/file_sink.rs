//! File-backed import error sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use octofhir_storage::{ImportErrorStore, StorageError};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends error entries to an NDJSON file, one entry per line.
///
/// The file is created on the first upload. Concurrent uploads through the same sink
/// are serialized so entries never interleave.
#[derive(Debug)]
pub struct NdjsonFileErrorStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl NdjsonFileErrorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImportErrorStore for NdjsonFileErrorStore {
    async fn upload_errors(&self, entries: &[String]) -> Result<(), StorageError> {
        let mut payload = String::with_capacity(entries.iter().map(|e| e.len() + 1).sum());
        for entry in entries {
            payload.push_str(entry);
            payload.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        let io_error = |e: std::io::Error| {
            StorageError::connection_error(format!(
                "Failed to write import errors to {}: {e}",
                self.path.display()
            ))
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_error)?;
        file.write_all(payload.as_bytes()).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;

        tracing::debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "Uploaded import errors"
        );
        Ok(())
    }
}
