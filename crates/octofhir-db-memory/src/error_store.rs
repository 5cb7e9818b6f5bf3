//! In-memory import error sink.

use async_trait::async_trait;
use octofhir_storage::{ImportErrorStore, StorageError};
use parking_lot::Mutex;

/// Append-only in-memory [`ImportErrorStore`].
///
/// Every successful upload is kept as one batch so callers can tell how many uploads
/// happened as well as what was written.
#[derive(Debug, Default)]
pub struct InMemoryErrorStore {
    batches: Mutex<Vec<Vec<String>>>,
    fail_with: Mutex<Option<StorageError>>,
}

impl InMemoryErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent uploads fail with `error` until cleared.
    pub fn fail_uploads_with(&self, error: Option<StorageError>) {
        *self.fail_with.lock() = error;
    }

    /// All uploaded entries, in upload order.
    pub fn entries(&self) -> Vec<String> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of successful uploads.
    pub fn upload_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl ImportErrorStore for InMemoryErrorStore {
    async fn upload_errors(&self, entries: &[String]) -> Result<(), StorageError> {
        if let Some(error) = self.fail_with.lock().clone() {
            return Err(error);
        }
        self.batches.lock().push(entries.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uploads_are_appended() {
        let store = InMemoryErrorStore::new();
        store.upload_errors(&["a".to_string()]).await.unwrap();
        store
            .upload_errors(&["b".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(store.entries(), vec!["a", "b", "c"]);
        assert_eq!(store.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_upload_records_nothing() {
        let store = InMemoryErrorStore::new();
        store.fail_uploads_with(Some(StorageError::connection_error("blob store down")));

        let err = store.upload_errors(&["a".to_string()]).await.unwrap_err();
        assert_eq!(err.to_string(), "Connection error: blob store down");
        assert!(store.entries().is_empty());
    }
}
