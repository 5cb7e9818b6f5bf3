//! Registry of active bundle operations and the switch that turns orchestration on or off.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use octofhir_storage::{DynResourceStore, MergeOperation, ResourceRecord, StorageError};
use papaya::HashMap as PapayaHashMap;
use uuid::Uuid;

use super::error::BundleError;
use super::operation::{BundleOperation, OperationKind, OperationResource, OperationState};

/// Handle to an active operation, shared by all of its participants.
pub type OperationHandle = Arc<BundleOperation>;

const DISABLED_REASON: &str = "bundle orchestration disabled";
const COMPLETED_EARLY_REASON: &str = "operation completed before all resources were enlisted";

/// Coordinates bundle member writes so that each client bundle commits in one merge.
pub struct BundleOrchestrator {
    store: DynResourceStore,
    operations: PapayaHashMap<Uuid, OperationHandle>,
    enabled: AtomicBool,
}

impl BundleOrchestrator {
    pub fn new(store: DynResourceStore, enabled: bool) -> Self {
        Self {
            store,
            operations: PapayaHashMap::new(),
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Whether incoming bundle writes should be coordinated at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turns orchestration on or off. Disabling abandons every active operation.
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::AcqRel);
        if was_enabled && !enabled {
            let operations = self.operations.pin();
            let mut abandoned = 0usize;
            for (_, operation) in operations.iter() {
                if operation.abandon(DISABLED_REASON) {
                    abandoned += 1;
                }
            }
            tracing::info!(abandoned, "Bundle orchestration disabled");
        } else if !was_enabled && enabled {
            tracing::info!("Bundle orchestration enabled");
        }
    }

    /// Number of operations created and not yet completed.
    pub fn active_operations(&self) -> usize {
        self.operations.len()
    }

    /// Allocates an operation expecting exactly `expected_count` distinct enlistments.
    ///
    /// # Errors
    ///
    /// - [`BundleError::Disabled`] when orchestration is switched off.
    /// - [`BundleError::InvalidExpectedCount`] when `expected_count` is 0.
    pub fn create_operation(
        &self,
        kind: OperationKind,
        label: impl Into<String>,
        expected_count: usize,
    ) -> Result<OperationHandle, BundleError> {
        if !self.is_enabled() {
            return Err(BundleError::Disabled);
        }
        if expected_count == 0 {
            return Err(BundleError::InvalidExpectedCount(expected_count));
        }

        let operation = Arc::new(BundleOperation::new(
            Uuid::new_v4(),
            kind,
            label.into(),
            expected_count,
            self.store.clone(),
        ));
        self.operations
            .pin()
            .insert(operation.id(), operation.clone());

        tracing::info!(
            operation_id = %operation.id(),
            label = %operation.label(),
            expected = expected_count,
            kind = %kind,
            "Bundle operation created"
        );
        Ok(operation)
    }

    /// Retires an operation. Returns true only the first time for a given handle.
    ///
    /// Completing an operation that is still collecting abandons its participants. A
    /// commit in flight is left to settle on its own outcome.
    pub fn complete_operation(&self, handle: &OperationHandle) -> bool {
        if self.operations.pin().remove(&handle.id()).is_none() {
            return false;
        }

        if handle.state() == OperationState::Collecting {
            handle.abandon(COMPLETED_EARLY_REASON);
        }

        tracing::info!(
            operation_id = %handle.id(),
            label = %handle.label(),
            expected = handle.expected_count(),
            state = %handle.state(),
            "Bundle operation completed"
        );
        true
    }

    /// Commits one write on its own, without coordination.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Store`] if the merge fails.
    pub async fn commit_independent(
        &self,
        operation: MergeOperation,
    ) -> Result<ResourceRecord, BundleError> {
        let mut applied = self
            .store
            .merge(vec![operation])
            .await
            .map_err(BundleError::Store)?;
        applied.pop().ok_or_else(|| {
            BundleError::Store(StorageError::internal("merge returned no record"))
        })
    }

    /// Routes a write through `handle` when it belongs to a bundle, or commits it
    /// independently otherwise.
    ///
    /// # Errors
    ///
    /// Any error of [`BundleOperation::enlist`] or [`Self::commit_independent`].
    pub async fn submit(
        &self,
        handle: Option<&OperationHandle>,
        operation: MergeOperation,
    ) -> Result<Arc<[ResourceRecord]>, BundleError> {
        match handle {
            Some(handle) => {
                let resource = OperationResource::new(handle.id(), Some(operation))?;
                handle.enlist(resource).await
            }
            None => {
                let record = self.commit_independent(operation).await?;
                Ok(Arc::from(vec![record]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use octofhir_db_memory::InMemoryResourceStore;
    use octofhir_storage::{ResourceKey, ResourceStore};
    use time::OffsetDateTime;
    use tokio::sync::Notify;

    /// Holds every merge until released, then fails it.
    #[derive(Default)]
    struct GatedStore {
        gate: Notify,
    }

    #[async_trait]
    impl ResourceStore for GatedStore {
        async fn get(&self, _keys: &[ResourceKey]) -> Result<Vec<ResourceRecord>, StorageError> {
            Ok(Vec::new())
        }

        async fn merge(
            &self,
            _operations: Vec<MergeOperation>,
        ) -> Result<Vec<ResourceRecord>, StorageError> {
            self.gate.notified().await;
            Err(StorageError::connection_error("failover"))
        }

        fn backend_name(&self) -> &'static str {
            "gated"
        }
    }

    fn write(id: &str) -> MergeOperation {
        MergeOperation::upsert(ResourceRecord::new(
            "Observation",
            id,
            OffsetDateTime::now_utc(),
            serde_json::json!({"resourceType": "Observation", "id": id}),
        ))
    }

    #[test]
    fn test_create_operation_validation() {
        let orchestrator = BundleOrchestrator::new(Arc::new(InMemoryResourceStore::new()), true);

        let err = orchestrator
            .create_operation(OperationKind::Batch, "b", 0)
            .unwrap_err();
        assert!(matches!(err, BundleError::InvalidExpectedCount(0)));

        orchestrator.set_enabled(false);
        let err = orchestrator
            .create_operation(OperationKind::Batch, "b", 2)
            .unwrap_err();
        assert!(matches!(err, BundleError::Disabled));
        assert_eq!(orchestrator.active_operations(), 0);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let orchestrator = BundleOrchestrator::new(Arc::new(InMemoryResourceStore::new()), true);
        let handle = orchestrator
            .create_operation(OperationKind::Transaction, "tx", 2)
            .unwrap();
        assert_eq!(orchestrator.active_operations(), 1);

        assert!(orchestrator.complete_operation(&handle));
        assert!(!orchestrator.complete_operation(&handle));
        assert_eq!(orchestrator.active_operations(), 0);
        // Completed while collecting, so the group failed
        assert_eq!(handle.state(), OperationState::Abandoned);
    }

    #[tokio::test]
    async fn test_complete_during_commit_keeps_the_commit_outcome() {
        let store = Arc::new(GatedStore::default());
        let orchestrator = BundleOrchestrator::new(store.clone(), true);
        let handle = orchestrator
            .create_operation(OperationKind::Transaction, "tx", 1)
            .unwrap();

        let releaser = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let resource = OperationResource::new(handle.id(), Some(write("o1")))?;
                handle.enlist(resource).await
            })
        };
        while handle.state() != OperationState::Committing {
            tokio::task::yield_now().await;
        }

        assert!(orchestrator.complete_operation(&handle));
        assert_eq!(handle.state(), OperationState::Committing);

        store.gate.notify_one();
        let err = releaser.await.unwrap().unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(handle.state(), OperationState::Abandoned);
    }

    #[tokio::test]
    async fn test_disabling_abandons_active_operations() {
        let store = Arc::new(InMemoryResourceStore::new());
        let orchestrator = Arc::new(BundleOrchestrator::new(store.clone(), true));
        let handle = orchestrator
            .create_operation(OperationKind::Transaction, "tx", 2)
            .unwrap();

        let waiter = {
            let orchestrator = orchestrator.clone();
            let handle = handle.clone();
            tokio::spawn(async move { orchestrator.submit(Some(&handle), write("o1")).await })
        };
        while handle.enlisted_count() < 1 {
            tokio::task::yield_now().await;
        }

        orchestrator.set_enabled(false);
        let err = waiter.await.unwrap().unwrap_err();
        let BundleError::Abandoned { reason } = &err else {
            panic!("expected abandonment, got {err:?}");
        };
        assert_eq!(reason, DISABLED_REASON);
        assert_eq!(store.merge_calls(), 0);

        // Independent writes keep working
        let records = orchestrator.submit(None, write("o2")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(store.merge_calls(), 1);
    }

    #[tokio::test]
    async fn test_commit_independent_surfaces_store_errors() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.fail_merges_with(Some(StorageError::connection_error("down")));
        let orchestrator = BundleOrchestrator::new(store, false);

        let err = orchestrator.commit_independent(write("o1")).await.unwrap_err();
        assert!(err.is_retriable());
    }
}
