use std::sync::Arc;

use octofhir_db_memory::InMemoryResourceStore;
use octofhir_ingest::bundle::{
    BundleError, BundleOrchestrator, OperationHandle, OperationKind, OperationResource,
    OperationState,
};
use octofhir_storage::{MergeOperation, ResourceRecord, StorageError};
use serde_json::json;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

fn write(id: &str) -> MergeOperation {
    MergeOperation::upsert(ResourceRecord::new(
        "Patient",
        id,
        OffsetDateTime::now_utc(),
        json!({"resourceType": "Patient", "id": id}),
    ))
}

fn participant(
    orchestrator: &Arc<BundleOrchestrator>,
    handle: &OperationHandle,
    id: &str,
) -> JoinHandle<Result<Arc<[ResourceRecord]>, BundleError>> {
    let orchestrator = orchestrator.clone();
    let handle = handle.clone();
    let operation = write(id);
    tokio::spawn(async move { orchestrator.submit(Some(&handle), operation).await })
}

async fn wait_for_enlisted(handle: &OperationHandle, count: usize) {
    while handle.enlisted_count() < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn barrier_releases_once_with_shared_outcome() {
    let store = Arc::new(InMemoryResourceStore::new());
    let orchestrator = Arc::new(BundleOrchestrator::new(store.clone(), true));
    let handle = orchestrator
        .create_operation(OperationKind::Transaction, "bundle-1", 3)
        .unwrap();

    let first = participant(&orchestrator, &handle, "p1");
    let second = participant(&orchestrator, &handle, "p2");
    wait_for_enlisted(&handle, 2).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(!first.is_finished());
    assert!(!second.is_finished());
    assert_eq!(store.merge_calls(), 0);
    assert_eq!(handle.state(), OperationState::Collecting);

    let third = participant(&orchestrator, &handle, "p3");
    let outcomes = [
        first.await.unwrap().unwrap(),
        second.await.unwrap().unwrap(),
        third.await.unwrap().unwrap(),
    ];

    assert_eq!(store.merge_calls(), 1);
    assert_eq!(store.count(), 3);
    for outcome in &outcomes {
        assert_eq!(outcome.len(), 3);
        assert!(Arc::ptr_eq(outcome, &outcomes[0]));
    }

    assert!(orchestrator.complete_operation(&handle));
    assert!(!orchestrator.complete_operation(&handle));
    assert_eq!(handle.state(), OperationState::Completed);
    assert_eq!(store.merge_calls(), 1);
}

#[tokio::test]
async fn merge_failure_reaches_every_participant() {
    let store = Arc::new(InMemoryResourceStore::new());
    store.fail_merges_with(Some(StorageError::connection_error("primary lost")));
    let orchestrator = Arc::new(BundleOrchestrator::new(store.clone(), true));
    let handle = orchestrator
        .create_operation(OperationKind::Batch, "bundle-2", 3)
        .unwrap();

    let tasks = [
        participant(&orchestrator, &handle, "p1"),
        participant(&orchestrator, &handle, "p2"),
        participant(&orchestrator, &handle, "p3"),
    ];
    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BundleError::Store(StorageError::ConnectionError { .. })));
        assert!(err.is_retriable());
    }

    assert_eq!(store.count(), 0);
    assert_eq!(handle.state(), OperationState::Abandoned);
    assert!(orchestrator.complete_operation(&handle));
}

#[tokio::test]
async fn abandoned_participant_fails_the_group() {
    let store = Arc::new(InMemoryResourceStore::new());
    let orchestrator = Arc::new(BundleOrchestrator::new(store.clone(), true));
    let handle = orchestrator
        .create_operation(OperationKind::Transaction, "bundle-3", 3)
        .unwrap();

    let first = participant(&orchestrator, &handle, "p1");
    let second = participant(&orchestrator, &handle, "p2");
    wait_for_enlisted(&handle, 2).await;

    // The third member failed validation locally
    assert!(handle.abandon("Patient/p3 failed validation"));

    for task in [first, second] {
        let err = task.await.unwrap().unwrap_err();
        let BundleError::Abandoned { reason } = &err else {
            panic!("expected abandonment, got {err:?}");
        };
        assert_eq!(reason, "Patient/p3 failed validation");
    }
    assert_eq!(store.merge_calls(), 0);
}

#[tokio::test]
async fn disabled_orchestrator_commits_independently() {
    let store = Arc::new(InMemoryResourceStore::new());
    let orchestrator = BundleOrchestrator::new(store.clone(), false);

    assert!(!orchestrator.is_enabled());
    assert!(matches!(
        orchestrator.create_operation(OperationKind::Batch, "b", 2),
        Err(BundleError::Disabled)
    ));

    for id in ["p1", "p2"] {
        let records = orchestrator.submit(None, write(id)).await.unwrap();
        assert_eq!(records[0].id, id);
    }
    assert_eq!(store.merge_calls(), 2);
}

#[tokio::test]
async fn enlistment_contract_violations() {
    let store = Arc::new(InMemoryResourceStore::new());
    let orchestrator = Arc::new(BundleOrchestrator::new(store, true));
    let handle = orchestrator
        .create_operation(OperationKind::Transaction, "bundle-4", 2)
        .unwrap();

    let err = OperationResource::<MergeOperation>::new(handle.id(), None).unwrap_err();
    assert!(err.is_contract_violation());

    let first = participant(&orchestrator, &handle, "p1");
    wait_for_enlisted(&handle, 1).await;
    let err = orchestrator
        .submit(Some(&handle), write("p1"))
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::DuplicateEnlistment { .. }));

    orchestrator.submit(Some(&handle), write("p2")).await.unwrap();
    assert_eq!(first.await.unwrap().unwrap().len(), 2);
}
