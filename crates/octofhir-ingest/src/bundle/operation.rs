//! A single bundle operation: the barrier its member writes enlist into.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use octofhir_storage::{DynResourceStore, MergeOperation, ResourceKey, ResourceRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use super::error::BundleError;

/// Shared result of an operation's combined commit.
pub type CommitOutcome = Result<Arc<[ResourceRecord]>, BundleError>;

/// Kind of client bundle an operation stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Batch,
    Transaction,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch => write!(f, "batch"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// Lifecycle of an operation.
///
/// ```text
/// Collecting -> Committing -> Completed
///      |             \-------> Abandoned
///      \---------------------> Abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// Accepting enlistments.
    Collecting,
    /// Released; the combined merge is in flight.
    Committing,
    /// The combined merge succeeded.
    Completed,
    /// Failed as a group.
    Abandoned,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collecting => write!(f, "collecting"),
            Self::Committing => write!(f, "committing"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// A resource bound to the operation it is enlisted in.
#[derive(Debug, Clone)]
pub struct OperationResource<T> {
    operation_id: Uuid,
    resource: T,
}

impl<T> OperationResource<T> {
    /// # Errors
    ///
    /// Returns [`BundleError::NullResource`] if `resource` is `None`.
    pub fn new(operation_id: Uuid, resource: Option<T>) -> Result<Self, BundleError> {
        let resource = resource.ok_or(BundleError::NullResource(operation_id))?;
        Ok(Self {
            operation_id,
            resource,
        })
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn resource(&self) -> &T {
        &self.resource
    }

    pub fn into_inner(self) -> T {
        self.resource
    }
}

#[derive(Debug)]
struct Enlistment {
    state: OperationState,
    keys: HashSet<ResourceKey>,
    operations: Vec<MergeOperation>,
}

/// One client bundle whose member writes must commit together.
///
/// Participants call [`BundleOperation::enlist`] concurrently. The participant whose
/// enlistment brings the count to `expected_count` performs a single merge of the whole
/// set; everyone else suspends until that outcome is broadcast.
pub struct BundleOperation {
    id: Uuid,
    kind: OperationKind,
    label: String,
    expected_count: usize,
    store: DynResourceStore,
    enlistment: Mutex<Enlistment>,
    outcome: watch::Sender<Option<CommitOutcome>>,
}

impl BundleOperation {
    pub(crate) fn new(
        id: Uuid,
        kind: OperationKind,
        label: String,
        expected_count: usize,
        store: DynResourceStore,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            id,
            kind,
            label,
            expected_count,
            store,
            enlistment: Mutex::new(Enlistment {
                state: OperationState::Collecting,
                keys: HashSet::with_capacity(expected_count),
                operations: Vec::with_capacity(expected_count),
            }),
            outcome,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    pub fn state(&self) -> OperationState {
        self.enlistment.lock().state
    }

    /// Number of distinct resources enlisted so far.
    pub fn enlisted_count(&self) -> usize {
        self.enlistment.lock().keys.len()
    }

    /// Enlists a member write and waits for the group's commit outcome.
    ///
    /// # Errors
    ///
    /// - [`BundleError::ForeignOperation`] if `resource` was bound to another operation.
    /// - [`BundleError::DuplicateEnlistment`] if the same resource key is already enlisted.
    /// - [`BundleError::OperationClosed`] if the operation was already released.
    /// - The shared failure ([`BundleError::Abandoned`] or [`BundleError::Store`]) if
    ///   the group fails.
    pub async fn enlist(&self, resource: OperationResource<MergeOperation>) -> CommitOutcome {
        if resource.operation_id() != self.id {
            return Err(BundleError::ForeignOperation {
                expected: self.id,
                actual: resource.operation_id(),
            });
        }

        let operation = resource.into_inner();
        let key = operation.key();
        let mut receiver = self.outcome.subscribe();

        let released = {
            let mut enlistment = self.enlistment.lock();
            match enlistment.state {
                OperationState::Collecting => {}
                OperationState::Abandoned => return self.settled_outcome(),
                state => {
                    return Err(BundleError::OperationClosed {
                        operation_id: self.id,
                        state,
                    });
                }
            }
            if !enlistment.keys.insert(key.clone()) {
                return Err(BundleError::DuplicateEnlistment {
                    operation_id: self.id,
                    key,
                });
            }
            enlistment.operations.push(operation);

            if enlistment.operations.len() == self.expected_count {
                enlistment.state = OperationState::Committing;
                Some(std::mem::take(&mut enlistment.operations))
            } else {
                None
            }
        };

        if let Some(operations) = released {
            return self.release(operations).await;
        }

        tracing::debug!(operation_id = %self.id, resource = %key, "Waiting for bundle release");
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(BundleError::Abandoned {
                reason: "operation dropped".to_string(),
            })
        })
    }

    /// Fails the group. Every current and future participant receives
    /// [`BundleError::Abandoned`] with `reason`.
    ///
    /// Returns false if the operation was no longer collecting.
    pub fn abandon(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut enlistment = self.enlistment.lock();
        if enlistment.state != OperationState::Collecting {
            return false;
        }
        enlistment.state = OperationState::Abandoned;
        enlistment.operations.clear();

        tracing::warn!(
            operation_id = %self.id,
            label = %self.label,
            expected = self.expected_count,
            enlisted = enlistment.keys.len(),
            reason = %reason,
            "Bundle operation abandoned"
        );
        self.outcome
            .send_replace(Some(Err(BundleError::Abandoned { reason })));
        true
    }

    async fn release(&self, operations: Vec<MergeOperation>) -> CommitOutcome {
        tracing::info!(
            operation_id = %self.id,
            label = %self.label,
            expected = self.expected_count,
            "Releasing bundle operation"
        );

        let mut guard = ReleaseGuard {
            operation: self,
            armed: true,
        };
        let outcome = match self.store.merge(operations).await {
            Ok(records) => Ok(Arc::from(records)),
            Err(e) => {
                tracing::warn!(
                    operation_id = %self.id,
                    label = %self.label,
                    error = %e,
                    "Bundle commit failed"
                );
                Err(BundleError::Store(e))
            }
        };
        guard.armed = false;

        self.settle(outcome.clone());
        outcome
    }

    fn settle(&self, outcome: CommitOutcome) {
        let mut enlistment = self.enlistment.lock();
        if enlistment.state == OperationState::Committing {
            enlistment.state = if outcome.is_ok() {
                OperationState::Completed
            } else {
                OperationState::Abandoned
            };
        }
        self.outcome.send_replace(Some(outcome));
    }

    fn settled_outcome(&self) -> CommitOutcome {
        self.outcome.borrow().clone().unwrap_or_else(|| {
            Err(BundleError::OperationClosed {
                operation_id: self.id,
                state: OperationState::Abandoned,
            })
        })
    }
}

impl fmt::Debug for BundleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleOperation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("expected_count", &self.expected_count)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Broadcasts an abandonment if the releasing participant is dropped mid-merge.
struct ReleaseGuard<'a> {
    operation: &'a BundleOperation,
    armed: bool,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.operation.settle(Err(BundleError::Abandoned {
                reason: "releasing participant dropped".to_string(),
            }));
        }
    }
}
