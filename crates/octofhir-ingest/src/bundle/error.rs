//! Bundle orchestration errors.

use octofhir_storage::{ResourceKey, StorageError};
use uuid::Uuid;

use super::operation::OperationState;

/// Errors returned by the bundle orchestrator.
///
/// Cloneable so a single commit outcome can be handed to every participant of an
/// operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BundleError {
    #[error("Expected resource count must be at least 1, got {0}")]
    InvalidExpectedCount(usize),

    #[error("Bundle orchestration is disabled")]
    Disabled,

    #[error("Resource {key} is already enlisted in operation {operation_id}")]
    DuplicateEnlistment { operation_id: Uuid, key: ResourceKey },

    #[error("Operation {operation_id} is {state} and no longer accepts resources")]
    OperationClosed {
        operation_id: Uuid,
        state: OperationState,
    },

    #[error("Resource was enlisted for operation {actual}, not {expected}")]
    ForeignOperation { expected: Uuid, actual: Uuid },

    #[error("Enlistment for operation {0} carries no resource")]
    NullResource(Uuid),

    /// The group failed without a commit outcome. Nothing was written unless the
    /// releasing participant was dropped while its merge was in flight.
    #[error("Bundle operation abandoned: {reason}")]
    Abandoned { reason: String },

    /// The combined merge failed; nothing was written.
    #[error("Bundle commit failed: {0}")]
    Store(#[source] StorageError),
}

impl BundleError {
    /// Returns true if the caller may retry the whole bundle.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retriable())
    }

    /// Returns true for misuse of the orchestrator API by the caller.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidExpectedCount(_)
                | Self::DuplicateEnlistment { .. }
                | Self::OperationClosed { .. }
                | Self::ForeignOperation { .. }
                | Self::NullResource(_)
        )
    }
}
