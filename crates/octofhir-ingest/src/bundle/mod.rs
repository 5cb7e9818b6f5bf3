//! Bundle orchestration.
//!
//! Member writes of one client bundle arrive concurrently from independent callers.
//! The [`BundleOrchestrator`] groups them into a [`BundleOperation`] that releases all
//! of them in a single atomic merge once the expected number of distinct resources has
//! enlisted, and hands every participant the same outcome.

mod error;
mod operation;
mod orchestrator;

pub use error::BundleError;
pub use operation::{
    BundleOperation, CommitOutcome, OperationKind, OperationResource, OperationState,
};
pub use orchestrator::{BundleOrchestrator, OperationHandle};
