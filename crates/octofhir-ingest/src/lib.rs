//! # octofhir-ingest
//!
//! Write-path coordination for OctoFHIR: bulk NDJSON import with batch deduplication,
//! and bundle orchestration that commits the member writes of one client bundle
//! together.
//!
//! Both components talk to storage only through the
//! [`ResourceStore`](octofhir_storage::ResourceStore) port.

pub mod bundle;
pub mod config;
pub mod import;
pub mod observability;

use std::sync::Arc;

use octofhir_storage::DynResourceStore;

pub use bundle::{BundleError, BundleOrchestrator, OperationHandle, OperationKind};
pub use config::IngestConfig;
pub use import::{
    ImportError, ImportMode, ImportProcessingProgress, NdjsonResourceReader, ResourceImporter,
};

/// The importer and orchestrator wired to one store from an [`IngestConfig`].
pub struct IngestEngine {
    pub config: IngestConfig,
    pub importer: ResourceImporter,
    pub orchestrator: Arc<BundleOrchestrator>,
}

impl IngestEngine {
    pub fn new(store: DynResourceStore, config: IngestConfig) -> Self {
        let orchestrator = Arc::new(BundleOrchestrator::new(
            store.clone(),
            config.bundle.enabled,
        ));
        Self {
            importer: ResourceImporter::new(store),
            orchestrator,
            config,
        }
    }
}
