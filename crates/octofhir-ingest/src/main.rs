mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use octofhir_db_memory::{InMemoryErrorStore, InMemoryResourceStore};
use octofhir_ingest::config::loader::load_config;
use octofhir_ingest::import::NdjsonFileErrorStore;
use octofhir_ingest::{IngestEngine, NdjsonResourceReader};
use octofhir_storage::ImportErrorStore;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, ImportArgs};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())
        .map_err(anyhow::Error::msg)
        .context("Configuration error")?;
    octofhir_ingest::observability::init_tracing_with_level(&cfg.logging.level);

    match cli.command {
        Commands::Import(args) => import(cfg, args).await,
    }
}

async fn import(cfg: octofhir_ingest::IngestConfig, args: ImportArgs) -> Result<()> {
    let mode = args.mode.unwrap_or(cfg.import.mode);
    let batch_size = args.batch_size.unwrap_or(cfg.import.batch_size);

    let store = octofhir_db_memory::create_resource_store();
    let engine = IngestEngine::new(store.clone(), cfg);

    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let mut reader = NdjsonResourceReader::new(BufReader::new(file)).starting_at(args.start_index);
    if let Some(resource_type) = args.resource_type {
        reader = reader.with_resource_type(resource_type);
    }

    let memory_errors = Arc::new(InMemoryErrorStore::new());
    let error_store: Arc<dyn ImportErrorStore> = match args.errors {
        Some(path) => Arc::new(NdjsonFileErrorStore::new(path)),
        None => memory_errors.clone(),
    };

    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling import");
                cancellation.cancel();
            }
        });
    }

    let result = engine
        .importer
        .import(
            reader.into_stream(),
            error_store.as_ref(),
            mode,
            batch_size,
            &cancellation,
        )
        .await;

    match result {
        Ok(progress) => {
            println!("{}", serde_json::to_string_pretty(&progress)?);
            for entry in memory_errors.entries() {
                eprintln!("{entry}");
            }
            report_store(&store);
            Ok(())
        }
        Err(e) => {
            if let Some(progress) = e.progress() {
                println!("{}", serde_json::to_string_pretty(progress)?);
            }
            Err(e).context("Import failed")
        }
    }
}

fn report_store(store: &InMemoryResourceStore) {
    tracing::info!(
        resources = store.count(),
        merges = store.merge_calls(),
        "In-memory store state"
    );
}
