use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use octofhir_ingest::ImportMode;

#[derive(Parser)]
#[command(name = "octofhir-ingest")]
#[command(about = "Bulk FHIR resource ingestion")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (defaults to ./octofhir-ingest.toml when present)
    #[arg(short, long, global = true, env = "OCTOFHIR_INGEST_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import resources from an NDJSON file
    Import(ImportArgs),
}

#[derive(Args)]
pub struct ImportArgs {
    /// NDJSON input, one resource per line
    pub file: PathBuf,

    /// initial-load or incremental (overrides import.mode)
    #[arg(short, long)]
    pub mode: Option<ImportMode>,

    /// Items per store transaction (overrides import.batch_size)
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Reject lines of any other resource type
    #[arg(short, long)]
    pub resource_type: Option<String>,

    /// Append error entries to this NDJSON file instead of keeping them in memory
    #[arg(short, long)]
    pub errors: Option<PathBuf>,

    /// Skip input lines before this index, e.g. a previously reported currentIndex
    #[arg(long, default_value_t = 0)]
    pub start_index: u64,
}
