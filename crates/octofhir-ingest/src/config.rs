use serde::{Deserialize, Serialize};

use crate::import::ImportMode;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "octofhir-ingest.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub bundle: BundleSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.import.batch_size == 0 {
            return Err("import.batch_size must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    /// Items per store transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub mode: ImportMode,
}
fn default_batch_size() -> usize {
    1000
}
impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            mode: ImportMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSettings {
    /// Coordinate bundle member writes into one commit per bundle.
    #[serde(default = "default_true")]
    pub enabled: bool,
}
fn default_true() -> bool {
    true
}
impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::{DEFAULT_CONFIG_FILE, IngestConfig};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads the config file (if present) and applies `OCTOFHIR_INGEST__*` overrides,
    /// e.g. `OCTOFHIR_INGEST__IMPORT__BATCH_SIZE=500`.
    pub fn load_config(path: Option<&str>) -> Result<IngestConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_INGEST")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: IngestConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
