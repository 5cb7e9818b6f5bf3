//! Items flowing through an import and the progress accumulated over them.

use std::fmt;
use std::str::FromStr;

use octofhir_storage::{ResourceKey, ResourceRecord};
use serde::{Deserialize, Serialize};

/// How incoming versions are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportMode {
    /// Bulk first load. Versions are not meaningful yet and a logical resource is
    /// written at most once.
    InitialLoad,
    /// Ongoing ingestion. Explicit versions are preserved and the store assigns the
    /// rest.
    #[default]
    Incremental,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitialLoad => write!(f, "initial-load"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initial-load" | "initialload" | "initial_load" => Ok(Self::InitialLoad),
            "incremental" | "incremental-load" | "incrementalload" => Ok(Self::Incremental),
            other => Err(format!(
                "unknown import mode '{other}', expected initial-load or incremental"
            )),
        }
    }
}

/// What an input item carries: a parsed record, or the reason it could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportContent {
    Resource(ResourceRecord),
    Error(String),
}

/// One item read from the input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportResource {
    /// Position in the input; strictly increasing and the basis for resuming.
    pub stream_index: u64,
    /// Offset of the item's first byte in the input.
    pub byte_offset: u64,
    /// Size of the item in the input, in bytes.
    pub byte_length: u64,
    /// Whether the record's explicit version must be written verbatim.
    pub keep_version: bool,
    pub content: ImportContent,
}

impl ImportResource {
    /// Creates an item for a successfully parsed record.
    pub fn parsed(
        stream_index: u64,
        byte_offset: u64,
        byte_length: u64,
        record: ResourceRecord,
        keep_version: bool,
    ) -> Self {
        Self {
            stream_index,
            byte_offset,
            byte_length,
            keep_version,
            content: ImportContent::Resource(record),
        }
    }

    /// Creates an item that failed upstream and goes straight to the error log.
    pub fn failed(
        stream_index: u64,
        byte_offset: u64,
        byte_length: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stream_index,
            byte_offset,
            byte_length,
            keep_version: false,
            content: ImportContent::Error(error.into()),
        }
    }

    pub fn record(&self) -> Option<&ResourceRecord> {
        match &self.content {
            ImportContent::Resource(record) => Some(record),
            ImportContent::Error(_) => None,
        }
    }

    pub fn import_error(&self) -> Option<&str> {
        match &self.content {
            ImportContent::Resource(_) => None,
            ImportContent::Error(error) => Some(error),
        }
    }

    /// Version-insensitive key of the carried record.
    pub fn logical_key(&self) -> Option<ResourceKey> {
        self.record().map(ResourceRecord::logical_key)
    }
}

/// Resumable progress of one import invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProcessingProgress {
    pub succeeded_count: u64,
    pub failed_count: u64,
    pub processed_bytes: u64,
    /// Last processed stream index + 1; a restarted import resumes here.
    pub current_index: u64,
}
