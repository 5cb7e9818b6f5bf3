//! Serialization of per-record import errors.

use serde_json::json;

/// Turns one failed input item into an error log entry.
pub trait ImportErrorSerializer: Send + Sync {
    fn serialize(&self, stream_index: u64, message: &str, byte_offset: u64) -> String;
}

/// Renders each entry as a single-line FHIR `OperationOutcome`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationOutcomeErrorSerializer;

impl ImportErrorSerializer for OperationOutcomeErrorSerializer {
    fn serialize(&self, stream_index: u64, message: &str, byte_offset: u64) -> String {
        json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": "processing",
                "details": { "text": message },
                "diagnostics": format!(
                    "Failed to process resource at line: {stream_index} with stream start offset: {byte_offset}"
                ),
            }]
        })
        .to_string()
    }
}
