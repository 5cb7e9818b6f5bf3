//! NDJSON input for imports.
//!
//! Every line of the input becomes one [`ImportResource`]. The stream index is the
//! zero-based line number, so a resumed import can skip straight to
//! `ImportProcessingProgress::current_index`.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use octofhir_storage::ResourceRecord;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::resource::ImportResource;

/// Reads FHIR resources from newline-delimited JSON.
pub struct NdjsonResourceReader<R> {
    reader: R,
    resource_type: Option<String>,
    start_index: u64,
    index: u64,
    offset: u64,
    done: bool,
}

impl<R> NdjsonResourceReader<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            resource_type: None,
            start_index: 0,
            index: 0,
            offset: 0,
            done: false,
        }
    }

    /// Rejects lines whose `resourceType` differs from `resource_type`.
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Skips lines before `index`, e.g. to resume at a reported `current_index`.
    pub fn starting_at(mut self, index: u64) -> Self {
        self.start_index = index;
        self
    }

    pub fn into_stream(self) -> BoxStream<'static, ImportResource> {
        futures_util::stream::unfold(self, |mut reader| async move {
            reader.next_resource().await.map(|item| (item, reader))
        })
        .boxed()
    }

    async fn next_resource(&mut self) -> Option<ImportResource> {
        let mut line = Vec::new();
        loop {
            if self.done {
                return None;
            }

            line.clear();
            let read = match self.reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(read) => read as u64,
                Err(e) => {
                    self.done = true;
                    tracing::warn!(error = %e, index = self.index, "NDJSON input read failed");
                    return Some(ImportResource::failed(
                        self.index,
                        self.offset,
                        0,
                        format!("Failed to read input: {e}"),
                    ));
                }
            };

            let (index, offset) = (self.index, self.offset);
            self.index += 1;
            self.offset += read;

            if index < self.start_index || line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Some(match self.parse(&line) {
                Ok((record, keep_version)) => {
                    ImportResource::parsed(index, offset, read, record, keep_version)
                }
                Err(message) => ImportResource::failed(index, offset, read, message),
            });
        }
    }

    fn parse(&self, line: &[u8]) -> Result<(ResourceRecord, bool), String> {
        let mut resource: Value =
            serde_json::from_slice(line).map_err(|e| format!("Invalid JSON: {e}"))?;
        let obj = resource
            .as_object_mut()
            .ok_or_else(|| "Resource must be a JSON object".to_string())?;

        let resource_type = obj
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| "Missing resourceType field".to_string())?
            .to_string();
        if let Some(expected) = &self.resource_type
            && *expected != resource_type
        {
            return Err(format!(
                "Expected resourceType '{expected}', got '{resource_type}'"
            ));
        }

        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                obj.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let meta = obj.get("meta");
        let version_id = meta
            .and_then(|m| m.get("versionId"))
            .and_then(Value::as_str)
            .map(String::from);
        let last_modified = match meta
            .and_then(|m| m.get("lastUpdated"))
            .and_then(Value::as_str)
        {
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
                .map_err(|e| format!("Invalid meta.lastUpdated '{raw}': {e}"))?,
            None => OffsetDateTime::now_utc(),
        };

        let keep_version = version_id.is_some();
        let mut record = ResourceRecord::new(resource_type, id, last_modified, resource);
        record.version_id = version_id;
        Ok((record, keep_version))
    }
}
