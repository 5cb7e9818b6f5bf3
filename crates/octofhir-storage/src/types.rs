//! Storage types for the resource store ports.
//!
//! This module defines the records and keys exchanged with a [`ResourceStore`](crate::ResourceStore).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Identifies a resource, or one specific version of it.
///
/// With `version_id` absent the key names the "latest" slot of the logical resource.
/// Two keys with the same type and id but different versions are different records;
/// use [`ResourceKey::logical`] when the comparison must ignore the version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    /// The resource type (e.g., "Patient", "Observation").
    pub resource_type: String,
    /// The logical resource ID.
    pub id: String,
    /// The version ID, if the key names a specific version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl ResourceKey {
    /// Creates a key for the latest version of a resource.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: None,
        }
    }

    /// Creates a key for a specific version of a resource.
    #[must_use]
    pub fn versioned(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: Some(version_id.into()),
        }
    }

    /// Returns the same key with the version removed.
    #[must_use]
    pub fn logical(&self) -> Self {
        Self {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            version_id: None,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_id {
            Some(version) => write!(f, "{}/{}/_history/{version}", self.resource_type, self.id),
            None => write!(f, "{}/{}", self.resource_type, self.id),
        }
    }
}

/// A resource as exchanged with the storage backend.
///
/// Records are immutable once handed to the write path. Version assignment by the store
/// produces a new record rather than mutating the caller's copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// The resource type (e.g., "Patient", "Observation").
    pub resource_type: String,
    /// The resource ID.
    pub id: String,
    /// The version ID; absent until the store assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// When this version was last modified.
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    /// The full resource content as JSON.
    pub resource: Value,
    /// Pre-extracted search index data. Opaque to the write path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_index: Option<Value>,
}

impl ResourceRecord {
    /// Creates a new record with no version and the given modification time.
    #[must_use]
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        last_modified: OffsetDateTime,
        resource: Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: None,
            last_modified,
            resource,
            search_index: None,
        }
    }

    /// Sets an explicit version ID.
    #[must_use]
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Attaches search index data.
    #[must_use]
    pub fn with_search_index(mut self, search_index: Value) -> Self {
        self.search_index = Some(search_index);
        self
    }

    /// Returns the key of this record, including its version when present.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            version_id: self.version_id.clone(),
        }
    }

    /// Returns the version-insensitive key of this record.
    #[must_use]
    pub fn logical_key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.id.clone())
    }

    /// Returns a copy of this record bound to a store-assigned version.
    ///
    /// `meta.versionId` and `meta.lastUpdated` in the payload are rewritten to match.
    #[must_use]
    pub fn assign_version(&self, version_id: impl Into<String>) -> Self {
        let version_id = version_id.into();
        let mut resource = self.resource.clone();
        if let Some(obj) = resource.as_object_mut() {
            let last_updated = self
                .last_modified
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default();
            obj.insert(
                "meta".to_string(),
                serde_json::json!({
                    "versionId": version_id,
                    "lastUpdated": last_updated,
                }),
            );
        }
        Self {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            version_id: Some(version_id),
            last_modified: self.last_modified,
            resource,
            search_index: self.search_index.clone(),
        }
    }
}

/// A single row of a multi-row merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOperation {
    /// The record to write.
    pub record: ResourceRecord,
    /// Whether the merge may create a resource that does not exist yet.
    pub allow_create: bool,
    /// Whether the merge may replace an existing resource.
    pub allow_update: bool,
    /// If set, the current version must match this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weak_etag: Option<String>,
    /// Whether earlier versions are retained in history.
    pub keep_history: bool,
    /// Whether the record's own version is written verbatim instead of assigning the next one.
    pub keep_version: bool,
}

impl MergeOperation {
    /// Creates an upsert operation that keeps history and lets the store assign versions.
    #[must_use]
    pub fn upsert(record: ResourceRecord) -> Self {
        Self {
            record,
            allow_create: true,
            allow_update: true,
            weak_etag: None,
            keep_history: true,
            keep_version: false,
        }
    }

    /// Sets whether the record's explicit version is preserved.
    #[must_use]
    pub fn keep_version(mut self, keep_version: bool) -> Self {
        self.keep_version = keep_version;
        self
    }

    /// Sets whether earlier versions are kept.
    #[must_use]
    pub fn keep_history(mut self, keep_history: bool) -> Self {
        self.keep_history = keep_history;
        self
    }

    /// Requires the current version to match `etag`.
    #[must_use]
    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.weak_etag = Some(etag.into());
        self
    }

    /// Restricts the operation to creates only.
    #[must_use]
    pub fn create_only(mut self) -> Self {
        self.allow_create = true;
        self.allow_update = false;
        self
    }

    /// Restricts the operation to updates only.
    #[must_use]
    pub fn update_only(mut self) -> Self {
        self.allow_create = false;
        self.allow_update = true;
        self
    }

    /// Returns the key of the record carried by this operation.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.record.key()
    }
}
