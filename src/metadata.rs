//! Replicable records and their binary resources.
//!
//! The payload of a [`Metadata`] is opaque to the core: adapters produce it
//! and consume it, the core only moves it along with its bookkeeping fields
//! (timestamps, tags, lineage, resource pointer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tag added to every record this core writes to a destination.
pub const REPLICATED_TAG: &str = "replicated";

/// One replicable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Stable id. `None` for records a remote system has not identified;
    /// such records are never deduplicated.
    pub id: Option<String>,
    /// Payload type tag (e.g. an XML schema or a mime type).
    pub raw_type: String,
    #[serde(default)]
    pub raw: Vec<u8>,
    pub metadata_modified: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Names of the systems this record has passed through, oldest first.
    #[serde(default)]
    pub lineage: Vec<String>,
    #[serde(default)]
    pub resource_uri: Option<String>,
    #[serde(default)]
    pub resource_size: u64,
    #[serde(default)]
    pub resource_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

impl Metadata {
    pub fn new(id: impl Into<String>, raw: impl Into<Vec<u8>>, modified: DateTime<Utc>) -> Self {
        Self {
            id: Some(id.into()),
            raw_type: "application/octet-stream".to_string(),
            raw: raw.into(),
            metadata_modified: modified,
            tags: BTreeSet::new(),
            lineage: Vec::new(),
            resource_uri: None,
            resource_size: 0,
            resource_modified: None,
            deleted: false,
        }
    }

    pub fn with_resource(
        mut self,
        uri: impl Into<String>,
        size: u64,
        modified: DateTime<Utc>,
    ) -> Self {
        self.resource_uri = Some(uri.into());
        self.resource_size = size;
        self.resource_modified = Some(modified);
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn with_lineage(mut self, lineage: Vec<String>) -> Self {
        self.lineage = lineage;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn has_resource(&self) -> bool {
        self.resource_uri.is_some()
    }

    pub fn has_lineage(&self, system_name: &str) -> bool {
        self.lineage.iter().any(|name| name == system_name)
    }

    /// Append `system_name` to the lineage unless it is already the last hop.
    pub fn add_lineage(&mut self, system_name: &str) {
        if self.lineage.last().map(String::as_str) != Some(system_name) {
            self.lineage.push(system_name.to_string());
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    pub fn metadata_size(&self) -> u64 {
        self.raw.len() as u64
    }
}

/// A binary resource attached to a [`Metadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub metadata: Metadata,
    pub name: String,
    pub mime_type: String,
    pub uri: String,
    pub content: Vec<u8>,
}

impl Resource {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}
