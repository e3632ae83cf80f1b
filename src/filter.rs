// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filters and the sync requests that carry them through the dispatcher.

use crate::item::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Default number of retries for an item that keeps failing.
pub const DEFAULT_FAILURE_RETRY_COUNT: u32 = 5;

fn default_failure_retry_count() -> u32 {
    DEFAULT_FAILURE_RETRY_COUNT
}

/// A saved query plus a site pairing describing one replication job.
///
/// The lifecycle is owned externally. A job only writes the cursor fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    pub name: String,
    pub source_site_id: String,
    pub destination_site_id: String,
    /// CQL-like filter expression, passed through to adapters untouched.
    pub query: String,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default = "default_failure_retry_count")]
    pub failure_retry_count: u32,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    /// High-water mark bounding the next incremental query.
    #[serde(default)]
    pub last_metadata_modified: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_site_id: impl Into<String>,
        destination_site_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_site_id: source_site_id.into(),
            destination_site_id: destination_site_id.into(),
            query: query.into(),
            bidirectional: false,
            suspended: false,
            failure_retry_count: DEFAULT_FAILURE_RETRY_COUNT,
            last_run: None,
            last_success: None,
            last_metadata_modified: None,
        }
    }

    pub fn with_suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    pub fn with_failure_retry_count(mut self, count: u32) -> Self {
        self.failure_retry_count = count;
        self
    }

    /// Whether `site_id` is this filter's source or destination.
    pub fn references_site(&self, site_id: &str) -> bool {
        self.source_site_id == site_id || self.destination_site_id == site_id
    }

    /// The site on the other end from `local_site_id`.
    ///
    /// Falls back to the destination when neither end is local.
    pub fn remote_site_id(&self, local_site_id: &str) -> &str {
        if self.destination_site_id == local_site_id {
            &self.source_site_id
        } else {
            &self.destination_site_id
        }
    }

    /// Move the metadata cursor forward, never backward.
    pub fn advance_cursor(&mut self, modified: DateTime<Utc>) {
        match self.last_metadata_modified {
            Some(current) if current >= modified => {}
            _ => self.last_metadata_modified = Some(modified),
        }
    }
}

/// One "run this filter now" unit of dispatch.
///
/// Equality and hashing use the filter id only, so two requests for the same
/// filter collapse in the dispatch queues whatever their status.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub filter: Filter,
    pub status: Status,
}

impl SyncRequest {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            status: Status::Pending,
        }
    }

    pub fn filter_id(&self) -> &str {
        &self.filter.id
    }
}

impl PartialEq for SyncRequest {
    fn eq(&self, other: &Self) -> bool {
        self.filter.id == other.filter.id
    }
}

impl Eq for SyncRequest {}

impl Hash for SyncRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.filter.id.hash(state);
    }
}
