//! Query contract between the sync algorithm and node adapters.
//!
//! A [`QueryRequest`] describes one page-able query. Indexes are 1-based,
//! following the catalog servers this core talks to. A [`QueryResponse`] is a
//! lazy stream of records; adapters usually build it from a
//! [`ResultIterable`](crate::iterable::ResultIterable).

use crate::error::{AdapterError, AdapterResult};
use crate::metadata::Metadata;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};

/// First index of a result set.
pub const DEFAULT_START_INDEX: usize = 1;

/// Records fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A paginated metadata query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Filter expression, opaque to the core.
    pub cql: String,
    pub sort: Option<String>,
    pub start_index: usize,
    pub page_size: usize,
    /// Only records modified strictly after this instant.
    pub modified_after: Option<DateTime<Utc>>,
    /// Skip records whose lineage contains any of these system names.
    pub excluded_nodes: Vec<String>,
    /// Ids that must be returned even when older than `modified_after`.
    pub failed_item_ids: Vec<String>,
    /// Stop after this many distinct records. `Some(0)` yields nothing.
    pub max_results: Option<usize>,
}

impl QueryRequest {
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            sort: None,
            start_index: DEFAULT_START_INDEX,
            page_size: DEFAULT_PAGE_SIZE,
            modified_after: None,
            excluded_nodes: Vec::new(),
            failed_item_ids: Vec::new(),
            max_results: None,
        }
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_start_index(mut self, start_index: usize) -> Self {
        self.start_index = start_index;
        self
    }

    /// Zero is bumped to one so pagination always makes progress.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_modified_after(mut self, modified_after: Option<DateTime<Utc>>) -> Self {
        self.modified_after = modified_after;
        self
    }

    pub fn with_excluded_nodes(mut self, nodes: Vec<String>) -> Self {
        self.excluded_nodes = nodes;
        self
    }

    pub fn with_failed_item_ids(mut self, ids: Vec<String>) -> Self {
        self.failed_item_ids = ids;
        self
    }

    pub fn with_max_results(mut self, max_results: Option<usize>) -> Self {
        self.max_results = max_results;
        self
    }

    /// Whether `metadata` falls inside this request's window.
    ///
    /// Adapters without a native query language use this to evaluate the
    /// bookkeeping part of a request. The `cql` expression is not evaluated.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        if self
            .excluded_nodes
            .iter()
            .any(|node| metadata.has_lineage(node))
        {
            return false;
        }
        let retried = metadata
            .id()
            .map(|id| self.failed_item_ids.iter().any(|f| f == id))
            .unwrap_or(false);
        let in_window = match self.modified_after {
            Some(after) => metadata.metadata_modified > after,
            None => true,
        };
        retried || in_window
    }
}

/// Lazy result of a [`QueryRequest`].
pub struct QueryResponse<'a> {
    results: BoxStream<'a, AdapterResult<Metadata>>,
}

impl<'a> QueryResponse<'a> {
    pub fn new(results: impl Stream<Item = AdapterResult<Metadata>> + Send + 'a) -> Self {
        Self {
            results: results.boxed(),
        }
    }

    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// A response whose first item is `error`.
    pub fn from_error(error: AdapterError) -> Self {
        Self::new(stream::once(async move { Err(error) }))
    }

    pub fn into_stream(self) -> BoxStream<'a, AdapterResult<Metadata>> {
        self.results
    }

    /// Drain the whole response. Only sensible for small result sets.
    pub async fn collect_all(self) -> AdapterResult<Vec<Metadata>> {
        self.results.try_collect().await
    }
}

impl std::fmt::Debug for QueryResponse<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResponse").finish_non_exhaustive()
    }
}
