// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence collaborator traits.
//!
//! The core never stores anything itself. Sites, filters and replication
//! items live behind these CRUD traits, which the embedding process
//! implements over whatever storage it has. In-memory implementations are
//! provided for standalone use and tests.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> catalog_replication::Result<()> {
//! use catalog_replication::site::{Site, SiteKind, SiteType};
//! use catalog_replication::store::{MemorySiteManager, SiteManager};
//!
//! let sites = MemorySiteManager::new();
//! sites.save(Site::new("s1", "Regional", "https://regional:8993", SiteType::Ddf, SiteKind::Regional)).await?;
//! assert!(sites.exists("s1").await?);
//! # Ok(())
//! # }
//! ```

use crate::error::{ReplicationError, Result};
use crate::filter::Filter;
use crate::item::ReplicationItem;
use crate::site::Site;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed persistence futures.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Page size used when walking a filter's item history.
pub const ITEM_PAGE_SIZE: usize = 50;

/// Site persistence.
pub trait SiteManager: Send + Sync + 'static {
    /// Fetch a site. Missing sites are [`ReplicationError::NotFound`].
    fn get(&self, id: &str) -> StoreFuture<'_, Site>;

    /// Every known site.
    fn objects(&self) -> BoxStream<'_, Result<Site>>;

    /// Insert or replace by id.
    fn save(&self, site: Site) -> StoreFuture<'_, ()>;

    fn remove(&self, id: &str) -> StoreFuture<'_, ()>;

    fn exists(&self, id: &str) -> StoreFuture<'_, bool>;
}

/// Filter persistence.
pub trait FilterManager: Send + Sync + 'static {
    /// Fetch a filter. Missing filters are [`ReplicationError::NotFound`].
    fn get(&self, id: &str) -> StoreFuture<'_, Filter>;

    fn objects(&self) -> BoxStream<'_, Result<Filter>>;

    /// Filters whose source or destination is `site_id`.
    fn filters_for_site(&self, site_id: &str) -> StoreFuture<'_, Vec<Filter>>;

    /// Insert or replace by id.
    fn save(&self, filter: Filter) -> StoreFuture<'_, ()>;

    fn remove(&self, id: &str) -> StoreFuture<'_, ()>;

    fn exists(&self, id: &str) -> StoreFuture<'_, bool>;
}

/// One page of a filter's item history.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<ReplicationItem>,
    /// Whether another page follows this one.
    pub has_more: bool,
}

/// Replication item persistence.
pub trait ReplicationItemManager: Send + Sync + 'static {
    /// Most recent item for a record under a filter, by `done_time`.
    fn latest(&self, config_id: &str, metadata_id: &str)
        -> StoreFuture<'_, Option<ReplicationItem>>;

    /// Record one attempt.
    fn save(&self, item: ReplicationItem) -> StoreFuture<'_, ()>;

    /// Page through every stored attempt for a filter.
    ///
    /// `start` is a 0-based offset.
    fn items_for_config(
        &self,
        config_id: &str,
        start: usize,
        page_size: usize,
    ) -> StoreFuture<'_, ItemPage>;

    /// Drop the whole history of a filter.
    fn remove_for_config(&self, config_id: &str) -> StoreFuture<'_, ()>;

    /// Ids whose latest attempt under `config_id` is a retryable failure.
    ///
    /// Walks [`items_for_config`](Self::items_for_config) until the store
    /// reports no further pages. Sorted for stable query construction.
    fn failure_list<'a>(&'a self, config_id: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut latest: HashMap<String, ReplicationItem> = HashMap::new();
            let mut start = 0;

            loop {
                let page = self
                    .items_for_config(config_id, start, ITEM_PAGE_SIZE)
                    .await?;
                start += page.items.len();
                let done = !page.has_more || page.items.is_empty();

                for item in page.items {
                    match latest.get(&item.metadata_id) {
                        Some(existing) if existing.done_time > item.done_time => {}
                        _ => {
                            latest.insert(item.metadata_id.clone(), item);
                        }
                    }
                }

                if done {
                    break;
                }
            }

            let mut ids: Vec<String> = latest
                .into_values()
                .filter(|item| item.status.is_retryable_failure())
                .map(|item| item.metadata_id)
                .collect();
            ids.sort();
            Ok(ids)
        })
    }
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Sites held in process memory.
#[derive(Default)]
pub struct MemorySiteManager {
    sites: RwLock<BTreeMap<String, Site>>,
}

impl MemorySiteManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sites(sites: impl IntoIterator<Item = Site>) -> Self {
        let map = sites.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            sites: RwLock::new(map),
        }
    }

    /// Synchronous read for callers outside an async context.
    pub fn snapshot(&self, id: &str) -> Option<Site> {
        self.sites.read().get(id).cloned()
    }
}

impl SiteManager for MemorySiteManager {
    fn get(&self, id: &str) -> StoreFuture<'_, Site> {
        let found = self.snapshot(id);
        let id = id.to_string();
        Box::pin(async move { found.ok_or_else(|| ReplicationError::site_not_found(id)) })
    }

    fn objects(&self) -> BoxStream<'_, Result<Site>> {
        let all: Vec<Site> = self.sites.read().values().cloned().collect();
        stream::iter(all.into_iter().map(Ok)).boxed()
    }

    fn save(&self, site: Site) -> StoreFuture<'_, ()> {
        self.sites.write().insert(site.id.clone(), site);
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, id: &str) -> StoreFuture<'_, ()> {
        self.sites.write().remove(id);
        Box::pin(async { Ok(()) })
    }

    fn exists(&self, id: &str) -> StoreFuture<'_, bool> {
        let exists = self.sites.read().contains_key(id);
        Box::pin(async move { Ok(exists) })
    }
}

/// Filters held in process memory.
#[derive(Default)]
pub struct MemoryFilterManager {
    filters: RwLock<BTreeMap<String, Filter>>,
}

impl MemoryFilterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters(filters: impl IntoIterator<Item = Filter>) -> Self {
        let map = filters.into_iter().map(|f| (f.id.clone(), f)).collect();
        Self {
            filters: RwLock::new(map),
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<Filter> {
        self.filters.read().get(id).cloned()
    }
}

impl FilterManager for MemoryFilterManager {
    fn get(&self, id: &str) -> StoreFuture<'_, Filter> {
        let found = self.snapshot(id);
        let id = id.to_string();
        Box::pin(async move { found.ok_or_else(|| ReplicationError::filter_not_found(id)) })
    }

    fn objects(&self) -> BoxStream<'_, Result<Filter>> {
        let all: Vec<Filter> = self.filters.read().values().cloned().collect();
        stream::iter(all.into_iter().map(Ok)).boxed()
    }

    fn filters_for_site(&self, site_id: &str) -> StoreFuture<'_, Vec<Filter>> {
        let matching: Vec<Filter> = self
            .filters
            .read()
            .values()
            .filter(|f| f.references_site(site_id))
            .cloned()
            .collect();
        Box::pin(async move { Ok(matching) })
    }

    fn save(&self, filter: Filter) -> StoreFuture<'_, ()> {
        self.filters.write().insert(filter.id.clone(), filter);
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, id: &str) -> StoreFuture<'_, ()> {
        self.filters.write().remove(id);
        Box::pin(async { Ok(()) })
    }

    fn exists(&self, id: &str) -> StoreFuture<'_, bool> {
        let exists = self.filters.read().contains_key(id);
        Box::pin(async move { Ok(exists) })
    }
}

/// Replication item history held in process memory.
///
/// Keeps every attempt, grouped per filter in insertion order.
#[derive(Default)]
pub struct MemoryReplicationItemManager {
    items: RwLock<HashMap<String, Vec<ReplicationItem>>>,
}

impl MemoryReplicationItemManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt stored for a filter.
    pub fn history(&self, config_id: &str) -> Vec<ReplicationItem> {
        self.items.read().get(config_id).cloned().unwrap_or_default()
    }

    /// Attempts stored for one record under a filter, oldest first.
    pub fn history_for(&self, config_id: &str, metadata_id: &str) -> Vec<ReplicationItem> {
        self.history(config_id)
            .into_iter()
            .filter(|i| i.metadata_id == metadata_id)
            .collect()
    }

    fn latest_sync(&self, config_id: &str, metadata_id: &str) -> Option<ReplicationItem> {
        let items = self.items.read();
        items
            .get(config_id)?
            .iter()
            .filter(|i| i.metadata_id == metadata_id)
            // Later insertion wins ties
            .fold(None, |best: Option<&ReplicationItem>, item| match best {
                Some(b) if b.done_time > item.done_time => Some(b),
                _ => Some(item),
            })
            .cloned()
    }
}

impl ReplicationItemManager for MemoryReplicationItemManager {
    fn latest(
        &self,
        config_id: &str,
        metadata_id: &str,
    ) -> StoreFuture<'_, Option<ReplicationItem>> {
        let found = self.latest_sync(config_id, metadata_id);
        Box::pin(async move { Ok(found) })
    }

    fn save(&self, item: ReplicationItem) -> StoreFuture<'_, ()> {
        self.items
            .write()
            .entry(item.config_id.clone())
            .or_default()
            .push(item);
        Box::pin(async { Ok(()) })
    }

    fn items_for_config(
        &self,
        config_id: &str,
        start: usize,
        page_size: usize,
    ) -> StoreFuture<'_, ItemPage> {
        let page = {
            let items = self.items.read();
            let all = items.get(config_id).map(Vec::as_slice).unwrap_or_default();
            let end = start.saturating_add(page_size).min(all.len());
            let slice = all.get(start..end).unwrap_or_default();
            ItemPage {
                items: slice.to_vec(),
                has_more: end < all.len(),
            }
        };
        Box::pin(async move { Ok(page) })
    }

    fn remove_for_config(&self, config_id: &str) -> StoreFuture<'_, ()> {
        self.items.write().remove(config_id);
        Box::pin(async { Ok(()) })
    }
}
