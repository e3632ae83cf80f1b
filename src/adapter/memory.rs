//! In-memory node adapter.
//!
//! A [`MemoryCatalog`] stands in for a remote site. It is shared behind an
//! `Arc` so tests and standalone setups can inspect it while adapters built
//! by a [`MemoryAdapterFactory`] read and write it. Query evaluation covers
//! the bookkeeping part of a [`QueryRequest`] (modified window, failed ids,
//! excluded lineage) and ignores the filter expression.

use super::{AdapterFuture, NodeAdapter, NodeAdapterFactory};
use crate::error::{AdapterError, AdapterResult};
use crate::iterable::ResultIterable;
use crate::metadata::{Metadata, Resource};
use crate::query::{QueryRequest, QueryResponse};
use crate::site::SiteType;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct CatalogState {
    records: HashMap<String, Metadata>,
    resources: HashMap<String, Vec<u8>>,
    unavailable: bool,
}

/// Records and resources of one simulated site.
pub struct MemoryCatalog {
    name: String,
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: RwLock::new(CatalogState::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace a record. Records without an id are ignored.
    pub fn insert(&self, metadata: Metadata) {
        if let Some(id) = metadata.id.clone() {
            self.state.write().records.insert(id, metadata);
        }
    }

    /// Insert a record together with its resource bytes.
    pub fn insert_with_resource(&self, metadata: Metadata, content: Vec<u8>) {
        if let Some(id) = metadata.id.clone() {
            let mut state = self.state.write();
            state.resources.insert(id.clone(), content);
            state.records.insert(id, metadata);
        }
    }

    /// Turn a record into a tombstone so queries report it as deleted.
    pub fn mark_deleted(&self, id: &str, at: DateTime<Utc>) -> bool {
        let mut state = self.state.write();
        match state.records.get_mut(id) {
            Some(record) => {
                record.deleted = true;
                record.metadata_modified = at;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Metadata> {
        self.state.read().records.get(id).cloned()
    }

    pub fn resource(&self, id: &str) -> Option<Vec<u8>> {
        self.state.read().resources.get(id).cloned()
    }

    /// Live (non-tombstoned) record count.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .records
            .values()
            .filter(|m| !m.deleted)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_available(&self, available: bool) {
        self.state.write().unavailable = !available;
    }

    pub fn is_available(&self) -> bool {
        !self.state.read().unavailable
    }

    fn check(&self, operation: &str) -> AdapterResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(AdapterError::transport(
                operation,
                format!("{} refused the connection", self.name),
            ))
        }
    }

    /// One page of matching records ordered by modification time, then id.
    fn page(&self, request: &QueryRequest) -> AdapterResult<Vec<Metadata>> {
        self.check("query")?;
        let state = self.state.read();
        let mut matching: Vec<&Metadata> = state
            .records
            .values()
            .filter(|m| request.matches(m))
            .collect();
        matching.sort_by(|a, b| {
            a.metadata_modified
                .cmp(&b.metadata_modified)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matching
            .into_iter()
            .skip(request.start_index.saturating_sub(1))
            .take(request.page_size)
            .cloned()
            .collect())
    }

    fn upsert(&self, metadata: Vec<Metadata>) {
        let mut state = self.state.write();
        for m in metadata {
            if let Some(id) = m.id.clone() {
                state.records.insert(id, m);
            }
        }
    }

    fn store_resources(&self, resources: Vec<Resource>) {
        let mut state = self.state.write();
        for r in resources {
            if let Some(id) = r.metadata.id.clone() {
                state.resources.insert(id.clone(), r.content);
                state.records.insert(id, r.metadata);
            }
        }
    }
}

/// Adapter over a shared [`MemoryCatalog`].
pub struct MemoryNodeAdapter {
    catalog: Arc<MemoryCatalog>,
}

impl MemoryNodeAdapter {
    pub fn new(catalog: Arc<MemoryCatalog>) -> Self {
        Self { catalog }
    }
}

impl NodeAdapter for MemoryNodeAdapter {
    fn is_available(&self) -> BoxFuture<'_, bool> {
        let available = self.catalog.is_available();
        Box::pin(async move { available })
    }

    fn system_name(&self) -> AdapterFuture<'_, String> {
        Box::pin(async move {
            self.catalog.check("system_name")?;
            Ok(self.catalog.name().to_string())
        })
    }

    fn query(&self, request: QueryRequest) -> QueryResponse<'_> {
        let catalog = Arc::clone(&self.catalog);
        let fetch = move |req: QueryRequest| future::ready(catalog.page(&req));
        QueryResponse::new(ResultIterable::new(fetch, request).into_stream())
    }

    fn exists(&self, metadata: &Metadata) -> AdapterFuture<'_, bool> {
        let id = metadata.id.clone();
        Box::pin(async move {
            self.catalog.check("exists")?;
            Ok(id
                .and_then(|id| self.catalog.get(&id))
                .map(|m| !m.deleted)
                .unwrap_or(false))
        })
    }

    fn create_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            self.catalog.check("create_request")?;
            debug!(system = %self.catalog.name(), count = metadata.len(), "Memory: create");
            self.catalog.upsert(metadata);
            Ok(true)
        })
    }

    fn update_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            self.catalog.check("update_request")?;
            let all_present = metadata
                .iter()
                .all(|m| m.id().and_then(|id| self.catalog.get(id)).is_some());
            if all_present {
                self.catalog.upsert(metadata);
            }
            Ok(all_present)
        })
    }

    fn delete_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            self.catalog.check("delete_request")?;
            let mut state = self.catalog.state.write();
            for id in metadata.iter().filter_map(Metadata::id) {
                state.records.remove(id);
                state.resources.remove(id);
            }
            Ok(true)
        })
    }

    fn read_resource(&self, metadata: &Metadata) -> AdapterFuture<'_, Resource> {
        let metadata = metadata.clone();
        Box::pin(async move {
            self.catalog.check("read_resource")?;
            let id = metadata.id.clone().unwrap_or_default();
            let content = self
                .catalog
                .resource(&id)
                .ok_or_else(|| AdapterError::NotFound(format!("resource for {id}")))?;
            let uri = metadata
                .resource_uri
                .clone()
                .unwrap_or_else(|| format!("content:{id}"));
            Ok(Resource {
                metadata,
                name: id,
                mime_type: "application/octet-stream".to_string(),
                uri,
                content,
            })
        })
    }

    fn create_resource(&self, resources: Vec<Resource>) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            self.catalog.check("create_resource")?;
            self.catalog.store_resources(resources);
            Ok(true)
        })
    }

    fn update_resource(&self, resources: Vec<Resource>) -> AdapterFuture<'_, bool> {
        Box::pin(async move {
            self.catalog.check("update_resource")?;
            self.catalog.store_resources(resources);
            Ok(true)
        })
    }

    fn close(self: Box<Self>) -> AdapterFuture<'static, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Factory handing out [`MemoryNodeAdapter`]s for catalogs registered by URL.
pub struct MemoryAdapterFactory {
    site_type: SiteType,
    catalogs: RwLock<HashMap<String, Arc<MemoryCatalog>>>,
}

impl MemoryAdapterFactory {
    pub fn new(site_type: SiteType) -> Self {
        Self {
            site_type,
            catalogs: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_catalog(self, url: impl Into<String>, catalog: Arc<MemoryCatalog>) -> Self {
        self.register(url, catalog);
        self
    }

    pub fn register(&self, url: impl Into<String>, catalog: Arc<MemoryCatalog>) {
        self.catalogs.write().insert(url.into(), catalog);
    }
}

impl NodeAdapterFactory for MemoryAdapterFactory {
    fn create(&self, url: &str) -> AdapterResult<Box<dyn NodeAdapter>> {
        let catalog = self.catalogs.read().get(url).cloned().ok_or_else(|| {
            AdapterError::transport("connect", format!("no {} catalog at {url}", self.site_type))
        })?;
        Ok(Box::new(MemoryNodeAdapter::new(catalog)))
    }

    fn site_type(&self) -> SiteType {
        self.site_type
    }
}
