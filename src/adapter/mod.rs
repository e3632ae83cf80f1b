// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Node adapter traits.
//!
//! A [`NodeAdapter`] is the protocol translation layer for one site. The core
//! depends only on this contract; concrete wire adapters (REST, CSW,
//! multipart ingest, ...) live outside the crate and are registered through
//! a [`NodeAdapterFactory`] per [`SiteType`].
//!
//! An adapter is owned by the single request execution that opened it and
//! is consumed by [`NodeAdapter::close`], so it cannot be reused afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_replication::adapter::{AdapterFuture, NodeAdapter};
//! use catalog_replication::metadata::{Metadata, Resource};
//! use catalog_replication::query::{QueryRequest, QueryResponse};
//! use futures::future::BoxFuture;
//!
//! struct ReadOnlyAdapter;
//!
//! impl NodeAdapter for ReadOnlyAdapter {
//!     fn is_available(&self) -> BoxFuture<'_, bool> {
//!         Box::pin(async { true })
//!     }
//!     fn system_name(&self) -> AdapterFuture<'_, String> {
//!         Box::pin(async { Ok("read-only".to_string()) })
//!     }
//!     fn query(&self, _request: QueryRequest) -> QueryResponse<'_> {
//!         QueryResponse::empty()
//!     }
//!     fn exists(&self, _metadata: &Metadata) -> AdapterFuture<'_, bool> {
//!         Box::pin(async { Ok(false) })
//!     }
//!     fn create_request(&self, _metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
//!         Box::pin(async { Ok(false) })
//!     }
//!     fn update_request(&self, _metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
//!         Box::pin(async { Ok(false) })
//!     }
//!     fn delete_request(&self, _metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
//!         Box::pin(async { Ok(false) })
//!     }
//!     fn read_resource(&self, metadata: &Metadata) -> AdapterFuture<'_, Resource> {
//!         let id = metadata.id.clone().unwrap_or_default();
//!         Box::pin(async move {
//!             Err(catalog_replication::AdapterError::NotFound(id))
//!         })
//!     }
//!     fn create_resource(&self, _resources: Vec<Resource>) -> AdapterFuture<'_, bool> {
//!         Box::pin(async { Ok(false) })
//!     }
//!     fn update_resource(&self, _resources: Vec<Resource>) -> AdapterFuture<'_, bool> {
//!         Box::pin(async { Ok(false) })
//!     }
//!     fn close(self: Box<Self>) -> AdapterFuture<'static, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

pub mod memory;
pub mod registry;

pub use memory::{MemoryAdapterFactory, MemoryCatalog, MemoryNodeAdapter};
pub use registry::NodeAdapters;

use crate::error::AdapterResult;
use crate::metadata::{Metadata, Resource};
use crate::query::{QueryRequest, QueryResponse};
use crate::site::SiteType;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed adapter futures.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = AdapterResult<T>> + Send + 'a>>;

/// Uniform CRUD + query surface over one site.
///
/// Write operations report `Ok(false)` when the remote side rejected the
/// request and `Err` when the call itself failed.
pub trait NodeAdapter: Send + Sync + 'static {
    /// Probe whether the site answers. Never fails; errors read as `false`.
    fn is_available(&self) -> BoxFuture<'_, bool>;

    /// Name the site uses for itself in record lineage.
    fn system_name(&self) -> AdapterFuture<'_, String>;

    /// Lazy paginated query. Implementations honor `request.max_results`;
    /// building the response from a [`ResultIterable`](crate::iterable::ResultIterable)
    /// does that.
    fn query(&self, request: QueryRequest) -> QueryResponse<'_>;

    /// Whether the site holds a live copy of `metadata`.
    fn exists(&self, metadata: &Metadata) -> AdapterFuture<'_, bool>;

    fn create_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool>;

    fn update_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool>;

    fn delete_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool>;

    /// Fetch the binary resource attached to `metadata`.
    fn read_resource(&self, metadata: &Metadata) -> AdapterFuture<'_, Resource>;

    /// Store resources together with their metadata.
    fn create_resource(&self, resources: Vec<Resource>) -> AdapterFuture<'_, bool>;

    fn update_resource(&self, resources: Vec<Resource>) -> AdapterFuture<'_, bool>;

    /// Release connections and other resources held by the adapter.
    fn close(self: Box<Self>) -> AdapterFuture<'static, ()>;
}

/// Builds adapters for one [`SiteType`].
pub trait NodeAdapterFactory: Send + Sync + 'static {
    /// Create an adapter for the site at `url`.
    fn create(&self, url: &str) -> AdapterResult<Box<dyn NodeAdapter>>;

    fn site_type(&self) -> SiteType;
}
