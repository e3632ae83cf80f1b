// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Site-type tag to adapter factory lookup.
//!
//! # Type discovery
//!
//! ```text
//!   site.type known ──► factory_for(type) ──► create(url)
//!
//!   site.type UNKNOWN
//!        │
//!        ├─► factory[0].create(url) ─► available? ─no─► close, next
//!        ├─► factory[1].create(url) ─► available? ─yes─┐
//!        │                                             ▼
//!        │                        site.type = factory[1].type, persist
//!        └─► none answered ─► Unavailable
//! ```

use super::{NodeAdapter, NodeAdapterFactory};
use crate::error::{ReplicationError, Result};
use crate::site::{Site, SiteType};
use crate::store::SiteManager;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registered adapter factories, probed in registration order.
#[derive(Clone, Default)]
pub struct NodeAdapters {
    factories: Vec<Arc<dyn NodeAdapterFactory>>,
}

impl NodeAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later factory for the same type replaces the earlier one.
    pub fn register(&mut self, factory: Arc<dyn NodeAdapterFactory>) {
        let site_type = factory.site_type();
        self.factories.retain(|f| f.site_type() != site_type);
        self.factories.push(factory);
    }

    pub fn with_factory(mut self, factory: Arc<dyn NodeAdapterFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn factory_for(&self, site_type: SiteType) -> Option<Arc<dyn NodeAdapterFactory>> {
        self.factories
            .iter()
            .find(|f| f.site_type() == site_type)
            .cloned()
    }

    pub fn site_types(&self) -> Vec<SiteType> {
        self.factories.iter().map(|f| f.site_type()).collect()
    }

    /// Open an adapter for `site`.
    ///
    /// When the site's type is unknown every factory is probed and the first
    /// whose adapter answers wins; the discovered type is written onto `site`
    /// and saved through `sites`. Probe adapters that lose are closed here.
    /// The returned adapter has not been checked for availability when the
    /// type was already known.
    pub async fn open(&self, site: &mut Site, sites: &dyn SiteManager) -> Result<Box<dyn NodeAdapter>> {
        if site.site_type.is_known() {
            let factory = self
                .factory_for(site.site_type)
                .ok_or(ReplicationError::UnsupportedSiteType(site.site_type))?;
            return Ok(factory.create(&site.url)?);
        }

        for factory in &self.factories {
            let adapter = match factory.create(&site.url) {
                Ok(adapter) => adapter,
                Err(e) => {
                    debug!(site = %site.name, site_type = %factory.site_type(), error = %e, "Probe could not create adapter");
                    continue;
                }
            };

            if adapter.is_available().await {
                site.site_type = factory.site_type();
                info!(site = %site.name, site_type = %site.site_type, "Discovered site type");
                if let Err(e) = sites.save(site.clone()).await {
                    warn!(site = %site.name, error = %e, "Failed to persist discovered site type");
                }
                return Ok(adapter);
            }

            debug!(site = %site.name, site_type = %factory.site_type(), "Probe adapter unavailable");
            match AssertUnwindSafe(async move { adapter.close().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(site = %site.name, error = %e, "Failed to close probe adapter"),
                Err(_) => warn!(site = %site.name, "Probe adapter close panicked"),
            }
        }

        Err(ReplicationError::Unavailable {
            site: site.name.clone(),
            url: site.url.clone(),
        })
    }
}

impl std::fmt::Debug for NodeAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeAdapters")
            .field("site_types", &self.site_types())
            .finish()
    }
}
