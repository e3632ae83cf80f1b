//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A tracking adapter with per-URL fault injection
//! - [`TestBed`]: local and remote memory catalogs wired into a replicator

#![allow(dead_code)]

pub mod mock_adapter;

pub use mock_adapter::*;

use catalog_replication::resilience::{retry_until, RetryConfig};
use catalog_replication::store::FilterManager;
use catalog_replication::{
    Filter, MemoryAdapterFactory, MemoryCatalog, MemoryFilterManager, MemoryReplicationItemManager,
    MemorySiteManager, Metadata, NodeAdapters, Replicator, ReplicatorSettings, Site, SiteKind,
    SiteType, SyncRequest, Syncer,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const LOCAL_ID: &str = "local";
pub const REMOTE_ID: &str = "remote";
pub const LOCAL_URL: &str = "mem://local";
pub const REMOTE_URL: &str = "mem://remote";
pub const LOCAL_NAME: &str = "local-catalog";
pub const REMOTE_NAME: &str = "remote-catalog";

/// Filter pulling everything from the remote site into the local one.
pub const FILTER_ID: &str = "f1";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn record(id: &str, secs: i64) -> Metadata {
    Metadata::new(id, format!("<metacard id=\"{id}\"/>").into_bytes(), at(secs))
}

/// Two catalogs, one filter, a replicator (not started) and a shared tracker.
pub struct TestBed {
    pub local: Arc<MemoryCatalog>,
    pub remote: Arc<MemoryCatalog>,
    pub tracker: Arc<Tracker>,
    pub sites: Arc<MemorySiteManager>,
    pub filters: Arc<MemoryFilterManager>,
    pub items: Arc<MemoryReplicationItemManager>,
    pub replicator: Arc<Replicator>,
}

impl TestBed {
    /// Remote site with the given tags, served by the factory for its type.
    pub fn new(remote_type: SiteType, remote_kind: SiteKind) -> Self {
        Self::build(remote_type, remote_type, remote_kind, ReplicatorSettings::for_testing(LOCAL_ID))
    }

    pub fn with_settings(remote_type: SiteType, remote_kind: SiteKind, settings: ReplicatorSettings) -> Self {
        Self::build(remote_type, remote_type, remote_kind, settings)
    }

    /// Remote site recorded with an unknown type but served by `actual`.
    pub fn discovering(actual: SiteType, remote_kind: SiteKind) -> Self {
        Self::build(SiteType::Unknown, actual, remote_kind, ReplicatorSettings::for_testing(LOCAL_ID))
    }

    fn build(recorded: SiteType, served_by: SiteType, remote_kind: SiteKind, settings: ReplicatorSettings) -> Self {
        let local = MemoryCatalog::new(LOCAL_NAME);
        let remote = MemoryCatalog::new(REMOTE_NAME);
        let tracker = Tracker::new();

        let ddf = MemoryAdapterFactory::new(SiteType::Ddf).with_catalog(LOCAL_URL, Arc::clone(&local));
        let ion = MemoryAdapterFactory::new(SiteType::Ion);
        match served_by {
            SiteType::Ion => ion.register(REMOTE_URL, Arc::clone(&remote)),
            _ => ddf.register(REMOTE_URL, Arc::clone(&remote)),
        }
        let adapters = NodeAdapters::new()
            .with_factory(Arc::new(TrackingFactory::new(ddf, Arc::clone(&tracker))))
            .with_factory(Arc::new(TrackingFactory::new(ion, Arc::clone(&tracker))));

        let sites = Arc::new(MemorySiteManager::with_sites([
            Site::new(LOCAL_ID, LOCAL_NAME, LOCAL_URL, SiteType::Ddf, SiteKind::Regional),
            Site::new(REMOTE_ID, REMOTE_NAME, REMOTE_URL, recorded, remote_kind),
        ]));
        let filters = Arc::new(MemoryFilterManager::with_filters([Filter::new(
            FILTER_ID, "everything", REMOTE_ID, LOCAL_ID, "*",
        )]));
        let items = Arc::new(MemoryReplicationItemManager::new());

        let syncer = Syncer::new(items.clone(), filters.clone(), settings.query.clone());
        let replicator = Arc::new(Replicator::new(&settings, adapters, sites.clone(), syncer));

        Self {
            local,
            remote,
            tracker,
            sites,
            filters,
            items,
            replicator,
        }
    }

    /// Store a filter so jobs can persist its cursor.
    pub async fn add_filter(&self, filter: Filter) {
        self.filters.save(filter).await.unwrap();
    }

    /// Request built from the stored filter.
    pub fn request(&self, filter_id: &str) -> SyncRequest {
        SyncRequest::new(self.filters.snapshot(filter_id).expect("filter stored"))
    }

    /// Submit the stored filter and wait for the replicator to go idle.
    pub async fn run(&self, filter_id: &str) {
        assert!(self.replicator.submit_sync_request(self.request(filter_id)).unwrap());
        assert!(
            self.replicator.wait_until_idle(Duration::from_secs(5)).await,
            "replicator did not go idle"
        );
    }

    /// Wait until some request is executing.
    pub async fn wait_for_active(&self) -> bool {
        let replicator = Arc::clone(&self.replicator);
        retry_until(&RetryConfig::testing(), move || {
            let replicator = Arc::clone(&replicator);
            async move { !replicator.active_sync_requests().is_empty() }
        })
        .await
    }

    /// Every opened adapter was closed exactly once.
    pub fn assert_adapters_closed(&self) {
        for url in [LOCAL_URL, REMOTE_URL] {
            assert_eq!(
                self.tracker.opens(url),
                self.tracker.closes(url),
                "open/close mismatch for {url}"
            );
        }
    }
}
