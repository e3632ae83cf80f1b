//! # Catalog Replication
//!
//! Periodic, filter-driven replication of metadata records and their
//! resources between catalog sites.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           catalog-replication                             │
//! │                                                                           │
//! │  ┌──────────────────┐  submit   ┌─────────────┐  one at a time           │
//! │  │ ReplicatorRunner │──────────►│ Replicator  │─────────────┐            │
//! │  │ (timer, filters) │           │ (dedup FIFO)│             ▼            │
//! │  └──────────────────┘           └─────────────┘     ┌──────────────┐     │
//! │         │                              │            │ Syncer / Job │     │
//! │         ▼                              ▼            └──────────────┘     │
//! │  ┌──────────────────┐         ┌──────────────┐         │         │       │
//! │  │ Site / Filter    │         │ NodeAdapters │      source  destination │
//! │  │ managers         │         │ (by type tag)│      adapter   adapter   │
//! │  └──────────────────┘         └──────────────┘                           │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use catalog_replication::{
//!     MemoryAdapterFactory, MemoryCatalog, MemoryFilterManager, MemoryReplicationItemManager,
//!     MemorySiteManager, NodeAdapters, Replicator, ReplicatorRunner, ReplicatorSettings,
//!     SiteType, Syncer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = ReplicatorSettings::default();
//!     let sites = Arc::new(MemorySiteManager::new());
//!     let filters = Arc::new(MemoryFilterManager::new());
//!     let items = Arc::new(MemoryReplicationItemManager::new());
//!
//!     let adapters = NodeAdapters::new().with_factory(Arc::new(
//!         MemoryAdapterFactory::new(SiteType::Ddf).with_catalog("mem://local", MemoryCatalog::new("local")),
//!     ));
//!     let syncer = Syncer::new(items, filters.clone(), settings.query.clone());
//!     let replicator = Arc::new(Replicator::new(&settings, adapters, sites.clone(), syncer));
//!     replicator.register_completion_callback(catalog_replication::metrics::item_metrics_callback());
//!     replicator.start().expect("Failed to start");
//!
//!     let runner = ReplicatorRunner::new(settings.runner.clone(), sites, filters, Arc::clone(&replicator));
//!     runner.init();
//!
//!     // Runs until shutdown
//!     runner.destroy().await;
//!     replicator.clean_up().await;
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod filter;
pub mod item;
pub mod iterable;
pub mod metadata;
pub mod metrics;
pub mod query;
pub mod replicator;
pub mod resilience;
pub mod runner;
pub mod site;
pub mod store;
pub mod syncer;

// Re-exports for convenience
pub use adapter::{
    MemoryAdapterFactory, MemoryCatalog, MemoryNodeAdapter, NodeAdapter, NodeAdapterFactory,
    NodeAdapters,
};
pub use config::{DispatcherConfig, QueryConfig, ReplicatorSettings, RunnerConfig};
pub use error::{AdapterError, AdapterResult, ReplicationError, Result};
pub use filter::{Filter, SyncRequest};
pub use item::{Action, ReplicationItem, Status};
pub use iterable::ResultIterable;
pub use metadata::{Metadata, Resource};
pub use query::{QueryRequest, QueryResponse};
pub use replicator::{Direction, Replicator, ReplicatorState, TransferPlan};
pub use runner::ReplicatorRunner;
pub use site::{Site, SiteKind, SiteType};
pub use store::{
    FilterManager, MemoryFilterManager, MemoryReplicationItemManager, MemorySiteManager,
    ReplicationItemManager, SiteManager,
};
pub use syncer::{CompletionCallback, Job, JobSummary, Syncer};
