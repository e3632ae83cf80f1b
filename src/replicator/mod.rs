// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync request dispatcher.
//!
//! The [`Replicator`] owns:
//! - A pending FIFO queue and an active set, deduplicated by filter id
//! - A single dispatcher task executing one request at a time
//! - The completion callbacks handed to every [`Job`](crate::syncer::Job)
//!
//! # Execution
//!
//! ```text
//! submit_sync_request ─► pending ─► dispatcher ─► active
//!                                        │
//!     resolve sites ─► open adapters ─► availability ─► plan ─► job(s)
//!                                        │
//!                         close every opened adapter ─► complete
//! ```
//!
//! Jobs are serialized process-wide. A failing or panicking request is
//! logged and completed; the dispatcher keeps running.

mod policy;
mod queue;
mod types;

pub use policy::{Direction, TransferPlan};
pub use types::ReplicatorState;

use crate::adapter::{NodeAdapter, NodeAdapters};
use crate::config::{DispatcherConfig, ReplicatorSettings};
use crate::error::{ReplicationError, Result};
use crate::filter::{Filter, SyncRequest};
use crate::item::Status;
use crate::metrics;
use crate::resilience::{retry_until, RetryConfig};
use crate::site::{Site, SiteType};
use crate::store::SiteManager;
use crate::syncer::{CompletionCallback, JobSummary, Syncer};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use queue::SyncQueues;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Executes sync requests one at a time.
///
/// Methods take `&self` so the replicator can be shared with a
/// [`ReplicatorRunner`](crate::runner::ReplicatorRunner) through an `Arc`.
pub struct Replicator {
    shared: Arc<Shared>,

    dispatcher_config: DispatcherConfig,

    /// State (broadcast to watchers)
    state_tx: watch::Sender<ReplicatorState>,
    state_rx: watch::Receiver<ReplicatorState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// State reachable from the dispatcher task.
struct Shared {
    local_site_id: String,
    queues: SyncQueues,
    callbacks: RwLock<Vec<CompletionCallback>>,
    adapters: NodeAdapters,
    sites: Arc<dyn SiteManager>,
    syncer: Syncer,
}

/// An adapter opened for one request, closed when the request ends.
struct OpenedAdapter {
    site: String,
    site_type: SiteType,
    adapter: Box<dyn NodeAdapter>,
}

/// How a request ended when no error escaped.
#[derive(Debug)]
enum Outcome {
    Completed(JobSummary),
    Skipped(&'static str),
}

impl Replicator {
    /// Create a replicator in the `Created` state.
    ///
    /// Submissions are queued right away; nothing executes until
    /// [`start()`](Self::start).
    pub fn new(
        settings: &ReplicatorSettings,
        adapters: NodeAdapters,
        sites: Arc<dyn SiteManager>,
        syncer: Syncer,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ReplicatorState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                local_site_id: settings.local_site_id.clone(),
                queues: SyncQueues::new(),
                callbacks: RwLock::new(Vec::new()),
                adapters,
                sites,
                syncer,
            }),
            dispatcher_config: settings.dispatcher.clone(),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            dispatcher: Mutex::new(None),
        }
    }

    /// Id of the site this replicator treats as local.
    pub fn local_site_id(&self) -> &str {
        &self.shared.local_site_id
    }

    /// Get current state.
    pub fn state(&self) -> ReplicatorState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ReplicatorState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), ReplicatorState::Running)
    }

    /// Spawn the dispatcher task.
    pub fn start(&self) -> Result<()> {
        if self.state() != ReplicatorState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }

        let shared = Arc::clone(&self.shared);
        let shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            run_dispatcher(shared, shutdown_rx).await;
        });
        *self.dispatcher.lock() = Some(handle);

        self.set_state(ReplicatorState::Running);
        info!(local_site = %self.shared.local_site_id, "Replicator running");
        Ok(())
    }

    /// Queue a filter for execution.
    ///
    /// Returns `Ok(false)` when the filter is already pending or active.
    /// Fails with [`ReplicationError::Shutdown`] once draining has begun.
    pub fn submit_sync_request(&self, request: SyncRequest) -> Result<bool> {
        if !self.state().accepts_requests() {
            return Err(ReplicationError::Shutdown);
        }

        let filter_id = request.filter_id().to_string();
        let accepted = self.shared.queues.push(request);
        metrics::record_request_submitted(accepted);
        self.shared.publish_depths();

        if accepted {
            debug!(filter_id = %filter_id, "Sync request queued");
        } else {
            debug!(filter_id = %filter_id, "Sync request already pending or active");
        }
        Ok(accepted)
    }

    /// Snapshot of queued requests in execution order.
    pub fn pending_sync_requests(&self) -> Vec<SyncRequest> {
        self.shared.queues.pending()
    }

    /// Snapshot of executing requests with their current status.
    pub fn active_sync_requests(&self) -> Vec<SyncRequest> {
        self.shared.queues.active()
    }

    /// Register an observer for every recorded replication item.
    ///
    /// Applies to jobs started after registration.
    pub fn register_completion_callback(&self, callback: CompletionCallback) {
        self.shared.callbacks.write().push(callback);
    }

    pub fn is_idle(&self) -> bool {
        self.shared.queues.is_idle()
    }

    /// Wait until nothing is pending or active. Returns `false` on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let schedule = RetryConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_duration: timeout,
        };
        retry_until(&schedule, || async { self.shared.queues.is_idle() }).await
    }

    /// Drain and stop.
    ///
    /// Rejects new submissions, waits (with backoff, up to the configured
    /// drain timeout) for the queues to empty, then stops the dispatcher.
    /// If the queues never empty the dispatcher is aborted mid-request.
    /// Returns whether the queues drained.
    pub async fn clean_up(&self) -> bool {
        match self.state() {
            ReplicatorState::Stopped => return true,
            ReplicatorState::Draining => {
                warn!("clean_up already in progress");
                return false;
            }
            ReplicatorState::Created | ReplicatorState::Running => {}
        }

        let started = self.state() == ReplicatorState::Running;
        self.set_state(ReplicatorState::Draining);
        let (pending, active) = self.shared.queues.depths();
        info!(pending, active, "Draining replicator");

        let drained = if started {
            let retry = self.dispatcher_config.drain_retry();
            retry_until(&retry, || async { self.shared.queues.is_idle() }).await
        } else {
            self.shared.queues.is_idle()
        };

        if !drained {
            let (pending, active) = self.shared.queues.depths();
            warn!(
                pending,
                active,
                timeout = ?self.dispatcher_config.drain_timeout(),
                "Drain timed out, stopping dispatcher"
            );
        }

        let _ = self.shutdown_tx.send(true);
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if !drained {
                handle.abort();
            }
            match handle.await {
                Ok(()) => debug!("Dispatcher stopped"),
                Err(e) if e.is_cancelled() => debug!("Dispatcher aborted"),
                Err(e) => warn!(error = %e, "Dispatcher panicked"),
            }
        }

        self.set_state(ReplicatorState::Stopped);
        info!(drained, "Replicator stopped");
        drained
    }

    fn set_state(&self, state: ReplicatorState) {
        let _ = self.state_tx.send(state);
        metrics::set_replicator_state(&state.to_string());
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (pending, active) = self.shared.queues.depths();
        f.debug_struct("Replicator")
            .field("state", &self.state())
            .field("local_site_id", &self.shared.local_site_id)
            .field("pending", &pending)
            .field("active", &active)
            .finish()
    }
}

/// Dispatcher loop: take, execute, repeat until shutdown.
async fn run_dispatcher(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let span = tracing::info_span!("dispatcher");
    async move {
        let _ = shutdown_rx.borrow_and_update();
        info!("Dispatcher started");

        loop {
            let request = tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Dispatcher shutting down");
                        break;
                    }
                    continue;
                }

                request = shared.queues.next() => request,
            };

            shared.execute(request).await;
        }
    }
    .instrument(span)
    .await
}

impl Shared {
    fn publish_depths(&self) {
        let (pending, active) = self.queues.depths();
        metrics::set_queue_depths(pending, active);
    }

    /// Execute one active request and remove it from the active set.
    async fn execute(&self, request: SyncRequest) {
        let filter_id = request.filter_id().to_string();
        let span = tracing::info_span!("sync_request", filter_id = %filter_id, filter = %request.filter.name);
        let started = Instant::now();

        let status = async {
            let mut filter = request.filter;
            let mut opened = Vec::new();

            // Adapters live outside the unwind boundary so a panicking job
            // still gets them closed.
            let result = AssertUnwindSafe(self.run(&mut filter, &mut opened))
                .catch_unwind()
                .await;

            self.close_all(opened).await;

            match result {
                Ok(Ok(Outcome::Completed(summary))) => {
                    info!(
                        created = summary.created,
                        updated = summary.updated,
                        deleted = summary.deleted,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        bytes = summary.bytes_transferred,
                        "Sync request completed"
                    );
                    if summary.failed == 0 {
                        Status::Success
                    } else {
                        Status::Failure
                    }
                }
                Ok(Ok(Outcome::Skipped(reason))) => {
                    info!(reason, "Sync request skipped");
                    metrics::record_filter_skipped(reason);
                    Status::Canceled
                }
                Ok(Err(e)) if e.is_not_found() => {
                    warn!(error = %e, "Sync request references a missing record");
                    Status::Failure
                }
                Ok(Err(e)) => {
                    warn!(error = %e, retryable = e.is_retryable(), "Sync request failed");
                    Status::Failure
                }
                Err(panic) => {
                    warn!(panic = %panic_message(panic.as_ref()), "Sync request panicked");
                    metrics::record_request_panic();
                    Status::Failure
                }
            }
        }
        .instrument(span)
        .await;

        self.queues.set_status(&filter_id, status);
        self.queues.complete(&filter_id);
        self.publish_depths();
        debug!(filter_id = %filter_id, status = %status, "Sync request finished");
        metrics::record_request_executed(&status.to_string(), started.elapsed());
    }

    /// Resolve sites, open adapters into `opened`, and run the plan.
    async fn run(&self, filter: &mut Filter, opened: &mut Vec<OpenedAdapter>) -> Result<Outcome> {
        let remote_id = filter.remote_site_id(&self.local_site_id).to_string();
        let mut local = self.sites.get(&self.local_site_id).await?;
        let mut remote = self.sites.get(&remote_id).await?;

        if remote.remote_managed {
            return Ok(Outcome::Skipped("remote managed site"));
        }
        if !remote.kind.is_known() {
            return Ok(Outcome::Skipped("unknown site kind"));
        }

        self.open(&mut local, opened).await?;
        self.open(&mut remote, opened).await?;

        // Local first, remote second, as opened above.
        let (local_adapter, remote_adapter) = match opened.as_slice() {
            [local, remote] => (local.adapter.as_ref(), remote.adapter.as_ref()),
            _ => return Err(ReplicationError::Internal("adapter set incomplete".to_string())),
        };

        for (site, adapter) in [(&local, local_adapter), (&remote, remote_adapter)] {
            if !adapter.is_available().await {
                return Err(ReplicationError::Unavailable {
                    site: site.name.clone(),
                    url: site.url.clone(),
                });
            }
        }

        let plan = TransferPlan::for_site(&remote);
        if let TransferPlan::Skip(reason) = plan {
            return Ok(Outcome::Skipped(reason));
        }
        debug!(plan = ?plan, remote = %remote.name, "Running transfer plan");

        let callbacks = self.callbacks.read().clone();
        let mut total = JobSummary::default();
        for direction in plan.directions() {
            self.queues.set_status(&filter.id, direction.status());
            let (source, destination) = match direction {
                Direction::Push => (local_adapter, remote_adapter),
                Direction::Pull => (remote_adapter, local_adapter),
            };

            let summary = self
                .syncer
                .create(source, destination, filter, &callbacks)
                .sync()
                .await?;
            metrics::record_job_summary(direction.label(), &summary);
            total.merge(&summary);
        }

        Ok(Outcome::Completed(total))
    }

    async fn open(&self, site: &mut Site, opened: &mut Vec<OpenedAdapter>) -> Result<()> {
        let adapter = self.adapters.open(site, self.sites.as_ref()).await?;
        opened.push(OpenedAdapter {
            site: site.name.clone(),
            site_type: site.site_type,
            adapter,
        });
        Ok(())
    }

    /// Close every adapter, logging failures. A panicking `close()` is
    /// contained here as well; it runs after the job's unwind boundary.
    async fn close_all(&self, opened: Vec<OpenedAdapter>) {
        for OpenedAdapter {
            site,
            site_type,
            adapter,
        } in opened
        {
            let closed = AssertUnwindSafe(async move { adapter.close().await })
                .catch_unwind()
                .await;
            match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(site = %site, error = %e, "Failed to close adapter");
                    metrics::record_adapter_close_failure(&site_type.to_string());
                }
                Err(panic) => {
                    warn!(site = %site, panic = %panic_message(panic.as_ref()), "Adapter close panicked");
                    metrics::record_adapter_close_failure(&site_type.to_string());
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MemoryAdapterFactory, MemoryCatalog};
    use crate::config::QueryConfig;
    use crate::item::ReplicationItem;
    use crate::metadata::Metadata;
    use crate::site::SiteKind;
    use crate::store::{MemoryFilterManager, MemoryReplicationItemManager, MemorySiteManager};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        replicator: Replicator,
        local: Arc<MemoryCatalog>,
        remote: Arc<MemoryCatalog>,
        items: Arc<MemoryReplicationItemManager>,
    }

    fn fixture(remote_kind: SiteKind) -> Fixture {
        let local = MemoryCatalog::new("local-catalog");
        let remote = MemoryCatalog::new("remote-catalog");
        let sites = Arc::new(MemorySiteManager::with_sites([
            Site::new("local", "local", "mem://local", SiteType::Ddf, SiteKind::Regional),
            Site::new("remote", "remote", "mem://remote", SiteType::Ddf, remote_kind),
        ]));
        let filter = Filter::new("f1", "all", "remote", "local", "*");
        let filters = Arc::new(MemoryFilterManager::with_filters([filter]));
        let items = Arc::new(MemoryReplicationItemManager::new());
        let adapters = NodeAdapters::new().with_factory(Arc::new(
            MemoryAdapterFactory::new(SiteType::Ddf)
                .with_catalog("mem://local", Arc::clone(&local))
                .with_catalog("mem://remote", Arc::clone(&remote)),
        ));
        let syncer = Syncer::new(items.clone(), filters, QueryConfig::default());
        let replicator = Replicator::new(
            &ReplicatorSettings::for_testing("local"),
            adapters,
            sites,
            syncer,
        );
        Fixture {
            replicator,
            local,
            remote,
            items,
        }
    }

    fn request() -> SyncRequest {
        SyncRequest::new(Filter::new("f1", "all", "remote", "local", "*"))
    }

    fn record(id: &str) -> Metadata {
        record_at(id, 1_000)
    }

    fn record_at(id: &str, secs: i64) -> Metadata {
        Metadata::new(id, b"<xml/>".to_vec(), Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let f = fixture(SiteKind::Regional);
        f.replicator.start().unwrap();
        let err = f.replicator.start().unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidState { .. }));
        assert!(f.replicator.clean_up().await);
    }

    #[tokio::test]
    async fn test_submissions_queue_before_start() {
        let f = fixture(SiteKind::Regional);
        assert!(f.replicator.submit_sync_request(request()).unwrap());
        assert!(!f.replicator.submit_sync_request(request()).unwrap());
        assert_eq!(f.replicator.pending_sync_requests().len(), 1);
        assert!(f.replicator.active_sync_requests().is_empty());
    }

    #[tokio::test]
    async fn test_regional_pull_runs() {
        let f = fixture(SiteKind::Regional);
        f.remote.insert(record("a"));
        f.local.insert(record("local-only"));

        f.replicator.start().unwrap();
        f.replicator.submit_sync_request(request()).unwrap();
        assert!(f.replicator.wait_until_idle(Duration::from_secs(2)).await);

        assert!(f.local.get("a").is_some());
        assert!(f.remote.get("local-only").is_none());
        assert_eq!(f.items.history("f1").len(), 1);
        f.replicator.clean_up().await;
    }

    #[tokio::test]
    async fn test_tactical_runs_both_directions() {
        let f = fixture(SiteKind::Tactical);
        // Both directions share one cursor; the pull only sees records
        // newer than what the push left behind.
        f.local.insert(record_at("from-local", 1_000));
        f.remote.insert(record_at("from-remote", 2_000));

        f.replicator.start().unwrap();
        f.replicator.submit_sync_request(request()).unwrap();
        assert!(f.replicator.wait_until_idle(Duration::from_secs(2)).await);

        assert!(f.remote.get("from-local").is_some());
        assert!(f.local.get("from-remote").is_some());
        f.replicator.clean_up().await;
    }

    #[tokio::test]
    async fn test_unknown_kind_skipped() {
        let f = fixture(SiteKind::Unknown);
        f.remote.insert(record("a"));

        f.replicator.start().unwrap();
        f.replicator.submit_sync_request(request()).unwrap();
        assert!(f.replicator.wait_until_idle(Duration::from_secs(2)).await);

        assert!(f.local.get("a").is_none());
        assert!(f.items.history("f1").is_empty());
        f.replicator.clean_up().await;
    }

    #[tokio::test]
    async fn test_unavailable_remote_completes_request() {
        let f = fixture(SiteKind::Regional);
        f.remote.insert(record("a"));
        f.remote.set_available(false);

        f.replicator.start().unwrap();
        f.replicator.submit_sync_request(request()).unwrap();
        assert!(f.replicator.wait_until_idle(Duration::from_secs(2)).await);
        assert!(f.local.get("a").is_none());

        // Dispatcher survives and runs the next request.
        f.remote.set_available(true);
        f.replicator.submit_sync_request(request()).unwrap();
        assert!(f.replicator.wait_until_idle(Duration::from_secs(2)).await);
        assert!(f.local.get("a").is_some());
        f.replicator.clean_up().await;
    }

    #[tokio::test]
    async fn test_missing_site_completes_request() {
        let f = fixture(SiteKind::Regional);
        f.replicator.start().unwrap();
        let orphan = SyncRequest::new(Filter::new("f2", "orphan", "gone", "local", "*"));
        f.replicator.submit_sync_request(orphan).unwrap();
        assert!(f.replicator.wait_until_idle(Duration::from_secs(2)).await);
        f.replicator.clean_up().await;
    }

    #[tokio::test]
    async fn test_callbacks_receive_items() {
        let f = fixture(SiteKind::Regional);
        f.remote.insert(record("a"));
        f.remote.insert(record("b"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.replicator
            .register_completion_callback(Arc::new(move |item: &ReplicationItem| {
                sink.lock().push(item.metadata_id.clone())
            }));

        f.replicator.start().unwrap();
        f.replicator.submit_sync_request(request()).unwrap();
        assert!(f.replicator.wait_until_idle(Duration::from_secs(2)).await);

        let mut ids = seen.lock().clone();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
        f.replicator.clean_up().await;
    }

    #[tokio::test]
    async fn test_clean_up_rejects_submissions() {
        let f = fixture(SiteKind::Regional);
        f.replicator.start().unwrap();
        assert!(f.replicator.clean_up().await);
        assert_eq!(f.replicator.state(), ReplicatorState::Stopped);

        let err = f.replicator.submit_sync_request(request()).unwrap_err();
        assert!(matches!(err, ReplicationError::Shutdown));
        assert!(f.replicator.clean_up().await);
    }

    #[tokio::test]
    async fn test_clean_up_before_start_with_pending() {
        let f = fixture(SiteKind::Regional);
        f.replicator.submit_sync_request(request()).unwrap();
        assert!(!f.replicator.clean_up().await);
        assert_eq!(f.replicator.state(), ReplicatorState::Stopped);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
