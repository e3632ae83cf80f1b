//! Periodic scheduling of filters.
//!
//! Every `period` the [`ReplicatorRunner`] lists the sites to consider,
//! drops the ones it cannot replicate, and submits each remaining site's
//! non-suspended filters to the [`Replicator`]. A filter belongs to its
//! remote end only, so listing the local site never schedules filters whose
//! remote was dropped. The first cycle runs immediately on
//! [`init()`](ReplicatorRunner::init).
//!
//! # Site selection
//!
//! | Condition | Result |
//! |-----------|--------|
//! | configured id no longer resolves | skipped (logged) |
//! | unknown type or unknown kind | skipped (logged) |
//! | remote managed | skipped |
//! | filter whose remote end is another site | not submitted for this site |
//! | suspended filter | not submitted |

use crate::config::RunnerConfig;
use crate::error::{ReplicationError, Result};
use crate::filter::SyncRequest;
use crate::metrics;
use crate::replicator::Replicator;
use crate::site::Site;
use crate::store::{FilterManager, SiteManager};
use futures::TryStreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// How long `destroy()` waits for an in-flight cycle before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Feeds the replicator on a fixed period.
pub struct ReplicatorRunner {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: RunnerConfig,
    sites: Arc<dyn SiteManager>,
    filters: Arc<dyn FilterManager>,
    replicator: Arc<Replicator>,
}

impl ReplicatorRunner {
    pub fn new(
        config: RunnerConfig,
        sites: Arc<dyn SiteManager>,
        filters: Arc<dyn FilterManager>,
        replicator: Arc<Replicator>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                sites,
                filters,
                replicator,
            }),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Start the scheduling timer. Calling it again while running is a no-op.
    pub fn init(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Runner already started");
            return;
        }

        let _ = self.shutdown_tx.send(false);
        let inner = Arc::clone(&self.inner);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(run_schedule(inner, shutdown_rx)));
        info!(period = ?self.inner.config.period(), "Replicator runner started");
    }

    /// Stop the timer, letting an in-flight cycle finish briefly first.
    pub async fn destroy(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("Runner stopped"),
            Ok(Err(e)) => warn!(error = %e, "Runner task panicked"),
            Err(_) => {
                warn!("Runner did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    /// Run one scheduling cycle now. Returns how many requests were accepted.
    pub async fn schedule_replication(&self) -> Result<usize> {
        self.inner.schedule_replication().await
    }
}

impl Drop for ReplicatorRunner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_schedule(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    let span = tracing::info_span!("runner");
    async move {
        let _ = shutdown_rx.borrow_and_update();
        let mut timer = tokio::time::interval(inner.config.period());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Runner shutting down");
                        break;
                    }
                    continue;
                }

                _ = timer.tick() => {}
            }

            match inner.schedule_replication().await {
                Ok(submitted) => debug!(submitted, "Scheduling cycle complete"),
                Err(ReplicationError::Shutdown) => {
                    info!("Replicator is shutting down, stopping runner");
                    break;
                }
                Err(e) => warn!(error = %e, "Scheduling cycle failed"),
            }
        }
    }
    .instrument(span)
    .await
}

impl Inner {
    async fn schedule_replication(&self) -> Result<usize> {
        let started = Instant::now();
        let sites = self.sites_to_schedule().await?;

        let local_site_id = self.replicator.local_site_id();
        let mut seen = HashSet::new();
        let mut submitted = 0;
        for site in sites {
            if !site.is_schedulable() {
                let reason = if site.remote_managed {
                    "remote managed site"
                } else {
                    "unknown site type or kind"
                };
                debug!(site = %site.name, site_type = %site.site_type, kind = %site.kind, reason, "Skipping site");
                metrics::record_filter_skipped(reason);
                continue;
            }

            let filters = self.filters.filters_for_site(&site.id).await?;
            for filter in filters {
                if filter.remote_site_id(local_site_id) != site.id {
                    continue;
                }
                if filter.suspended {
                    debug!(filter_id = %filter.id, "Skipping suspended filter");
                    metrics::record_filter_skipped("suspended");
                    continue;
                }
                if !seen.insert(filter.id.clone()) {
                    continue;
                }

                // Shutdown propagates; the timer loop treats it as a stop signal.
                if self.replicator.submit_sync_request(SyncRequest::new(filter))? {
                    submitted += 1;
                }
            }
        }

        metrics::record_runner_cycle(submitted, started.elapsed());
        Ok(submitted)
    }

    /// Configured sites, or every known site when none are configured.
    async fn sites_to_schedule(&self) -> Result<Vec<Site>> {
        if self.config.sites.is_empty() {
            return self.sites.objects().try_collect().await;
        }

        let mut sites = Vec::with_capacity(self.config.sites.len());
        for id in &self.config.sites {
            match self.sites.get(id).await {
                Ok(site) => sites.push(site),
                Err(e) if e.is_not_found() => {
                    warn!(site_id = %id, "Configured site no longer exists");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sites)
    }
}
