// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-direction synchronization of a filter between two adapters.
//!
//! A [`Job`] walks the source's records matching the filter's query window
//! and brings the destination in line, one record at a time:
//!
//! ```text
//!   for each source record (modified order):
//!     lineage has destination? ──────────────► skip (bounce-back)
//!     latest item == PermanentFailure
//!       and source unchanged? ───────────────► skip
//!     deleted? ─ no history ─────────────────► skip
//!              ─ history ────────────────────► DELETE
//!     destination.exists? ─ no ──────────────► CREATE
//!                         ─ yes, unchanged ──► skip (cursor advances)
//!                         ─ yes, changed ────► UPDATE (metadata and/or resource)
//!
//!   outcome ──► ReplicationItem saved ──► completion callbacks
//!   failure ──► probe both adapters ──► lost? record ConnectionLost, abort job
//! ```
//!
//! Individual item failures never fail the job. Only a lost connection, a
//! failed query or a persistence error ends it early.

use crate::adapter::NodeAdapter;
use crate::config::QueryConfig;
use crate::error::{AdapterError, ReplicationError, Result};
use crate::filter::Filter;
use crate::item::{Action, ReplicationItem, Status};
use crate::metadata::{Metadata, REPLICATED_TAG};
use crate::query::QueryRequest;
use crate::store::{FilterManager, ReplicationItemManager};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Observer invoked once per recorded [`ReplicationItem`].
pub type CompletionCallback = Arc<dyn Fn(&ReplicationItem) + Send + Sync>;

/// Sort expression asking the source for oldest-modified first.
pub const MODIFIED_ASCENDING: &str = "metadata_modified ASC";

/// Counts for one finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
}

impl JobSummary {
    /// Records that reached a recorded outcome.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.deleted + self.failed
    }

    pub fn merge(&mut self, other: &JobSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.bytes_transferred += other.bytes_transferred;
    }
}

/// Creates [`Job`]s sharing the same persistence collaborators.
#[derive(Clone)]
pub struct Syncer {
    items: Arc<dyn ReplicationItemManager>,
    filters: Arc<dyn FilterManager>,
    query: QueryConfig,
}

impl Syncer {
    pub fn new(
        items: Arc<dyn ReplicationItemManager>,
        filters: Arc<dyn FilterManager>,
        query: QueryConfig,
    ) -> Self {
        Self {
            items,
            filters,
            query,
        }
    }

    /// Prepare a job moving records of `filter` from `source` to `destination`.
    ///
    /// Cursor fields of `filter` are updated in place as the job runs.
    pub fn create<'a>(
        &'a self,
        source: &'a dyn NodeAdapter,
        destination: &'a dyn NodeAdapter,
        filter: &'a mut Filter,
        callbacks: &'a [CompletionCallback],
    ) -> Job<'a> {
        Job {
            syncer: self,
            source,
            destination,
            filter,
            callbacks,
        }
    }
}

/// One run of one filter in one direction.
pub struct Job<'a> {
    syncer: &'a Syncer,
    source: &'a dyn NodeAdapter,
    destination: &'a dyn NodeAdapter,
    filter: &'a mut Filter,
    callbacks: &'a [CompletionCallback],
}

/// Names of both ends, resolved once per job.
struct Ends {
    source: String,
    destination: String,
}

/// What to do with one source record.
enum Plan {
    Skip(&'static str),
    /// Nothing to send; counts as caught up.
    UpToDate,
    Apply {
        action: Action,
        /// Resend the binary resource along with the metadata.
        send_resource: bool,
    },
}

impl Job<'_> {
    /// Run the job to completion.
    pub async fn sync(self) -> Result<JobSummary> {
        let Job {
            syncer,
            source,
            destination,
            filter,
            callbacks,
        } = self;

        let started = Utc::now();
        let mut summary = JobSummary::default();
        let transfer = Transfer {
            syncer,
            source,
            destination,
            callbacks,
        };

        let outcome = transfer.run(filter, &mut summary).await;

        filter.last_run = Some(started);
        if outcome.is_ok() && summary.failed == 0 {
            filter.last_success = Some(started);
        }
        let persisted = transfer.persist_cursors(filter).await;

        match outcome {
            Ok(()) => {
                persisted?;
                info!(
                    filter_id = %filter.id,
                    created = summary.created,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    bytes = summary.bytes_transferred,
                    "Job complete"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(pe) = persisted {
                    warn!(filter_id = %filter.id, error = %pe, "Failed to persist cursors of aborted job");
                }
                Err(e)
            }
        }
    }
}

struct Transfer<'a> {
    syncer: &'a Syncer,
    source: &'a dyn NodeAdapter,
    destination: &'a dyn NodeAdapter,
    callbacks: &'a [CompletionCallback],
}

impl Transfer<'_> {
    async fn run(&self, filter: &mut Filter, summary: &mut JobSummary) -> Result<()> {
        let ends = Ends {
            source: self.source.system_name().await?,
            destination: self.destination.system_name().await?,
        };
        let failed_ids = self.syncer.items.failure_list(&filter.id).await?;

        debug!(
            filter_id = %filter.id,
            source = %ends.source,
            destination = %ends.destination,
            since = ?filter.last_metadata_modified,
            retrying = failed_ids.len(),
            "Starting job"
        );

        let request = QueryRequest::new(filter.query.clone())
            .with_sort(MODIFIED_ASCENDING)
            .with_start_index(self.syncer.query.start_index)
            .with_page_size(self.syncer.query.page_size)
            .with_modified_after(filter.last_metadata_modified)
            .with_excluded_nodes(vec![ends.destination.clone()])
            .with_failed_item_ids(failed_ids)
            .with_max_results(self.syncer.query.max_results);

        let mut records = self.source.query(request).into_stream();
        while let Some(next) = records.next().await {
            let metadata = next?;
            self.sync_one(filter, &ends, metadata, summary).await?;
        }

        Ok(())
    }

    async fn sync_one(
        &self,
        filter: &mut Filter,
        ends: &Ends,
        metadata: Metadata,
        summary: &mut JobSummary,
    ) -> Result<()> {
        let Some(id) = metadata.id.clone() else {
            trace!(filter_id = %filter.id, "Skipping record without id");
            summary.skipped += 1;
            return Ok(());
        };

        if metadata.has_lineage(&ends.destination) {
            trace!(metadata_id = %id, destination = %ends.destination, "Record came from destination");
            summary.skipped += 1;
            filter.advance_cursor(metadata.metadata_modified);
            return Ok(());
        }

        let previous = self.syncer.items.latest(&filter.id, &id).await?;
        let start_time = Utc::now();

        let plan = match self.plan(&metadata, previous.as_ref()).await {
            Ok(plan) => plan,
            Err(e) => {
                // exists() failed; report against the action we would most likely take
                let action = if metadata.deleted { Action::Delete } else { Action::Update };
                return self
                    .record_failure(filter, ends, &metadata, previous.as_ref(), action, start_time, e, summary)
                    .await;
            }
        };

        let (action, send_resource) = match plan {
            Plan::Skip(reason) => {
                trace!(metadata_id = %id, reason, "Skipping record");
                summary.skipped += 1;
                return Ok(());
            }
            Plan::UpToDate => {
                trace!(metadata_id = %id, "Destination already current");
                summary.skipped += 1;
                filter.advance_cursor(metadata.metadata_modified);
                return Ok(());
            }
            Plan::Apply {
                action,
                send_resource,
            } => (action, send_resource),
        };

        match self.apply(ends, &metadata, action, send_resource).await {
            Ok(Some(bytes)) => {
                let item = self.item(filter, ends, &metadata, action, Status::Success, 0, start_time, bytes);
                self.syncer.items.save(item.clone()).await?;
                self.notify(&item);

                match action {
                    Action::Create => summary.created += 1,
                    Action::Update => summary.updated += 1,
                    Action::Delete => summary.deleted += 1,
                }
                summary.bytes_transferred += bytes;
                filter.advance_cursor(metadata.metadata_modified);
                debug!(metadata_id = %id, %action, bytes, "Replicated record");
                Ok(())
            }
            Ok(None) => {
                let rejected = AdapterError::transport(action.to_string(), "destination rejected the request");
                self.record_failure(filter, ends, &metadata, previous.as_ref(), action, start_time, rejected, summary)
                    .await
            }
            Err(e) => {
                self.record_failure(filter, ends, &metadata, previous.as_ref(), action, start_time, e, summary)
                    .await
            }
        }
    }

    /// Decide what to do with one record given its latest recorded attempt.
    async fn plan(
        &self,
        metadata: &Metadata,
        previous: Option<&ReplicationItem>,
    ) -> std::result::Result<Plan, AdapterError> {
        if let Some(prev) = previous {
            if prev.status == Status::PermanentFailure && !source_changed(metadata, prev) {
                return Ok(Plan::Skip("retries exhausted"));
            }
        }

        if metadata.deleted {
            return Ok(match previous {
                None => Plan::Skip("deleted before first replication"),
                Some(prev) if prev.action == Action::Delete && prev.is_success() => {
                    Plan::Skip("already deleted")
                }
                Some(_) => Plan::Apply {
                    action: Action::Delete,
                    send_resource: false,
                },
            });
        }

        if !self.destination.exists(metadata).await? {
            return Ok(Plan::Apply {
                action: Action::Create,
                send_resource: metadata.has_resource(),
            });
        }

        let (send_metadata, send_resource) = match previous {
            Some(prev) if prev.is_success() => (
                metadata.metadata_modified > prev.metadata_modified,
                metadata.has_resource() && metadata.resource_modified > prev.resource_modified,
            ),
            // Unknown or failed last attempt: resend everything
            _ => (true, metadata.has_resource()),
        };

        if !send_metadata && !send_resource {
            return Ok(Plan::UpToDate);
        }
        Ok(Plan::Apply {
            action: Action::Update,
            send_resource,
        })
    }

    /// Apply `action` to the destination.
    ///
    /// `Ok(Some(bytes))` on success, `Ok(None)` when the destination said no.
    async fn apply(
        &self,
        ends: &Ends,
        metadata: &Metadata,
        action: Action,
        send_resource: bool,
    ) -> std::result::Result<Option<u64>, AdapterError> {
        if action == Action::Delete {
            let ok = self.destination.delete_request(vec![metadata.clone()]).await?;
            return Ok(ok.then_some(0));
        }

        let mut outgoing = metadata.clone();
        outgoing.add_lineage(&ends.source);
        outgoing.add_tag(REPLICATED_TAG);

        if send_resource {
            let mut resource = self.source.read_resource(metadata).await?;
            resource.metadata = outgoing;
            let bytes = resource.size() + resource.metadata.metadata_size();
            let ok = match action {
                Action::Create => self.destination.create_resource(vec![resource]).await?,
                _ => self.destination.update_resource(vec![resource]).await?,
            };
            return Ok(ok.then_some(bytes));
        }

        let bytes = outgoing.metadata_size();
        let ok = match action {
            Action::Create => self.destination.create_request(vec![outgoing]).await?,
            _ => self.destination.update_request(vec![outgoing]).await?,
        };
        Ok(ok.then_some(bytes))
    }

    /// Record a failed attempt. Aborts the job if either end went away.
    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        &self,
        filter: &Filter,
        ends: &Ends,
        metadata: &Metadata,
        previous: Option<&ReplicationItem>,
        action: Action,
        start_time: DateTime<Utc>,
        error: AdapterError,
        summary: &mut JobSummary,
    ) -> Result<()> {
        let bytes = error.bytes_transferred().unwrap_or(0);
        let lost = if !self.source.is_available().await {
            Some(ends.source.clone())
        } else if !self.destination.is_available().await {
            Some(ends.destination.clone())
        } else {
            None
        };

        let failed_before = previous
            .map(|p| matches!(p.status, Status::Failure | Status::ConnectionLost))
            .unwrap_or(false);
        let prior_count = previous.map(|p| p.failure_count).unwrap_or(0);

        let (status, failure_count) = match &lost {
            Some(_) => (
                Status::ConnectionLost,
                if failed_before { prior_count } else { 0 },
            ),
            None => {
                let count = if failed_before {
                    (prior_count + 1).min(filter.failure_retry_count)
                } else {
                    0
                };
                let status = if count >= filter.failure_retry_count {
                    Status::PermanentFailure
                } else {
                    Status::Failure
                };
                (status, count)
            }
        };

        let item = self.item(filter, ends, metadata, action, status, failure_count, start_time, bytes);
        self.syncer.items.save(item.clone()).await?;
        self.notify(&item);
        summary.failed += 1;
        summary.bytes_transferred += bytes;

        warn!(
            filter_id = %filter.id,
            metadata_id = %item.metadata_id,
            %action,
            %status,
            failure_count,
            error = %error,
            "Item replication failed"
        );

        match lost {
            Some(system) => Err(ReplicationError::ConnectionLost { system }),
            None => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn item(
        &self,
        filter: &Filter,
        ends: &Ends,
        metadata: &Metadata,
        action: Action,
        status: Status,
        failure_count: u32,
        start_time: DateTime<Utc>,
        bytes_transferred: u64,
    ) -> ReplicationItem {
        ReplicationItem {
            metadata_id: metadata.id.clone().unwrap_or_default(),
            config_id: filter.id.clone(),
            source: ends.source.clone(),
            destination: ends.destination.clone(),
            action,
            status,
            resource_size: metadata.resource_size,
            metadata_size: metadata.metadata_size(),
            resource_modified: metadata.resource_modified,
            metadata_modified: metadata.metadata_modified,
            start_time,
            done_time: Utc::now(),
            failure_count,
            bytes_transferred,
        }
    }

    fn notify(&self, item: &ReplicationItem) {
        for callback in self.callbacks {
            callback(item);
        }
    }

    /// Write the cursor fields back onto the stored filter.
    ///
    /// Other fields of the stored copy are left alone. A filter removed while
    /// the job ran is not recreated.
    async fn persist_cursors(&self, filter: &Filter) -> Result<()> {
        let mut stored = match self.syncer.filters.get(&filter.id).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => {
                debug!(filter_id = %filter.id, "Filter removed during job; cursors dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        stored.last_run = filter.last_run;
        stored.last_success = filter.last_success;
        stored.last_metadata_modified = filter.last_metadata_modified;
        self.syncer.filters.save(stored).await
    }
}

/// Whether the source copy changed since `prev` was recorded.
fn source_changed(metadata: &Metadata, prev: &ReplicationItem) -> bool {
    metadata.metadata_modified > prev.metadata_modified
        || metadata.resource_modified > prev.resource_modified
}
