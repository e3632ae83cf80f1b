//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Dispatch queue intake and deduplication
//! - Request execution duration and outcome
//! - Job summaries per direction
//! - Adapter lifetime problems
//! - Scheduler cycles
//!
//! Labels stay low-cardinality: outcomes, directions, site types and reasons.
//! Filter ids go into tracing fields instead.
//!
//! Per-item metrics are not emitted by the core itself. An embedder that wants
//! them registers [`item_metrics_callback()`] as a completion callback.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use catalog_replication::metrics;
//! use std::time::Duration;
//!
//! metrics::record_request_submitted(true);
//! metrics::record_request_executed("success", Duration::from_millis(80));
//! ```

use crate::item::ReplicationItem;
use crate::syncer::{CompletionCallback, JobSummary};
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Duration;

/// Record a submission to the dispatch queue.
pub fn record_request_submitted(accepted: bool) {
    let outcome = if accepted { "queued" } else { "deduplicated" };
    counter!("replication_requests_submitted_total", "outcome" => outcome).increment(1);
}

/// A pending request was dropped because its filter was already active.
pub fn record_request_dropped_active() {
    counter!("replication_requests_dropped_active_total").increment(1);
}

/// Record queue depths.
pub fn set_queue_depths(pending: usize, active: usize) {
    gauge!("replication_requests_pending").set(pending as f64);
    gauge!("replication_requests_active").set(active as f64);
}

/// Record one executed sync request.
pub fn record_request_executed(outcome: &str, duration: Duration) {
    counter!("replication_requests_executed_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("replication_request_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

/// Record the summary of one job.
pub fn record_job_summary(direction: &str, summary: &JobSummary) {
    let direction = direction.to_string();
    counter!("replication_job_items_total", "direction" => direction.clone(), "action" => "create")
        .increment(summary.created as u64);
    counter!("replication_job_items_total", "direction" => direction.clone(), "action" => "update")
        .increment(summary.updated as u64);
    counter!("replication_job_items_total", "direction" => direction.clone(), "action" => "delete")
        .increment(summary.deleted as u64);
    counter!("replication_job_items_failed_total", "direction" => direction.clone())
        .increment(summary.failed as u64);
    counter!("replication_job_items_skipped_total", "direction" => direction.clone())
        .increment(summary.skipped as u64);
    counter!("replication_job_bytes_total", "direction" => direction)
        .increment(summary.bytes_transferred);
}

/// Record a filter skipped before any job ran.
pub fn record_filter_skipped(reason: &str) {
    counter!("replication_filters_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record an adapter close failure.
pub fn record_adapter_close_failure(site_type: &str) {
    counter!("replication_adapter_close_failures_total", "site_type" => site_type.to_string())
        .increment(1);
}

/// Record a panic caught at the request boundary.
pub fn record_request_panic() {
    counter!("replication_request_panics_total").increment(1);
}

/// Record one scheduling cycle.
pub fn record_runner_cycle(submitted: usize, duration: Duration) {
    counter!("replication_runner_cycles_total").increment(1);
    counter!("replication_runner_submissions_total").increment(submitted as u64);
    histogram!("replication_runner_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Gauge for replicator state.
pub fn set_replicator_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "Draining" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("replication_replicator_state").set(value);
}

/// Record one completed item, tagged by source and destination.
pub fn record_item(item: &ReplicationItem) {
    let status = item.status.to_string();
    counter!(
        "replication_items_total",
        "source" => item.source.clone(),
        "destination" => item.destination.clone(),
        "action" => item.action.to_string(),
        "status" => status
    )
    .increment(1);
    if item.bytes_transferred > 0 {
        counter!(
            "replication_item_bytes_total",
            "source" => item.source.clone(),
            "destination" => item.destination.clone()
        )
        .increment(item.bytes_transferred);
    }
}

/// A completion callback that feeds [`record_item`].
pub fn item_metrics_callback() -> CompletionCallback {
    Arc::new(record_item)
}
