//! Pending queue and active set, deduplicated by filter id.
//!
//! Both live under one lock so that moving a request from pending to active
//! is atomic: no observer can see a filter in neither place, or in both.

use crate::filter::SyncRequest;
use crate::item::Status;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<SyncRequest>,
    active: HashMap<String, SyncRequest>,
}

impl QueueState {
    fn contains(&self, filter_id: &str) -> bool {
        self.active.contains_key(filter_id) || self.pending.iter().any(|r| r.filter_id() == filter_id)
    }
}

/// What [`SyncQueues::try_activate`] found at the head of the queue.
#[derive(Debug)]
pub(crate) enum Activation {
    /// Moved to the active set; the caller must execute it.
    Ready(SyncRequest),
    /// Head was already active and has been dropped.
    DroppedActive(String),
    Empty,
}

#[derive(Default)]
pub(crate) struct SyncQueues {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl SyncQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue unless the filter is already pending or active.
    pub(crate) fn push(&self, request: SyncRequest) -> bool {
        {
            let mut state = self.state.lock();
            if state.contains(request.filter_id()) {
                return false;
            }
            state.pending.push_back(request);
        }
        self.ready.notify_one();
        true
    }

    /// Pop the head of the pending queue into the active set.
    pub(crate) fn try_activate(&self) -> Activation {
        let mut state = self.state.lock();
        let Some(mut request) = state.pending.pop_front() else {
            return Activation::Empty;
        };
        let filter_id = request.filter_id().to_string();
        if state.active.contains_key(&filter_id) {
            return Activation::DroppedActive(filter_id);
        }
        request.status = Status::Pending;
        state.active.insert(filter_id, request.clone());
        Activation::Ready(request)
    }

    /// Wait for the next request and activate it.
    ///
    /// Cancel-safe: nothing is activated until the future resolves.
    pub(crate) async fn next(&self) -> SyncRequest {
        loop {
            let notified = self.ready.notified();
            match self.try_activate() {
                Activation::Ready(request) => return request,
                Activation::DroppedActive(filter_id) => {
                    crate::metrics::record_request_dropped_active();
                    tracing::debug!(filter_id = %filter_id, "Dropped pending request for active filter");
                }
                Activation::Empty => notified.await,
            }
        }
    }

    /// Update the status of an active request.
    pub(crate) fn set_status(&self, filter_id: &str, status: Status) {
        if let Some(request) = self.state.lock().active.get_mut(filter_id) {
            request.status = status;
        }
    }

    /// Remove a request from the active set.
    pub(crate) fn complete(&self, filter_id: &str) -> Option<SyncRequest> {
        self.state.lock().active.remove(filter_id)
    }

    pub(crate) fn pending(&self) -> Vec<SyncRequest> {
        self.state.lock().pending.iter().cloned().collect()
    }

    pub(crate) fn active(&self) -> Vec<SyncRequest> {
        self.state.lock().active.values().cloned().collect()
    }

    /// (pending, active)
    pub(crate) fn depths(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.pending.len(), state.active.len())
    }

    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.pending.is_empty() && state.active.is_empty()
    }

    /// Test hook: place a request straight into the active set.
    #[cfg(test)]
    fn force_active(&self, request: SyncRequest) {
        let mut state = self.state.lock();
        state.active.insert(request.filter_id().to_string(), request);
    }

    /// Test hook: enqueue without the duplicate check.
    #[cfg(test)]
    fn force_pending(&self, request: SyncRequest) {
        self.state.lock().pending.push_back(request);
    }
}
