//! Tracking adapter for testing.
//!
//! Wraps the in-memory adapter and records every open, close and query per
//! site URL. Faults are configured per URL and read at call time, so a test
//! can flip them between requests.

use catalog_replication::adapter::AdapterFuture;
use catalog_replication::{
    AdapterError, AdapterResult, MemoryAdapterFactory, Metadata, NodeAdapter, NodeAdapterFactory,
    QueryRequest, QueryResponse, Resource, SiteType,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Faults injected into adapters for one URL.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `close()` returns a transport error.
    pub fail_close: bool,
    /// `close()` panics after being counted.
    pub panic_on_close: bool,
    /// `query()` panics.
    pub panic_on_query: bool,
    /// `query()` returns a stream that never yields.
    pub hang_on_query: bool,
    /// `system_name()` sleeps this long first.
    pub name_delay: Option<Duration>,
    /// Writes touching these ids fail with a transport error.
    pub fail_writes: HashSet<String>,
    /// A failed write also takes the site offline.
    pub lose_connection_on_write: bool,
    /// `is_available()` answers false.
    pub offline: bool,
}

#[derive(Default)]
struct TrackerState {
    opens: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    queries: HashMap<String, usize>,
    faults: HashMap<String, Faults>,
}

/// Shared call log for every [`TrackingFactory`] in a test.
#[derive(Default)]
pub struct Tracker {
    state: Mutex<TrackerState>,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self, url: &str) -> usize {
        self.state.lock().opens.get(url).copied().unwrap_or(0)
    }

    pub fn closes(&self, url: &str) -> usize {
        self.state.lock().closes.get(url).copied().unwrap_or(0)
    }

    pub fn queries(&self, url: &str) -> usize {
        self.state.lock().queries.get(url).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.state.lock().opens.values().sum()
    }

    pub fn total_closes(&self) -> usize {
        self.state.lock().closes.values().sum()
    }

    /// Highest number of adapters open at the same moment.
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Replace the faults for `url`.
    pub fn set_faults(&self, url: &str, faults: Faults) {
        self.state.lock().faults.insert(url.to_string(), faults);
    }

    /// Edit the faults for `url` in place.
    pub fn update_faults(&self, url: &str, edit: impl FnOnce(&mut Faults)) {
        let mut state = self.state.lock();
        edit(state.faults.entry(url.to_string()).or_default());
    }

    pub fn clear_faults(&self, url: &str) {
        self.state.lock().faults.remove(url);
    }

    fn faults(&self, url: &str) -> Faults {
        self.state.lock().faults.get(url).cloned().unwrap_or_default()
    }

    fn record_open(&self, url: &str) {
        *self.state.lock().opens.entry(url.to_string()).or_default() += 1;
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn record_close(&self, url: &str) {
        *self.state.lock().closes.entry(url.to_string()).or_default() += 1;
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_query(&self, url: &str) {
        *self.state.lock().queries.entry(url.to_string()).or_default() += 1;
    }
}

/// Factory wrapping [`MemoryAdapterFactory`] with call tracking.
pub struct TrackingFactory {
    inner: MemoryAdapterFactory,
    tracker: Arc<Tracker>,
}

impl TrackingFactory {
    pub fn new(inner: MemoryAdapterFactory, tracker: Arc<Tracker>) -> Self {
        Self { inner, tracker }
    }
}

impl NodeAdapterFactory for TrackingFactory {
    fn create(&self, url: &str) -> AdapterResult<Box<dyn NodeAdapter>> {
        let inner = self.inner.create(url)?;
        self.tracker.record_open(url);
        Ok(Box::new(TrackingAdapter {
            url: url.to_string(),
            inner,
            tracker: Arc::clone(&self.tracker),
        }))
    }

    fn site_type(&self) -> SiteType {
        self.inner.site_type()
    }
}

pub struct TrackingAdapter {
    url: String,
    inner: Box<dyn NodeAdapter>,
    tracker: Arc<Tracker>,
}

impl TrackingAdapter {
    /// Injected error for a write touching a failing id, if any.
    fn write_fault<'a>(&self, operation: &str, ids: impl IntoIterator<Item = &'a Metadata>) -> Option<AdapterError> {
        let faults = self.tracker.faults(&self.url);
        let hit = ids
            .into_iter()
            .filter_map(Metadata::id)
            .any(|id| faults.fail_writes.contains(id));
        if !hit {
            return None;
        }
        if faults.lose_connection_on_write {
            self.tracker.update_faults(&self.url, |f| f.offline = true);
        }
        Some(AdapterError::transport(operation, "injected write failure"))
    }
}

impl NodeAdapter for TrackingAdapter {
    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if self.tracker.faults(&self.url).offline {
                return false;
            }
            self.inner.is_available().await
        })
    }

    fn system_name(&self) -> AdapterFuture<'_, String> {
        Box::pin(async move {
            if let Some(delay) = self.tracker.faults(&self.url).name_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.system_name().await
        })
    }

    fn query(&self, request: QueryRequest) -> QueryResponse<'_> {
        self.tracker.record_query(&self.url);
        let faults = self.tracker.faults(&self.url);
        if faults.panic_on_query {
            panic!("injected query panic for {}", self.url);
        }
        if faults.hang_on_query {
            return QueryResponse::new(futures::stream::pending::<AdapterResult<Metadata>>());
        }
        self.inner.query(request)
    }

    fn exists(&self, metadata: &Metadata) -> AdapterFuture<'_, bool> {
        self.inner.exists(metadata)
    }

    fn create_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
        if let Some(e) = self.write_fault("create_request", &metadata) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.create_request(metadata)
    }

    fn update_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
        if let Some(e) = self.write_fault("update_request", &metadata) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.update_request(metadata)
    }

    fn delete_request(&self, metadata: Vec<Metadata>) -> AdapterFuture<'_, bool> {
        if let Some(e) = self.write_fault("delete_request", &metadata) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.delete_request(metadata)
    }

    fn read_resource(&self, metadata: &Metadata) -> AdapterFuture<'_, Resource> {
        self.inner.read_resource(metadata)
    }

    fn create_resource(&self, resources: Vec<Resource>) -> AdapterFuture<'_, bool> {
        if let Some(e) = self.write_fault("create_resource", resources.iter().map(|r| &r.metadata)) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.create_resource(resources)
    }

    fn update_resource(&self, resources: Vec<Resource>) -> AdapterFuture<'_, bool> {
        if let Some(e) = self.write_fault("update_resource", resources.iter().map(|r| &r.metadata)) {
            return Box::pin(async move { Err(e) });
        }
        self.inner.update_resource(resources)
    }

    fn close(self: Box<Self>) -> AdapterFuture<'static, ()> {
        let TrackingAdapter {
            url,
            inner,
            tracker,
        } = *self;
        Box::pin(async move {
            tracker.record_close(&url);
            let faults = tracker.faults(&url);
            if faults.panic_on_close {
                panic!("injected close panic for {url}");
            }
            inner.close().await?;
            if faults.fail_close {
                return Err(AdapterError::transport("close", "injected close failure"));
            }
            Ok(())
        })
    }
}
