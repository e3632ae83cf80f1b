// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lazy, paginated, deduplicating walk over one or more query requests.
//!
//! Remote catalogs can change while we page through them, so plain offset
//! pagination may return a record twice across a page boundary. The iterator
//! keeps the set of ids it has already yielded and drops repeats, while still
//! advancing its offset by the raw page length so it stays aligned with the
//! server's indexing.
//!
//! ```text
//!   requests: [R1, R2]
//!
//!   R1 @1 ──fetch──► [a b c] ──dedup──► a b c      index 1 → 4
//!   R1 @4 ──fetch──► [c d]   ──dedup──► d          index 4 → 6
//!   R1 @6 ──fetch──► []      ──empty──► switch to R2, index = R2.start_index
//!   R2 @1 ──fetch──► [x y]   ──dedup──► x y
//!   R2 @3 ──fetch──► []      ──empty──► finished
//! ```
//!
//! Only one page is held in memory at a time. The sequence is single-pass.
//! The first request's `max_results` caps the whole chain.

use crate::error::AdapterResult;
use crate::metadata::Metadata;
use crate::query::QueryRequest;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use tracing::trace;

/// Paginated iterator over the results of chained [`QueryRequest`]s.
///
/// `fetch` returns one page for the request it is given; the request's
/// `start_index` is set by the iterator.
pub struct ResultIterable<F> {
    fetch: F,
    requests: std::vec::IntoIter<QueryRequest>,
    current: Option<QueryRequest>,
    index: usize,
    page: std::vec::IntoIter<Metadata>,
    seen: HashSet<String>,
    finished: bool,
    remaining: Option<usize>,
}

impl<F, Fut> ResultIterable<F>
where
    F: FnMut(QueryRequest) -> Fut,
    Fut: Future<Output = AdapterResult<Vec<Metadata>>>,
{
    /// Iterate the results of a single request.
    pub fn new(fetch: F, request: QueryRequest) -> Self {
        Self::chained(fetch, vec![request])
    }

    /// Iterate the results of `requests` one after the other.
    ///
    /// Ids are deduplicated across the whole chain.
    pub fn chained(fetch: F, requests: Vec<QueryRequest>) -> Self {
        let mut requests = requests.into_iter();
        let current = requests.next();
        let index = current.as_ref().map(|r| r.start_index).unwrap_or_default();
        let remaining = current.as_ref().and_then(|r| r.max_results);
        let finished = current.is_none();
        Self {
            fetch,
            requests,
            current,
            index,
            page: Vec::new().into_iter(),
            seen: HashSet::new(),
            finished,
            remaining,
        }
    }

    /// Stop after `max_results` records, replacing any cap from the request.
    /// `Some(0)` yields nothing; `None` is unbounded.
    pub fn with_max_results(mut self, max_results: impl Into<Option<usize>>) -> Self {
        self.remaining = max_results.into();
        self
    }

    /// Next distinct record, `None` once exhausted.
    ///
    /// A fetch error is returned once and ends the iteration.
    pub async fn next(&mut self) -> Option<AdapterResult<Metadata>> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            if let Some(metadata) = self.page.next() {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Some(Ok(metadata));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fetch_next_page().await {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }

    /// Fill `page` with the next non-empty deduplicated page, or finish.
    async fn fetch_next_page(&mut self) -> AdapterResult<()> {
        loop {
            let Some(request) = self.current.as_ref() else {
                self.finished = true;
                return Ok(());
            };

            let paged = request.clone().with_start_index(self.index);
            let raw = (self.fetch)(paged).await?;
            let raw_len = raw.len();
            self.index += raw_len;

            let seen = &mut self.seen;
            let page: Vec<Metadata> = raw
                .into_iter()
                .filter(|m| match m.id() {
                    Some(id) => seen.insert(id.to_string()),
                    None => true,
                })
                .collect();

            trace!(
                raw = raw_len,
                distinct = page.len(),
                next_index = self.index,
                "Fetched result page"
            );

            if !page.is_empty() {
                self.page = page.into_iter();
                return Ok(());
            }

            self.current = self.requests.next();
            if let Some(next) = self.current.as_ref() {
                self.index = next.start_index;
            }
        }
    }

    /// Turn the iterator into a boxed stream.
    pub fn into_stream<'a>(self) -> BoxStream<'a, AdapterResult<Metadata>>
    where
        F: Send + 'a,
        Fut: Send + 'a,
    {
        stream::unfold(self, |mut iter| async move {
            iter.next().await.map(|item| (item, iter))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use chrono::Utc;
    use futures::TryStreamExt;
    use std::collections::HashMap;

    fn record(id: &str) -> Metadata {
        Metadata::new(id, Vec::new(), Utc::now())
    }

    /// Serve fixed pages keyed by (cql, start_index).
    fn paged(
        pages: HashMap<(String, usize), Vec<&'static str>>,
    ) -> impl FnMut(QueryRequest) -> futures::future::Ready<AdapterResult<Vec<Metadata>>> {
        move |req: QueryRequest| {
            let ids = pages
                .get(&(req.cql.clone(), req.start_index))
                .cloned()
                .unwrap_or_default();
            futures::future::ready(Ok(ids.into_iter().map(record).collect()))
        }
    }

    async fn ids<F, Fut>(iter: ResultIterable<F>) -> Vec<String>
    where
        F: FnMut(QueryRequest) -> Fut + Send + 'static,
        Fut: Future<Output = AdapterResult<Vec<Metadata>>> + Send + 'static,
    {
        iter.into_stream()
            .map_ok(|m| m.id.unwrap_or_default())
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_request_pages() {
        let mut pages = HashMap::new();
        pages.insert(("q".to_string(), 1), vec!["a", "b"]);
        pages.insert(("q".to_string(), 3), vec!["c"]);
        let iter = ResultIterable::new(paged(pages), QueryRequest::new("q").with_page_size(2));
        assert_eq!(ids(iter).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_duplicates_across_boundary_advance_by_raw_size() {
        let mut pages = HashMap::new();
        pages.insert(("q".to_string(), 1), vec!["a", "b"]);
        // "b" shifted onto the next page by a concurrent insert
        pages.insert(("q".to_string(), 3), vec!["b", "c"]);
        pages.insert(("q".to_string(), 5), vec!["d"]);
        let iter = ResultIterable::new(paged(pages), QueryRequest::new("q").with_page_size(2));
        assert_eq!(ids(iter).await, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_chained_requests_reset_index() {
        let mut pages = HashMap::new();
        pages.insert(("first".to_string(), 1), vec!["a"]);
        pages.insert(("second".to_string(), 5), vec!["x", "a", "y"]);
        let requests = vec![
            QueryRequest::new("first"),
            QueryRequest::new("second").with_start_index(5),
        ];
        let iter = ResultIterable::chained(paged(pages), requests);
        assert_eq!(ids(iter).await, vec!["a", "x", "y"]);
    }

    #[tokio::test]
    async fn test_null_ids_never_deduplicated() {
        let mut calls = 0;
        let fetch = move |_req: QueryRequest| {
            calls += 1;
            let page = if calls == 1 {
                let mut anon = record("ignored");
                anon.id = None;
                vec![anon.clone(), anon]
            } else {
                Vec::new()
            };
            futures::future::ready(Ok(page))
        };
        let mut iter = ResultIterable::new(fetch, QueryRequest::new("q"));
        assert!(iter.next().await.unwrap().unwrap().id.is_none());
        assert!(iter.next().await.unwrap().unwrap().id.is_none());
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn test_max_results_caps_sequence() {
        let mut pages = HashMap::new();
        pages.insert(("q".to_string(), 1), vec!["a", "b", "c"]);
        let iter = ResultIterable::new(paged(pages), QueryRequest::new("q")).with_max_results(2);
        assert_eq!(ids(iter).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_request_cap_spans_chain() {
        let mut pages = HashMap::new();
        pages.insert(("first".to_string(), 1), vec!["a", "b"]);
        pages.insert(("second".to_string(), 1), vec!["x", "y"]);
        let requests = vec![
            QueryRequest::new("first").with_max_results(Some(3)),
            QueryRequest::new("second"),
        ];
        let iter = ResultIterable::chained(paged(pages), requests);
        assert_eq!(ids(iter).await, vec!["a", "b", "x"]);
    }

    #[tokio::test]
    async fn test_zero_cap_fetches_nothing() {
        let mut fetches = 0;
        let fetch = |_req: QueryRequest| {
            fetches += 1;
            futures::future::ready(Ok(vec![record("a")]))
        };
        let mut iter = ResultIterable::new(fetch, QueryRequest::new("q").with_max_results(Some(0)));
        assert!(iter.next().await.is_none());
        drop(iter);
        assert_eq!(fetches, 0);
    }

    #[tokio::test]
    async fn test_error_ends_iteration() {
        let fetch = |_req: QueryRequest| {
            futures::future::ready(Err::<Vec<Metadata>, _>(AdapterError::transport(
                "query", "503",
            )))
        };
        let mut iter = ResultIterable::new(fetch, QueryRequest::new("q"));
        assert!(iter.next().await.unwrap().is_err());
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn test_no_requests_is_empty() {
        let fetch = |_req: QueryRequest| futures::future::ready(Ok(vec![record("a")]));
        let mut iter = ResultIterable::chained(fetch, Vec::new());
        assert!(iter.next().await.is_none());
    }
}
