//! The query engine: a full-scan fallback for predicates that aren't
//! backed by a secondary index. Indexes are the fast path —
//! callers query the coordination-service sets directly via
//! [`crate::index::IndexSink::query`] — this is what's left over.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::backend::Backend;
use crate::error::StoreResult;

type Filter = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;
type Sorter = Arc<dyn Fn(&serde_json::Value, &serde_json::Value) -> Ordering + Send + Sync>;

/// A prefix plus a pipeline of optional filter, sort, offset, and limit.
/// Built with the `with_*` methods, then run against a
/// [`Backend`] with [`Query::execute`]/[`Query::first`]/[`Query::count`]/
/// [`Query::each`].
#[derive(Clone)]
pub struct Query {
    prefix: String,
    filter: Option<Filter>,
    sort: Option<Sorter>,
    offset: usize,
    limit: Option<usize>,
}

impl Query {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), filter: None, sort: None, offset: 0, limit: None }
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_sort<F>(mut self, sort: F) -> Self
    where
        F: Fn(&serde_json::Value, &serde_json::Value) -> Ordering + Send + Sync + 'static,
    {
        self.sort = Some(Arc::new(sort));
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, value: &serde_json::Value) -> bool {
        self.filter.as_ref().map(|f| f(value)).unwrap_or(true)
    }

    /// With a sort function: collect all matches, sort, then apply
    /// offset/limit. Without one: stream, applying offset/limit as the
    /// sequence is produced, early-exiting once the limit is reached.
    /// Unmarshal failures on an individual key are skipped, not
    /// propagated: a single corrupt or unparsable document is skipped, not
    /// fatal to the whole scan.
    pub async fn execute<B, T>(&self, backend: &B) -> StoreResult<Vec<T>>
    where
        B: Backend,
        T: DeserializeOwned,
    {
        let keys = backend.list(&self.prefix).await?;

        if let Some(sort) = &self.sort {
            let mut matches: Vec<(serde_json::Value, Vec<u8>)> = Vec::new();
            for key in &keys {
                let Ok(bytes) = backend.get(key).await else { continue };
                let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else { continue };
                if self.matches(&value) {
                    matches.push((value, bytes));
                }
            }
            matches.sort_by(|a, b| sort(&a.0, &b.0));

            let tail: Vec<_> = matches.into_iter().skip(self.offset).collect();
            let limited = match self.limit {
                Some(limit) => &tail[..tail.len().min(limit)],
                None => &tail[..],
            };

            Ok(limited
                .iter()
                .filter_map(|(_, bytes)| serde_json::from_slice(bytes).ok())
                .collect())
        } else {
            let mut out = Vec::new();
            let mut skipped = 0usize;

            for key in &keys {
                if let Some(limit) = self.limit {
                    if out.len() >= limit {
                        break;
                    }
                }

                let Ok(bytes) = backend.get(key).await else { continue };
                let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else { continue };
                if !self.matches(&value) {
                    continue;
                }

                if skipped < self.offset {
                    skipped += 1;
                    continue;
                }

                if let Ok(item) = serde_json::from_slice(&bytes) {
                    out.push(item);
                }
            }

            Ok(out)
        }
    }

    pub async fn first<B, T>(&self, backend: &B) -> StoreResult<Option<T>>
    where
        B: Backend,
        T: DeserializeOwned,
    {
        let limited = self.clone().with_limit(1);
        let mut results: Vec<T> = limited.execute(backend).await?;
        Ok(results.pop())
    }

    pub async fn count<B>(&self, backend: &B) -> StoreResult<usize>
    where
        B: Backend,
    {
        let keys = backend.list(&self.prefix).await?;
        let mut count = 0usize;
        let mut skipped = 0usize;

        for key in &keys {
            if let Some(limit) = self.limit {
                if count >= limit {
                    break;
                }
            }

            let Ok(bytes) = backend.get(key).await else { continue };
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else { continue };
            if !self.matches(&value) {
                continue;
            }

            if skipped < self.offset {
                skipped += 1;
                continue;
            }

            count += 1;
        }

        Ok(count)
    }

    /// Invoke `callback` once per match, in scan order. Stops early if
    /// `callback` returns `false`.
    pub async fn each<B, T, F>(&self, backend: &B, mut callback: F) -> StoreResult<()>
    where
        B: Backend,
        T: DeserializeOwned,
        F: FnMut(T) -> bool,
    {
        let items: Vec<T> = self.execute(backend).await?;
        for item in items {
            if !callback(item) {
                break;
            }
        }
        Ok(())
    }
}
