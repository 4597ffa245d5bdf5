//! Secondary-index manager and its extractor contract.
//!
//! [`IndexManager`] is generic over a [`Backend`] and an [`IndexSink`] so
//! the same Create/Update/Delete diffing logic backs both the Redis-set
//! index (`smarterbase-redis::RedisIndexSink`) and a file-backed index
//! living as ordinary documents.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::Backend;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{StoreError, StoreResult};
use crate::metrics::MetricsSink;

pub type EntityType = String;
pub type IndexNameStr = String;

/// A `(field-name, field-value)` pair produced by an [`Extractor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub name: String,
    pub value: String,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Returned by an [`Extractor`] to mean "this document does not
/// participate in this index" — not propagated as a failure by
/// [`IndexManager`].
#[derive(Debug, Clone)]
pub struct NonParticipation(pub String);

impl std::fmt::Display for NonParticipation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "document does not participate in this index: {}", self.0)
    }
}

/// A pure function of `(key, bytes)`. Extractors read no external state.
pub trait Extractor: Send + Sync + 'static {
    fn extract(&self, key: &str, bytes: &[u8]) -> Result<Vec<IndexEntry>, NonParticipation>;
}

/// Picks a top-level JSON field and uses its string (or stringified
/// scalar) representation as the index value.
pub struct FieldExtractor {
    pub index_name: &'static str,
    pub field: &'static str,
}

impl Extractor for FieldExtractor {
    fn extract(&self, _key: &str, bytes: &[u8]) -> Result<Vec<IndexEntry>, NonParticipation> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| NonParticipation(format!("invalid json: {e}")))?;

        match value.get(self.field) {
            Some(field_value) => Ok(vec![IndexEntry::new(self.index_name, scalar_to_string(field_value))]),
            None => Err(NonParticipation(format!("missing field {}", self.field))),
        }
    }
}

/// Navigates a `.`-separated path (e.g. `"address.city"`) into the
/// document.
pub struct DotPathExtractor {
    pub index_name: &'static str,
    pub path: &'static str,
}

impl Extractor for DotPathExtractor {
    fn extract(&self, _key: &str, bytes: &[u8]) -> Result<Vec<IndexEntry>, NonParticipation> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| NonParticipation(format!("invalid json: {e}")))?;

        let mut cursor = &value;
        for segment in self.path.split('.') {
            match cursor.get(segment) {
                Some(next) => cursor = next,
                None => return Err(NonParticipation(format!("missing path {}", self.path))),
            }
        }

        Ok(vec![IndexEntry::new(self.index_name, scalar_to_string(cursor))])
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Declarative record naming an entity type, an index name, and an
/// extractor. Immutable after registration.
#[derive(Clone)]
pub struct IndexSpec {
    pub entity_type: EntityType,
    pub index_name: IndexNameStr,
    pub extractor: Arc<dyn Extractor>,
}

impl IndexSpec {
    pub fn new(
        entity_type: impl Into<String>,
        index_name: impl Into<String>,
        extractor: impl Extractor,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            index_name: index_name.into(),
            extractor: Arc::new(extractor),
        }
    }
}

/// The set-membership side of an index: `Query(entity, name, value)` and
/// `Count` for readers, `add_member`/`remove_member` for the index
/// manager. Implemented against Redis sets (`smarterbase-redis`) or as a
/// file-backed variant over [`Backend`].
#[trait_variant::make(Send)]
pub trait IndexSink: Clone + Send + Sync + 'static {
    async fn add_member(
        &self,
        entity_type: &str,
        index_name: &str,
        value: &str,
        key: &str,
    ) -> StoreResult<()>;

    async fn remove_member(
        &self,
        entity_type: &str,
        index_name: &str,
        value: &str,
        key: &str,
    ) -> StoreResult<()>;

    async fn query(
        &self,
        entity_type: &str,
        index_name: &str,
        value: &str,
    ) -> StoreResult<HashSet<String>>;

    async fn count(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<u64>;
}

/// Guesses the entity type from a key using the `users/42`-style
/// convention: everything before the first `/`.
pub fn entity_type_of(key: &str) -> &str {
    key.split('/').next().unwrap_or(key)
}

/// State held: registered specs, a backend handle, an index-sink handle,
/// and a circuit breaker guarding the sink. Index maintenance is
/// best-effort: failures log and increment metrics but do not fail the
/// call that triggered them.
#[derive(Clone)]
pub struct IndexManager<B, S, M = crate::metrics::NoopMetrics> {
    backend: B,
    sink: S,
    specs: Arc<Vec<IndexSpec>>,
    breaker: Arc<CircuitBreaker>,
    metrics: M,
}

impl<B, S, M> IndexManager<B, S, M>
where
    B: Backend,
    S: IndexSink,
    M: MetricsSink,
{
    pub fn new(backend: B, sink: S, specs: Vec<IndexSpec>, breaker: Arc<CircuitBreaker>, metrics: M) -> Self {
        Self { backend, sink, specs: Arc::new(specs), breaker, metrics }
    }

    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn specs_for(&self, entity_type: &str) -> impl Iterator<Item = &IndexSpec> {
        self.specs.iter().filter(move |spec| spec.entity_type == entity_type)
    }

    async fn apply_best_effort(&self, entity_type: &str, key: &str, add: Vec<IndexEntry>, remove: Vec<IndexEntry>) {
        for entry in remove {
            let sink = self.sink.clone();
            let (entity, key) = (entity_type.to_string(), key.to_string());
            let result = self
                .breaker
                .execute(|| async move { sink.remove_member(&entity, &entry.name, &entry.value, &key).await })
                .await;
            if let Err(err) = result {
                tracing::warn!(entity_type, key, %err, "best-effort index removal failed");
                self.metrics.incr_error("index_remove");
            }
        }

        for entry in add {
            let sink = self.sink.clone();
            let (entity, key) = (entity_type.to_string(), key.to_string());
            let result = self
                .breaker
                .execute(|| async move { sink.add_member(&entity, &entry.name, &entry.value, &key).await })
                .await;
            if let Err(err) = result {
                tracing::warn!(entity_type, key, %err, "best-effort index addition failed");
                self.metrics.incr_error("index_add");
            }
        }
    }

    fn entries_for(&self, entity_type: &str, key: &str, bytes: &[u8]) -> Vec<IndexEntry> {
        self.specs_for(entity_type)
            .filter_map(|spec| spec.extractor.extract(key, bytes).ok())
            .flatten()
            .collect()
    }

    /// 1. Marshal and Put (fail fast on error, indexes untouched). 2. Run
    /// extractors against the new bytes and add the key to each resulting
    /// index set, best-effort.
    pub async fn create<V: Serialize>(&self, key: &str, value: &V) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::invalid_data("empty key"));
        }

        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::invalid_data(e.to_string()))?;
        if bytes.is_empty() {
            return Err(StoreError::invalid_data("empty marshaled payload"));
        }

        self.backend.put(key, bytes.clone()).await?;

        let entity_type = entity_type_of(key).to_string();
        let new_entries = self.entries_for(&entity_type, key, &bytes);
        self.apply_best_effort(&entity_type, key, new_entries, Vec::new()).await;

        Ok(())
    }

    /// 1. Read old bytes (ignore `NotFound`). 2. Marshal and Put the new
    /// bytes. 3. Diff old/new entries so unchanged values cause no churn.
    pub async fn update<V: Serialize>(&self, key: &str, value: &V) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::invalid_data("empty key"));
        }

        let old_bytes = match self.backend.get(key).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        let new_bytes = serde_json::to_vec(value).map_err(|e| StoreError::invalid_data(e.to_string()))?;
        self.backend.put(key, new_bytes.clone()).await?;

        let entity_type = entity_type_of(key).to_string();
        let old_entries: HashSet<IndexEntry> = old_bytes
            .as_deref()
            .map(|b| self.entries_for(&entity_type, key, b).into_iter().collect())
            .unwrap_or_default();
        let new_entries: HashSet<IndexEntry> = self.entries_for(&entity_type, key, &new_bytes).into_iter().collect();

        let to_remove: Vec<IndexEntry> = old_entries.difference(&new_entries).cloned().collect();
        let to_add: Vec<IndexEntry> = new_entries.difference(&old_entries).cloned().collect();

        self.apply_best_effort(&entity_type, key, to_add, to_remove).await;

        Ok(())
    }

    /// Removing from the index before deleting the document ensures that a
    /// reader who later sees the document-gone state never sees a stale
    /// index pointing to a missing document.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let current = match self.backend.get(key).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        if let Some(bytes) = current {
            let entity_type = entity_type_of(key).to_string();
            let entries = self.entries_for(&entity_type, key, &bytes);
            self.apply_best_effort(&entity_type, key, Vec::new(), entries).await;
        }

        self.backend.delete(key).await
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> StoreResult<V> {
        let bytes = self.backend.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::invalid_data(e.to_string()).with_key(key))
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.backend.exists(key).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    use crate::backend::{AsyncReadBox, Bytes, ETag, ListChunk};
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::metrics::NoopMetrics;

    use super::*;

    /// Minimal self-contained fakes so this module's tests don't need a
    /// crate dependency back on `smarterbase-testing` (which itself
    /// depends on this crate).
    #[derive(Clone, Default)]
    struct MapBackend {
        docs: Arc<Mutex<StdHashMap<String, Bytes>>>,
    }

    impl Backend for MapBackend {
        async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
            self.docs.lock().unwrap().insert(key.to_string(), bytes);
            Ok(())
        }

        async fn get(&self, key: &str) -> StoreResult<Bytes> {
            self.docs.lock().unwrap().get(key).cloned().ok_or_else(|| StoreError::not_found(key))
        }

        async fn get_with_etag(&self, key: &str) -> StoreResult<(Bytes, ETag)> {
            Ok((self.get(key).await?, ETag::new("x")))
        }

        async fn put_if_match(&self, key: &str, bytes: Bytes, _expected: &ETag) -> StoreResult<ETag> {
            self.put(key, bytes).await?;
            Ok(ETag::new("x"))
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.docs.lock().unwrap().remove(key);
            Ok(())
        }

        async fn exists(&self, key: &str) -> StoreResult<bool> {
            Ok(self.docs.lock().unwrap().contains_key(key))
        }

        async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
            let mut keys: Vec<String> =
                self.docs.lock().unwrap().keys().filter(|k| k.starts_with(prefix)).cloned().collect();
            keys.sort();
            Ok(keys)
        }

        async fn list_paginated(
            &self,
            prefix: &str,
            consumer: &(dyn Fn(ListChunk) -> StoreResult<()> + Send + Sync),
        ) -> StoreResult<()> {
            consumer(self.list(prefix).await?)
        }

        async fn append(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
            self.docs.lock().unwrap().entry(key.to_string()).or_default().extend_from_slice(&bytes);
            Ok(())
        }

        async fn get_stream(&self, _key: &str) -> StoreResult<AsyncReadBox> {
            unimplemented!("not exercised by index manager tests")
        }

        async fn put_stream(&self, _key: &str, _reader: AsyncReadBox, _length: u64) -> StoreResult<()> {
            unimplemented!("not exercised by index manager tests")
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MapIndexSink {
        sets: Arc<Mutex<StdHashMap<(String, String, String), std::collections::HashSet<String>>>>,
    }

    impl IndexSink for MapIndexSink {
        async fn add_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
            self.sets
                .lock()
                .unwrap()
                .entry((entity_type.to_string(), index_name.to_string(), value.to_string()))
                .or_default()
                .insert(key.to_string());
            Ok(())
        }

        async fn remove_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
            if let Some(set) = self
                .sets
                .lock()
                .unwrap()
                .get_mut(&(entity_type.to_string(), index_name.to_string(), value.to_string()))
            {
                set.remove(key);
            }
            Ok(())
        }

        async fn query(
            &self,
            entity_type: &str,
            index_name: &str,
            value: &str,
        ) -> StoreResult<std::collections::HashSet<String>> {
            Ok(self
                .sets
                .lock()
                .unwrap()
                .get(&(entity_type.to_string(), index_name.to_string(), value.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        async fn count(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<u64> {
            Ok(self.query(entity_type, index_name, value).await?.len() as u64)
        }
    }

    fn manager() -> IndexManager<MapBackend, MapIndexSink, NoopMetrics> {
        let spec = IndexSpec::new("users", "by_country", FieldExtractor { index_name: "by_country", field: "country" });
        IndexManager::new(
            MapBackend::default(),
            MapIndexSink::default(),
            vec![spec],
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            NoopMetrics,
        )
    }

    #[tokio::test]
    async fn create_adds_the_key_to_the_matching_index() {
        let manager = manager();
        manager.create("users/1", &serde_json::json!({"country": "fr"})).await.unwrap();

        let members = manager.sink().query("users", "by_country", "fr").await.unwrap();
        assert!(members.contains("users/1"));
    }

    #[tokio::test]
    async fn update_diffs_old_and_new_entries() {
        let manager = manager();
        manager.create("users/1", &serde_json::json!({"country": "fr"})).await.unwrap();
        manager.update("users/1", &serde_json::json!({"country": "de"})).await.unwrap();

        assert!(!manager.sink().query("users", "by_country", "fr").await.unwrap().contains("users/1"));
        assert!(manager.sink().query("users", "by_country", "de").await.unwrap().contains("users/1"));
    }

    #[tokio::test]
    async fn update_with_unchanged_value_causes_no_churn() {
        let manager = manager();
        manager.create("users/1", &serde_json::json!({"country": "fr"})).await.unwrap();
        manager.update("users/1", &serde_json::json!({"country": "fr", "extra": 1})).await.unwrap();

        let members = manager.sink().query("users", "by_country", "fr").await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members.contains("users/1"));
    }

    #[tokio::test]
    async fn delete_removes_index_membership_before_the_document() {
        let manager = manager();
        manager.create("users/1", &serde_json::json!({"country": "fr"})).await.unwrap();
        manager.delete("users/1").await.unwrap();

        assert!(!manager.sink().query("users", "by_country", "fr").await.unwrap().contains("users/1"));
        assert!(manager.backend().get("users/1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn create_rejects_empty_key() {
        let manager = manager();
        let err = manager.create("", &serde_json::json!({"country": "fr"})).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn non_participating_document_is_not_indexed() {
        let manager = manager();
        manager.create("users/2", &serde_json::json!({"no_country": true})).await.unwrap();
        assert!(manager.sink().query("users", "by_country", "fr").await.unwrap().is_empty());
    }
}
