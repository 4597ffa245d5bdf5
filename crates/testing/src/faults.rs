//! A [`Backend`] wrapper that injects failures on command, for exercising
//! the graceful-degradation and circuit-breaker paths without a real
//! flaky dependency.

use std::collections::HashSet;

use smarterbase_core::{AsyncReadBox, Backend, Bytes, ETag, IndexSink, ListChunk, StoreError, StoreResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InjectedFault {
    #[default]
    None,
    /// Every read-path call (`get`, `get_with_etag`, `list`, `exists`, `get_stream`, `ping`) fails.
    Reads,
    /// Every write-path call (`put`, `put_if_match`, `delete`, `append`, `put_stream`) fails.
    Writes,
    /// Everything fails.
    All,
}

#[derive(Clone)]
pub struct FaultyBackend<B> {
    inner: B,
    fault: InjectedFault,
}

impl<B: Backend> FaultyBackend<B> {
    pub fn new(inner: B, fault: InjectedFault) -> Self {
        Self { inner, fault }
    }

    pub fn set_fault(&mut self, fault: InjectedFault) {
        self.fault = fault;
    }

    fn should_fault_reads(&self) -> bool {
        matches!(self.fault, InjectedFault::Reads | InjectedFault::All)
    }

    fn should_fault_writes(&self) -> bool {
        matches!(self.fault, InjectedFault::Writes | InjectedFault::All)
    }

    fn fault_err(&self) -> StoreError {
        StoreError::backend_unavailable("fault injection")
    }
}

impl<B: Backend> Backend for FaultyBackend<B> {
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        if self.should_fault_writes() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.put(key, bytes).await
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        if self.should_fault_reads() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.get(key).await
    }

    async fn get_with_etag(&self, key: &str) -> StoreResult<(Bytes, ETag)> {
        if self.should_fault_reads() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.get_with_etag(key).await
    }

    async fn put_if_match(&self, key: &str, bytes: Bytes, expected: &ETag) -> StoreResult<ETag> {
        if self.should_fault_writes() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.put_if_match(key, bytes, expected).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if self.should_fault_writes() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        if self.should_fault_reads() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.exists(key).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        if self.should_fault_reads() {
            return Err(self.fault_err());
        }
        self.inner.list(prefix).await
    }

    async fn list_paginated(
        &self,
        prefix: &str,
        consumer: &(dyn Fn(ListChunk) -> StoreResult<()> + Send + Sync),
    ) -> StoreResult<()> {
        if self.should_fault_reads() {
            return Err(self.fault_err());
        }
        self.inner.list_paginated(prefix, consumer).await
    }

    async fn append(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        if self.should_fault_writes() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.append(key, bytes).await
    }

    async fn get_stream(&self, key: &str) -> StoreResult<AsyncReadBox> {
        if self.should_fault_reads() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.get_stream(key).await
    }

    async fn put_stream(&self, key: &str, reader: AsyncReadBox, length: u64) -> StoreResult<()> {
        if self.should_fault_writes() {
            return Err(self.fault_err().with_key(key));
        }
        self.inner.put_stream(key, reader, length).await
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.should_fault_reads() {
            return Err(self.fault_err());
        }
        self.inner.ping().await
    }
}

/// An [`IndexSink`] wrapper that fails every call when faulted, for
/// exercising index maintenance's best-effort degradation when the
/// coordination service is unreachable.
#[derive(Clone)]
pub struct FaultyIndexSink<S> {
    inner: S,
    fault: InjectedFault,
}

impl<S: IndexSink> FaultyIndexSink<S> {
    pub fn new(inner: S, fault: InjectedFault) -> Self {
        Self { inner, fault }
    }

    pub fn set_fault(&mut self, fault: InjectedFault) {
        self.fault = fault;
    }

    fn faulted(&self) -> bool {
        self.fault != InjectedFault::None
    }

    fn fault_err(&self) -> StoreError {
        StoreError::backend_unavailable("fault injection")
    }
}

impl<S: IndexSink> IndexSink for FaultyIndexSink<S> {
    async fn add_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
        if self.faulted() {
            return Err(self.fault_err());
        }
        self.inner.add_member(entity_type, index_name, value, key).await
    }

    async fn remove_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
        if self.faulted() {
            return Err(self.fault_err());
        }
        self.inner.remove_member(entity_type, index_name, value, key).await
    }

    async fn query(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<HashSet<String>> {
        if self.faulted() {
            return Err(self.fault_err());
        }
        self.inner.query(entity_type, index_name, value).await
    }

    async fn count(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<u64> {
        if self.faulted() {
            return Err(self.fault_err());
        }
        self.inner.count(entity_type, index_name, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    #[tokio::test]
    async fn writes_fault_leaves_reads_working() {
        let inner = InMemoryBackend::new();
        inner.put("a", b"1".to_vec()).await.unwrap();

        let faulty = FaultyBackend::new(inner, InjectedFault::Writes);
        assert!(faulty.put("b", b"2".to_vec()).await.is_err());
        assert_eq!(faulty.get("a").await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn faulty_index_sink_fails_every_call_when_faulted() {
        let faulty = FaultyIndexSink::new(crate::InMemoryIndexSink::new(), InjectedFault::All);
        assert!(faulty.add_member("users", "by_country", "fr", "users/1").await.is_err());
    }
}
