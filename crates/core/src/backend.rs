//! The backend abstraction.
//!
//! Any storage driver — local filesystem, S3-compatible object store, or a
//! test fake — implements [`Backend`]. Callers never see driver-specific
//! types; they see bytes, entity tags, and [`StoreError`].

use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::StoreResult;

/// An opaque, backend-assigned tag that changes on every successful write.
/// The basis of optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(pub String);

impl ETag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sentinel passed to `PutIfMatch` meaning "the key must not currently exist."
pub fn must_not_exist() -> ETag {
    ETag(String::new())
}

pub type Bytes = Vec<u8>;

/// One bounded-size page handed to a `ListPaginated` consumer.
pub type ListChunk = Vec<String>;

pub type AsyncReadBox = Pin<Box<dyn AsyncRead + Send + Unpin>>;
pub type AsyncWriteBox = Pin<Box<dyn AsyncWrite + Send + Unpin>>;

/// Capability set exposed by any backend.
///
/// Plain `Put`/`Get`/`Delete` pass through drivers unchanged; `PutIfMatch`
/// and `Append` are the operations that require per-key serialization
/// (striped locks for the filesystem driver, a distributed lock for the
/// object-store driver).
///
/// Handles are value-like and shared by multiple holders, so every backend
/// is `Clone + Send + Sync`; callers pass it around by value rather than
/// behind `dyn`.
#[trait_variant::make(Send)]
pub trait Backend: Clone + Send + Sync + 'static {
    /// Store unconditionally.
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()>;

    /// Return bytes, or `NotFound`.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Return bytes and the current entity tag, or `NotFound`.
    async fn get_with_etag(&self, key: &str) -> StoreResult<(Bytes, ETag)>;

    /// Succeed only when the current tag equals `expected`. An empty
    /// `expected` tag (see [`must_not_exist`]) means "must not exist."
    /// Returns the new tag on success, `Conflict` on mismatch.
    async fn put_if_match(&self, key: &str, bytes: Bytes, expected: &ETag) -> StoreResult<ETag>;

    /// Idempotent: deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Lexicographic enumeration of keys under `prefix`.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Paginated enumeration; `consumer` is invoked with bounded-size
    /// chunks. Enumeration aborts the moment the consumer returns an error.
    async fn list_paginated(
        &self,
        prefix: &str,
        consumer: &(dyn Fn(ListChunk) -> StoreResult<()> + Send + Sync),
    ) -> StoreResult<()>;

    /// Read-modify-write concatenation. Callers must assume this is not
    /// atomic unless the backend is wrapped with distributed locking.
    async fn append(&self, key: &str, bytes: Bytes) -> StoreResult<()>;

    /// Streaming read, for payloads too large to hold in memory.
    async fn get_stream(&self, key: &str) -> StoreResult<AsyncReadBox>;

    /// Streaming write of `length` bytes from `reader`.
    async fn put_stream(&self, key: &str, reader: AsyncReadBox, length: u64) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}
