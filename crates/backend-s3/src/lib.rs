//! S3-compatible object-store `Backend` driver.
//!
//! Wraps an `Arc<dyn object_store::ObjectStore>` rather than constructing
//! one itself: building the store (credentials, region, custom endpoint,
//! path-style addressing, ...) is backend-specific authentication
//! plumbing, which is out of scope here — callers hand us a store built
//! with `object_store::aws::AmazonS3Builder` (or any other
//! `object_store` backend) and we only handle the PutObject/HeadObject/
//! ListObjectsV2 semantics the document layer needs.
//!
//! The native service offers only a head-then-put window, which is racy
//! across processes. `PutIfMatch` uses `object_store`'s conditional-put
//! modes (`Create` / `Update` keyed on the observed e-tag) to narrow that
//! race to whatever the backend itself guarantees; callers that need
//! cross-writer strong consistency still wrap this driver with
//! [`smarterbase_core::LockedBackend`] as documented in the lock module.
//! `Append` always needs that wrapper: this driver's `append` is a plain
//! read-modify-write and is not atomic on its own.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes as OsBytes;
use futures_util::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{Error as OsError, ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use smarterbase_core::{
    must_not_exist, AsyncReadBox, Backend, Bytes, ETag, ListChunk, StoreError, StoreResult,
};

const LIST_CHUNK_SIZE: usize = 1000;
/// Size of each part streamed to a multipart upload via `put_stream`.
const MULTIPART_PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct S3Backend {
    store: Arc<dyn ObjectStore>,
    /// Logical prefix every key is nested under, so one bucket can host
    /// several document stores without key collisions.
    root_prefix: String,
}

impl S3Backend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, root_prefix: String::new() }
    }

    pub fn with_prefix(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self { store, root_prefix: prefix.into() }
    }

    fn object_path(&self, key: &str) -> StoreResult<ObjectPath> {
        if key.is_empty() {
            return Err(StoreError::invalid_data("empty key"));
        }
        let full = if self.root_prefix.is_empty() { key.to_string() } else { format!("{}/{key}", self.root_prefix) };
        Ok(ObjectPath::from(full))
    }

    fn strip_prefix(&self, path: &ObjectPath) -> String {
        let raw = path.as_ref();
        if self.root_prefix.is_empty() {
            raw.to_string()
        } else {
            raw.strip_prefix(&self.root_prefix)
                .map(|s| s.trim_start_matches('/').to_string())
                .unwrap_or_else(|| raw.to_string())
        }
    }
}

fn map_os_err(err: OsError, key: &str) -> StoreError {
    match err {
        OsError::NotFound { .. } => StoreError::not_found(key),
        OsError::AlreadyExists { .. } => StoreError::conflict("object already exists").with_key(key),
        OsError::Precondition { .. } | OsError::NotModified { .. } => {
            StoreError::conflict("entity tag mismatch").with_key(key)
        }
        other => StoreError::backend_unavailable(other.to_string()).with_key(key),
    }
}

fn etag_of(meta_etag: Option<String>, version: Option<String>) -> ETag {
    match meta_etag {
        Some(tag) => ETag::new(tag),
        None => ETag::new(version.unwrap_or_default()),
    }
}

impl Backend for S3Backend {
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let path = self.object_path(key)?;
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| map_os_err(e, key))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.object_path(key)?;
        let result = self.store.get(&path).await.map_err(|e| map_os_err(e, key))?;
        let bytes = result.bytes().await.map_err(|e| map_os_err(e, key))?;
        Ok(bytes.to_vec())
    }

    async fn get_with_etag(&self, key: &str) -> StoreResult<(Bytes, ETag)> {
        let path = self.object_path(key)?;
        let result = self.store.get(&path).await.map_err(|e| map_os_err(e, key))?;
        let meta = result.meta.clone();
        let bytes = result.bytes().await.map_err(|e| map_os_err(e, key))?;
        Ok((bytes.to_vec(), etag_of(meta.e_tag, meta.version)))
    }

    async fn put_if_match(&self, key: &str, bytes: Bytes, expected: &ETag) -> StoreResult<ETag> {
        let path = self.object_path(key)?;
        let mode = if expected == &must_not_exist() {
            PutMode::Create
        } else {
            PutMode::Update(UpdateVersion {
                e_tag: Some(expected.as_str().to_string()),
                version: None,
            })
        };

        let result = self
            .store
            .put_opts(&path, PutPayload::from(bytes), PutOptions { mode, ..Default::default() })
            .await
            .map_err(|e| map_os_err(e, key))?;

        Ok(etag_of(result.e_tag, result.version))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(OsError::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_os_err(e, key)),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.object_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(OsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_os_err(e, key)),
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let full_prefix = self.object_path(prefix).unwrap_or_else(|_| {
            ObjectPath::from(self.root_prefix.clone())
        });
        let prefix_opt = if prefix.is_empty() && self.root_prefix.is_empty() { None } else { Some(&full_prefix) };

        let mut stream = self.store.list(prefix_opt);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            let meta = item.map_err(|e| map_os_err(e, prefix))?;
            out.push(self.strip_prefix(&meta.location));
        }
        out.sort();
        Ok(out)
    }

    async fn list_paginated(
        &self,
        prefix: &str,
        consumer: &(dyn Fn(ListChunk) -> StoreResult<()> + Send + Sync),
    ) -> StoreResult<()> {
        let keys = self.list(prefix).await?;
        for chunk in keys.chunks(LIST_CHUNK_SIZE) {
            consumer(chunk.to_vec())?;
        }
        Ok(())
    }

    /// Not atomic on its own: reads the current bytes, concatenates, and
    /// writes unconditionally. Safe across concurrent writers only when
    /// this driver is wrapped by [`smarterbase_core::LockedBackend`].
    async fn append(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let mut current = match self.get(key).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };
        current.extend_from_slice(&bytes);
        self.put(key, current).await
    }

    async fn get_stream(&self, key: &str) -> StoreResult<AsyncReadBox> {
        let path = self.object_path(key)?;
        let result = self.store.get(&path).await.map_err(|e| map_os_err(e, key))?;
        let key_owned = key.to_string();
        let mapped = result.into_stream().map(move |item| {
            item.map(OsBytes::from).map_err(|e| std::io::Error::other(map_os_err(e, &key_owned)))
        });
        let reader = tokio_util::io::StreamReader::new(mapped);
        Ok(Box::pin(reader) as Pin<Box<_>>)
    }

    /// Streams `reader` to a multipart upload in `MULTIPART_PART_SIZE`
    /// chunks rather than buffering the whole payload, for documents too
    /// large to hold in memory.
    async fn put_stream(&self, key: &str, mut reader: AsyncReadBox, _length: u64) -> StoreResult<()> {
        use tokio::io::AsyncReadExt;

        let path = self.object_path(key)?;
        let mut upload = self.store.put_multipart(&path).await.map_err(|e| map_os_err(e, key))?;

        let mut buf = vec![0u8; MULTIPART_PART_SIZE];
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| StoreError::internal(e.to_string()).with_key(key))?;
            if n == 0 {
                break;
            }
            if let Err(e) = upload.put_part(PutPayload::from(buf[..n].to_vec())).await {
                let _ = upload.abort().await;
                return Err(map_os_err(e, key));
            }
        }

        upload.complete().await.map_err(|e| map_os_err(e, key))?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut stream = self.store.list(None);
        match stream.next().await {
            Some(Ok(_)) | None => Ok(()),
            Some(Err(e)) => Err(StoreError::backend_unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn backend() -> S3Backend {
        S3Backend::new(Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let backend = backend();
        backend.put("users/42", b"hello".to_vec()).await.unwrap();
        assert_eq!(backend.get("users/42").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let backend = backend();
        backend.put("a", b"x".to_vec()).await.unwrap();
        backend.delete("a").await.unwrap();
        assert!(backend.get("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = backend();
        backend.delete("missing").await.unwrap();
        backend.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn put_if_match_create_mode_rejects_existing() {
        let backend = backend();
        let tag = backend.put_if_match("doc", b"v1".to_vec(), &must_not_exist()).await.unwrap();

        let err = backend
            .put_if_match("doc", b"v2".to_vec(), &must_not_exist())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let new_tag = backend.put_if_match("doc", b"v2".to_vec(), &tag).await.unwrap();
        assert_ne!(tag, new_tag);

        let err = backend.put_if_match("doc", b"v3".to_vec(), &tag).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn list_is_lexicographic_and_prefix_scoped() {
        let backend = backend();
        backend.put("b", vec![]).await.unwrap();
        backend.put("a", vec![]).await.unwrap();
        backend.put("c/d", vec![]).await.unwrap();
        assert_eq!(backend.list("").await.unwrap(), vec!["a", "b", "c/d"]);
        assert_eq!(backend.list("c").await.unwrap(), vec!["c/d"]);
    }

    #[tokio::test]
    async fn append_concatenates_non_atomically() {
        let backend = backend();
        backend.put("log", b"a".to_vec()).await.unwrap();
        backend.append("log", b"b".to_vec()).await.unwrap();
        backend.append("log", b"c".to_vec()).await.unwrap();
        assert_eq!(backend.get("log").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn prefix_namespaces_keys_across_stores_sharing_a_bucket() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let a = S3Backend::with_prefix(store.clone(), "tenant-a");
        let b = S3Backend::with_prefix(store, "tenant-b");

        a.put("doc", b"a".to_vec()).await.unwrap();
        b.put("doc", b"b".to_vec()).await.unwrap();

        assert_eq!(a.get("doc").await.unwrap(), b"a");
        assert_eq!(b.get("doc").await.unwrap(), b"b");
    }
}
