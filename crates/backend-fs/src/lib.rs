//! Local filesystem `Backend` driver.
//!
//! Keys map to nested paths under a configured root. Writes stage to a
//! sibling temp file and atomically rename into place so any observer
//! sees either the old or the new file, never a torn write. Entity tags
//! are derived deterministically from the file's modification-time-plus-
//! size, which changes on every successful atomic rename.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use smarterbase_core::{
    must_not_exist, AsyncReadBox, Backend, Bytes, ETag, ListChunk, StoreError, StoreResult, StripedLocks,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const LIST_CHUNK_SIZE: usize = 1000;

#[derive(Clone)]
pub struct LocalFsBackend {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    locks: StripedLocks,
}

impl LocalFsBackend {
    /// Refuses (`InvalidConfig`) when the root is unreadable or
    /// non-writable, creating it if it doesn't exist yet.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();

        if !root.exists() {
            fs::create_dir_all(&root)
                .await
                .map_err(|e| StoreError::invalid_config(format!("cannot create root {}: {e}", root.display())))?;
        }

        let metadata = fs::metadata(&root)
            .await
            .map_err(|e| StoreError::invalid_config(format!("cannot stat root {}: {e}", root.display())))?;
        if !metadata.is_dir() {
            return Err(StoreError::invalid_config(format!("root {} is not a directory", root.display())));
        }

        let probe = root.join(format!(".smarterbase-probe-{}", std::process::id()));
        fs::write(&probe, b"")
            .await
            .map_err(|e| StoreError::invalid_config(format!("root {} is not writable: {e}", root.display())))?;
        let _ = fs::remove_file(&probe).await;

        Ok(Self { inner: Arc::new(Inner { root, locks: StripedLocks::default() }) })
    }

    fn resolve(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::invalid_data("empty key"));
        }
        if key.split('/').any(|segment| segment == "..") {
            return Err(StoreError::invalid_data("key must not contain \"..\" segments").with_key(key));
        }
        Ok(self.inner.root.join(key))
    }

    async fn etag_of(&self, path: &Path) -> StoreResult<ETag> {
        let metadata = fs::metadata(path).await.map_err(|e| map_io_err(e, path))?;
        let modified = metadata.modified().map_err(|e| StoreError::internal(e.to_string()))?;
        let duration = modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Ok(ETag::new(format!("{}-{}-{}", duration.as_secs(), duration.subsec_nanos(), metadata.len())))
    }

    async fn atomic_write(&self, path: &Path, bytes: Bytes) -> StoreResult<ETag> {
        let parent = path.parent().ok_or_else(|| StoreError::invalid_data("key resolves to a root path"))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::internal(format!("cannot create {}: {e}", parent.display())))?;

        let tmp_path = parent.join(format!(".{}.tmp.{}", file_name(path), uniq_suffix()));

        let mut tmp = fs::File::create(&tmp_path)
            .await
            .map_err(|e| StoreError::internal(format!("cannot create temp file: {e}")))?;
        tmp.write_all(&bytes)
            .await
            .map_err(|e| StoreError::internal(format!("cannot write temp file: {e}")))?;
        tmp.sync_all().await.map_err(|e| StoreError::internal(e.to_string()))?;
        drop(tmp);

        fs::rename(&tmp_path, path).await.map_err(|e| {
            StoreError::internal(format!("cannot rename into place: {e}"))
        })?;

        self.etag_of(path).await
    }

    async fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> StoreResult<()> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::internal(e.to_string())),
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::internal(e.to_string()))? {
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()).map(|n| n.starts_with('.')).unwrap_or(false) {
                continue;
            }

            let file_type = entry.file_type().await.map_err(|e| StoreError::internal(e.to_string()))?;
            if file_type.is_dir() {
                Box::pin(Self::walk(root, &path, out)).await?;
            } else {
                if let Ok(relative) = path.strip_prefix(root) {
                    if let Some(key) = relative.to_str() {
                        out.push(key.replace(std::path::MAIN_SEPARATOR, "/"));
                    }
                }
            }
        }

        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string()
}

fn uniq_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("{}-{:x}", std::process::id(), nanos)
}

fn map_io_err(err: std::io::Error, path: &Path) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::not_found(path.display().to_string())
    } else {
        StoreError::internal(err.to_string())
    }
}

impl Backend for LocalFsBackend {
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let path = self.resolve(key)?;
        self.atomic_write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.resolve(key)?;
        fs::read(&path).await.map_err(|e| map_io_err(e, &path).with_key(key))
    }

    async fn get_with_etag(&self, key: &str) -> StoreResult<(Bytes, ETag)> {
        let path = self.resolve(key)?;
        let bytes = fs::read(&path).await.map_err(|e| map_io_err(e, &path).with_key(key))?;
        let etag = self.etag_of(&path).await?;
        Ok((bytes, etag))
    }

    async fn put_if_match(&self, key: &str, bytes: Bytes, expected: &ETag) -> StoreResult<ETag> {
        let path = self.resolve(key)?;
        let _guard = self.inner.locks.lock(key).await;

        let current = self.etag_of(&path).await;
        let must_not_exist = expected == &must_not_exist();

        match current {
            Ok(current_tag) => {
                if must_not_exist {
                    return Err(StoreError::conflict("document already exists").with_key(key));
                }
                if &current_tag != expected {
                    return Err(StoreError::conflict("entity tag mismatch").with_key(key));
                }
            }
            Err(ref e) if e.is_not_found() => {
                if !must_not_exist {
                    return Err(StoreError::conflict("entity tag mismatch: document absent").with_key(key));
                }
            }
            Err(e) => return Err(e),
        }

        self.atomic_write(&path, bytes).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::internal(e.to_string()).with_key(key)),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.resolve(key)?;
        Ok(fs::metadata(&path).await.is_ok())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let root = &self.inner.root;
        let dir = if prefix.is_empty() { root.clone() } else { root.join(prefix) };
        let mut out = Vec::new();
        Self::walk(root, &dir, &mut out).await?;
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

    async fn append(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let path = self.resolve(key)?;
        let _guard = self.inner.locks.lock(key).await;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| StoreError::internal(e.to_string()))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::internal(e.to_string()).with_key(key))?;
        file.write_all(&bytes).await.map_err(|e| StoreError::internal(e.to_string()).with_key(key))?;
        file.sync_all().await.map_err(|e| StoreError::internal(e.to_string()))?;
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> StoreResult<AsyncReadBox> {
        let path = self.resolve(key)?;
        let file = fs::File::open(&path).await.map_err(|e| map_io_err(e, &path).with_key(key))?;
        Ok(Box::pin(file) as Pin<Box<_>>)
    }

    async fn put_stream(&self, key: &str, mut reader: AsyncReadBox, _length: u64) -> StoreResult<()> {
        use tokio::io::AsyncReadExt;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.map_err(|e| StoreError::internal(e.to_string()))?;
        self.put(key, bytes).await
    }

    async fn ping(&self) -> StoreResult<()> {
        fs::metadata(&self.inner.root)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (LocalFsBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::open(dir.path()).await.unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let (backend, _dir) = backend().await;
        backend.put("users/42", b"hello".to_vec()).await.unwrap();
        assert_eq!(backend.get("users/42").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (backend, _dir) = backend().await;
        backend.put("a", b"x".to_vec()).await.unwrap();
        backend.delete("a").await.unwrap();
        assert!(backend.get("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (backend, _dir) = backend().await;
        backend.delete("missing").await.unwrap();
        backend.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn put_if_match_detects_conflict() {
        let (backend, _dir) = backend().await;
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
    async fn list_is_lexicographic() {
        let (backend, _dir) = backend().await;
        backend.put("b", vec![]).await.unwrap();
        backend.put("a", vec![]).await.unwrap();
        backend.put("c/d", vec![]).await.unwrap();
        assert_eq!(backend.list("").await.unwrap(), vec!["a", "b", "c/d"]);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let (backend, _dir) = backend().await;
        let err = backend.get("../escape").await.unwrap_err();
        assert_eq!(err.kind(), smarterbase_core::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn append_concatenates_under_lock() {
        let (backend, _dir) = backend().await;
        backend.put("log", b"a".to_vec()).await.unwrap();
        backend.append("log", b"b".to_vec()).await.unwrap();
        backend.append("log", b"c".to_vec()).await.unwrap();
        assert_eq!(backend.get("log").await.unwrap(), b"abc");
    }
}
