//! An in-process [`Backend`] fake: a `HashMap` guarded by a `Mutex`, with
//! a per-key version counter standing in for a driver-assigned entity tag.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use smarterbase_core::{must_not_exist, AsyncReadBox, Backend, Bytes, ETag, ListChunk, StoreError, StoreResult};

#[derive(Clone)]
struct Record {
    bytes: Bytes,
    version: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    records: Arc<Mutex<HashMap<String, Record>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn etag_for(version: u64) -> ETag {
        ETag::new(format!("v{version}"))
    }
}

impl Backend for InMemoryBackend {
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap();
        let version = records.get(key).map(|r| r.version + 1).unwrap_or(1);
        records.insert(key.to_string(), Record { bytes, version });
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.records
            .lock()
            .unwrap()
            .get(key)
            .map(|r| r.bytes.clone())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn get_with_etag(&self, key: &str) -> StoreResult<(Bytes, ETag)> {
        self.records
            .lock()
            .unwrap()
            .get(key)
            .map(|r| (r.bytes.clone(), Self::etag_for(r.version)))
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn put_if_match(&self, key: &str, bytes: Bytes, expected: &ETag) -> StoreResult<ETag> {
        let mut records = self.records.lock().unwrap();
        let must_not_exist = expected == &must_not_exist();

        match records.get(key) {
            Some(record) => {
                if must_not_exist || &Self::etag_for(record.version) != expected {
                    return Err(StoreError::conflict("entity tag mismatch").with_key(key));
                }
            }
            None if !must_not_exist => {
                return Err(StoreError::conflict("entity tag mismatch: document absent").with_key(key));
            }
            None => {}
        }

        let version = records.get(key).map(|r| r.version + 1).unwrap_or(1);
        records.insert(key.to_string(), Record { bytes, version });
        Ok(Self::etag_for(version))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.records.lock().unwrap().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let records = self.records.lock().unwrap();
        let mut keys: Vec<String> = records.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_paginated(
        &self,
        prefix: &str,
        consumer: &(dyn Fn(ListChunk) -> StoreResult<()> + Send + Sync),
    ) -> StoreResult<()> {
        let keys = self.list(prefix).await?;
        for chunk in keys.chunks(1000) {
            consumer(chunk.to_vec())?;
        }
        Ok(())
    }

    async fn append(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(key) {
            Some(record) => {
                record.bytes.extend_from_slice(&bytes);
                record.version += 1;
            }
            None => {
                records.insert(key.to_string(), Record { bytes, version: 1 });
            }
        }
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> StoreResult<AsyncReadBox> {
        let bytes = self.get(key).await?;
        Ok(Box::pin(std::io::Cursor::new(bytes)) as Pin<Box<_>>)
    }

    async fn put_stream(&self, key: &str, mut reader: AsyncReadBox, _length: u64) -> StoreResult<()> {
        use tokio::io::AsyncReadExt;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.map_err(|e| StoreError::internal(e.to_string()))?;
        self.put(key, bytes).await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
