//! Coordination-service-backed [`IndexSink`]: one Redis set per
//! `(entityType, indexName, value)` triple.

use std::collections::HashSet;

use smarterbase_core::{IndexSink, StoreError, StoreResult};

#[derive(Clone)]
pub struct RedisIndexSink {
    pool: deadpool_redis::Pool,
    key_prefix: String,
}

impl RedisIndexSink {
    pub fn new(pool: deadpool_redis::Pool, key_prefix: impl Into<String>) -> Self {
        Self { pool, key_prefix: key_prefix.into() }
    }

    fn set_key(&self, entity_type: &str, index_name: &str, value: &str) -> String {
        format!("{}:idx:{entity_type}:{index_name}:{value}", self.key_prefix)
    }
}

impl IndexSink for RedisIndexSink {
    async fn add_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let _: i64 = redis::cmd("SADD")
            .arg(self.set_key(entity_type, index_name, value))
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(key))?;

        Ok(())
    }

    async fn remove_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let _: i64 = redis::cmd("SREM")
            .arg(self.set_key(entity_type, index_name, value))
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(key))?;

        Ok(())
    }

    async fn query(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<HashSet<String>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.set_key(entity_type, index_name, value))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        Ok(members.into_iter().collect())
    }

    async fn count(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<u64> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let count: u64 = redis::cmd("SCARD")
            .arg(self.set_key(entity_type, index_name, value))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        Ok(count)
    }
}
