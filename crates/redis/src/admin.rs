//! Operational visibility into held locks: listing by pattern, post-crash
//! cleanup of stale records, and unconditional force-release.

use std::time::{Duration, SystemTime};

use smarterbase_core::{StoreError, StoreResult};

use crate::lock::token_acquired_at;

#[derive(Debug, Clone)]
pub struct LockInfo {
    pub key: String,
    pub owner: String,
    pub remaining_ttl: Option<Duration>,
    pub acquired_at: Option<SystemTime>,
}

#[derive(Clone)]
pub struct LockAdmin {
    pool: deadpool_redis::Pool,
    key_prefix: String,
}

impl LockAdmin {
    pub fn new(pool: deadpool_redis::Pool, key_prefix: impl Into<String>) -> Self {
        Self { pool, key_prefix: key_prefix.into() }
    }

    fn lock_namespace(&self, pattern: &str) -> String {
        format!("{}:lock:{pattern}", self.key_prefix)
    }

    pub async fn list_locks(&self, pattern: &str) -> StoreResult<Vec<LockInfo>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let scan_pattern = self.lock_namespace(pattern);
        let mut out = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&scan_pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

            for key in keys {
                let owner: Option<String> = redis::cmd("GET")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

                let Some(owner) = owner else { continue };

                let pttl_ms: i64 = redis::cmd("PTTL")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

                let remaining_ttl = if pttl_ms >= 0 { Some(Duration::from_millis(pttl_ms as u64)) } else { None };
                let acquired_at = token_acquired_at(&owner);

                out.push(LockInfo { key, owner, remaining_ttl, acquired_at });
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(out)
    }

    /// Deletes lock records older than `min_age`. Intended for post-crash
    /// cleanup; callers must set `min_age` larger than any legitimate
    /// holding time, or a live lock can be reaped out from under its owner.
    pub async fn cleanup_orphaned_locks(&self, min_age: Duration) -> StoreResult<u64> {
        let locks = self.list_locks("*").await?;
        let now = SystemTime::now();
        let mut removed = 0u64;

        for lock in locks {
            let Some(acquired_at) = lock.acquired_at else { continue };
            let age = now.duration_since(acquired_at).unwrap_or_default();
            if age > min_age {
                self.force_release(&lock.key).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Removes a lock record unconditionally, regardless of current owner.
    /// `key` is the full Redis key as reported by [`LockAdmin::list_locks`].
    pub async fn force_release(&self, key: &str) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(key))?;

        Ok(())
    }
}
