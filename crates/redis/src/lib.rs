//! Coordination-service client: distributed locking, the Redis-set-backed
//! secondary index, counters, and lock administration, all sharing one
//! `deadpool_redis::Pool`.

pub mod admin;
pub mod config;
pub mod counter;
pub mod index;
pub mod lock;

pub use admin::{LockAdmin, LockInfo};
pub use config::RedisConfig;
pub use counter::{CounterAuditEntry, CounterFlaw, RedisCounter};
pub use index::RedisIndexSink;
pub use lock::RedisLock;

/// Builds every handle this crate offers from one configuration, sharing
/// a single connection pool the way the rest of this workspace shares a
/// `deadpool_redis::Pool` across its Redis-backed stores.
#[derive(Clone)]
pub struct RedisClient {
    pool: deadpool_redis::Pool,
    key_prefix: String,
}

impl RedisClient {
    pub fn connect(config: &RedisConfig) -> smarterbase_core::StoreResult<Self> {
        Ok(Self { pool: config.create_pool()?, key_prefix: config.key_prefix.clone() })
    }

    pub fn lock(&self) -> RedisLock {
        RedisLock::new(self.pool.clone(), self.key_prefix.clone())
    }

    pub fn index_sink(&self) -> RedisIndexSink {
        RedisIndexSink::new(self.pool.clone(), self.key_prefix.clone())
    }

    pub fn counter(&self) -> RedisCounter {
        RedisCounter::new(self.pool.clone(), self.key_prefix.clone())
    }

    pub fn lock_admin(&self) -> LockAdmin {
        LockAdmin::new(self.pool.clone(), self.key_prefix.clone())
    }

    pub async fn ping(&self) -> smarterbase_core::StoreResult<()> {
        use smarterbase_core::StoreError;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))
    }
}
