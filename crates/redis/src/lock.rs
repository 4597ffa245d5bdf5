//! Distributed lock backed by a coordination-service SET NX EX / Lua
//! compare-and-delete pair, mirroring the watcher-lock pattern used
//! elsewhere in this workspace for leader election.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use redis::Script;
use smarterbase_core::{DistributedLock, LockGuard, StoreError, StoreResult};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLock {
    pool: deadpool_redis::Pool,
    key_prefix: String,
}

impl RedisLock {
    pub fn new(pool: deadpool_redis::Pool, key_prefix: impl Into<String>) -> Self {
        Self { pool, key_prefix: key_prefix.into() }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{key}", self.key_prefix)
    }
}

/// A long, unguessable token whose prefix doubles as the acquisition
/// timestamp, so lock administration can report age without a second key.
fn generate_token() -> String {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);
    format!("{millis}-{}", hex::encode(random))
}

pub(crate) fn token_acquired_at(token: &str) -> Option<SystemTime> {
    let millis: u64 = token.split('-').next()?.parse().ok()?;
    Some(UNIX_EPOCH + Duration::from_millis(millis))
}

impl DistributedLock for RedisLock {
    async fn try_lock(&self, key: &str, ttl: Duration) -> StoreResult<LockGuard<Self>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(key))?;

        let token = generate_token();
        let ttl_millis = (ttl.as_millis() as u64).max(1);

        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(key))?;

        match acquired {
            Some(_) => Ok(LockGuard::new(self.clone(), key.to_string(), token)),
            None => Err(StoreError::conflict("lock already held").with_key(key)),
        }
    }

    async fn release(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(key))?;

        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(self.lock_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(key))?;

        Ok(())
    }
}
