//! An in-process [`DistributedLock`] fake: a `HashMap` from key to
//! `(token, expiry)` guarded by a `Mutex`, for exercising the locked-
//! backend wrapper and the atomic-update helper without a live Redis.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::RngCore;
use smarterbase_core::{DistributedLock, LockGuard, StoreError, StoreResult};

struct Held {
    token: String,
    expires_at: Instant,
}

#[derive(Clone, Default)]
pub struct InMemoryLock {
    held: Arc<Mutex<HashMap<String, Held>>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_token() -> String {
        let mut buf = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

impl DistributedLock for InMemoryLock {
    async fn try_lock(&self, key: &str, ttl: Duration) -> StoreResult<LockGuard<Self>> {
        let mut held = self.held.lock().unwrap();
        let now = Instant::now();

        if let Some(existing) = held.get(key) {
            if existing.expires_at > now {
                return Err(StoreError::conflict("lock already held").with_key(key));
            }
        }

        let token = Self::generate_token();
        held.insert(key.to_string(), Held { token: token.clone(), expires_at: now + ttl });
        Ok(LockGuard::new(self.clone(), key.to_string(), token))
    }

    async fn release(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut held = self.held.lock().unwrap();
        if let Some(existing) = held.get(key) {
            if existing.token == token {
                held.remove(key);
            }
        }
        Ok(())
    }
}
