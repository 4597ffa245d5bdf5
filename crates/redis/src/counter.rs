//! Monotonic counters against a coordination-service key, plus an audit
//! helper for post-hoc sanity checks on a family of counters.

use smarterbase_core::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterFlaw {
    NonInteger,
    Negative,
    AboveThreshold,
}

#[derive(Debug, Clone)]
pub struct CounterAuditEntry {
    pub key: String,
    pub raw_value: String,
    pub flaw: CounterFlaw,
}

#[derive(Clone)]
pub struct RedisCounter {
    pool: deadpool_redis::Pool,
    key_prefix: String,
}

impl RedisCounter {
    pub fn new(pool: deadpool_redis::Pool, key_prefix: impl Into<String>) -> Self {
        Self { pool, key_prefix: key_prefix.into() }
    }

    fn counter_key(&self, name: &str) -> String {
        format!("{}:counter:{name}", self.key_prefix)
    }

    pub async fn increment(&self, name: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        redis::cmd("INCRBY")
            .arg(self.counter_key(name))
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(name))
    }

    pub async fn get(&self, name: &str) -> StoreResult<i64> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let value: Option<i64> = redis::cmd("GET")
            .arg(self.counter_key(name))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(name))?;

        Ok(value.unwrap_or(0))
    }

    /// Recovery-only: overwrites the counter, losing monotonicity.
    pub async fn set(&self, name: &str, value: i64) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let _: () = redis::cmd("SET")
            .arg(self.counter_key(name))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(name))?;

        Ok(())
    }

    /// Recovery-only: equivalent to `set(name, 0)`.
    pub async fn reset(&self, name: &str) -> StoreResult<()> {
        self.set(name, 0).await
    }

    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let _: i64 = redis::cmd("DEL")
            .arg(self.counter_key(name))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()).with_key(name))?;

        Ok(())
    }

    /// Scans counters matching `pattern` (a Redis glob, relative to this
    /// prefix's `counter:` namespace) and flags non-integer, negative, and
    /// implausibly large values.
    pub async fn audit(&self, pattern: &str, large_threshold: i64) -> StoreResult<Vec<CounterAuditEntry>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

        let scan_pattern = format!("{}:counter:{pattern}", self.key_prefix);
        let mut flagged = Vec::new();
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
                let raw: Option<String> = redis::cmd("GET")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StoreError::backend_unavailable(e.to_string()))?;

                let Some(raw_value) = raw else { continue };

                let flaw = match raw_value.parse::<i64>() {
                    Err(_) => Some(CounterFlaw::NonInteger),
                    Ok(v) if v < 0 => Some(CounterFlaw::Negative),
                    Ok(v) if v > large_threshold => Some(CounterFlaw::AboveThreshold),
                    Ok(_) => None,
                };

                if let Some(flaw) = flaw {
                    flagged.push(CounterAuditEntry { key, raw_value, flaw });
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(flagged)
    }
}
