//! Distributed locking and the locked-backend wrapper.
//!
//! [`DistributedLock`] is implemented against the coordination service by
//! `smarterbase-redis`. This module is generic over that trait so the
//! locking behavior (retry, jitter, the locked-`Backend` wrapper, the
//! atomic-update helper) is written once and shared by every driver.

use std::time::Duration;

use backoff::backoff::Backoff;

use crate::backend::{Backend, Bytes, ETag, ListChunk};
use crate::cancel::CancelToken;
use crate::error::{StoreError, StoreResult};

/// A held lock. Dropping it without calling [`LockGuard::release`] leaves
/// release to the TTL: the attempt is logged, not propagated, since there
/// is nowhere to propagate it to from `Drop`.
pub struct LockGuard<L: DistributedLock> {
    lock: L,
    key: String,
    token: String,
    released: bool,
}

impl<L: DistributedLock> LockGuard<L> {
    pub fn new(lock: L, key: String, token: String) -> Self {
        Self { lock, key, token, released: false }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Idempotent: releasing twice, or releasing after the TTL already
    /// expired and someone else acquired the key, is a no-op either way
    /// because release only deletes when the stored value still matches
    /// our token.
    pub async fn release(mut self) -> StoreResult<()> {
        self.released = true;
        self.lock.release(&self.key, &self.token).await
    }
}

impl<L: DistributedLock> Drop for LockGuard<L> {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(
                key = %self.key,
                "lock guard dropped without explicit release; TTL will reclaim it"
            );
        }
    }
}

/// Coordination-service-backed mutual exclusion keyed by document key.
/// At most one owner may hold a given key at a time; the
/// owner token is never reused across acquisitions; release is a no-op if
/// the token doesn't match the current holder.
#[trait_variant::make(Send)]
pub trait DistributedLock: Clone + Send + Sync + Sized + 'static {
    /// Attempt an atomic "set if not exists with expiration." Returns
    /// `Conflict` (retryable) if already held.
    async fn try_lock(&self, key: &str, ttl: Duration) -> StoreResult<LockGuard<Self>>;

    /// Release is a no-op if `token` doesn't match the current holder.
    async fn release(&self, key: &str, token: &str) -> StoreResult<()>;
}

/// Exponential backoff with jitter between attempts; aborts on
/// cancellation and surfaces the cancellation cause verbatim.
pub async fn try_lock_with_retry<L, C>(
    lock: &L,
    key: &str,
    ttl: Duration,
    attempts: u32,
    cancel: &C,
) -> StoreResult<LockGuard<L>>
where
    L: DistributedLock,
    C: CancelToken,
{
    let mut backoff = backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(20))
        .with_max_interval(Duration::from_secs(2))
        .with_max_elapsed_time(None)
        .build();

    let mut last_err = StoreError::conflict("lock not attempted");

    for attempt in 0..attempts.max(1) {
        if cancel.is_cancelled() {
            return Err(StoreError::canceled("try_lock_with_retry"));
        }

        match lock.try_lock(key, ttl).await {
            Ok(guard) => return Ok(guard),
            Err(err) if err.is_conflict() => {
                last_err = err;
                if attempt + 1 == attempts {
                    break;
                }
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(2));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(StoreError::canceled("try_lock_with_retry"));
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.with_operation("try_lock_with_retry").with_key(key))
}

/// Wraps a [`Backend`] with a [`DistributedLock`] so that `put_if_match`
/// and `append` execute their whole read-modify-write window under a
/// per-key lock. Plain `put`/`get`/`delete` pass through unchanged.
#[derive(Clone)]
pub struct LockedBackend<B, L> {
    inner: B,
    lock: L,
    lock_ttl: Duration,
    lock_attempts: u32,
}

impl<B, L> LockedBackend<B, L>
where
    B: Backend,
    L: DistributedLock,
{
    pub fn new(inner: B, lock: L, lock_ttl: Duration, lock_attempts: u32) -> Self {
        Self { inner, lock, lock_ttl, lock_attempts }
    }

    fn lock_key(key: &str) -> String {
        format!("backend:{key}")
    }
}

impl<B, L> Backend for LockedBackend<B, L>
where
    B: Backend,
    L: DistributedLock,
{
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        self.inner.put(key, bytes).await
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_with_etag(&self, key: &str) -> StoreResult<(Bytes, ETag)> {
        self.inner.get_with_etag(key).await
    }

    async fn put_if_match(&self, key: &str, bytes: Bytes, expected: &ETag) -> StoreResult<ETag> {
        use crate::cancel::NeverCancel;

        let guard = try_lock_with_retry(
            &self.lock,
            &Self::lock_key(key),
            self.lock_ttl,
            self.lock_attempts,
            &NeverCancel,
        )
        .await?;

        let result = self.inner.put_if_match(key, bytes, expected).await;

        if let Err(err) = guard.release().await {
            tracing::warn!(%key, %err, "failed to release document lock");
        }

        result
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn list_paginated(
        &self,
        prefix: &str,
        consumer: &(dyn Fn(ListChunk) -> StoreResult<()> + Send + Sync),
    ) -> StoreResult<()> {
        self.inner.list_paginated(prefix, consumer).await
    }

    async fn append(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        use crate::cancel::NeverCancel;

        let guard = try_lock_with_retry(
            &self.lock,
            &Self::lock_key(key),
            self.lock_ttl,
            self.lock_attempts,
            &NeverCancel,
        )
        .await?;

        let result = self.inner.append(key, bytes).await;

        if let Err(err) = guard.release().await {
            tracing::warn!(%key, %err, "failed to release document lock");
        }

        result
    }

    async fn get_stream(&self, key: &str) -> StoreResult<crate::backend::AsyncReadBox> {
        self.inner.get_stream(key).await
    }

    async fn put_stream(
        &self,
        key: &str,
        reader: crate::backend::AsyncReadBox,
        length: u64,
    ) -> StoreResult<()> {
        self.inner.put_stream(key, reader, length).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

/// Given `(key, ttl)`, acquires the distributed lock, invokes the
/// caller-supplied function, then releases on any exit path. This
/// provides isolation, not atomicity across multiple documents: there is
/// no rollback, and callers must be idempotent across retries because the
/// lock may have expired if `f` ran longer than `ttl`.
pub async fn atomic_update<L, F, Fut, T>(
    lock: &L,
    key: &str,
    ttl: Duration,
    f: F,
) -> StoreResult<T>
where
    L: DistributedLock,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let guard = lock.try_lock(key, ttl).await?;
    let result = f().await;

    if let Err(err) = guard.release().await {
        tracing::warn!(%key, %err, "failed to release atomic-update lock");
    }

    result
}
