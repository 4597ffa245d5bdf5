//! Wires a [`Backend`], an [`IndexSink`], and a set of [`IndexSpec`]s into
//! one handle that owns both the [`IndexManager`] (document CRUD plus
//! best-effort index maintenance) and the [`HealthMonitor`] (drift
//! detection and repair) sharing a single [`CircuitBreaker`], matching
//! the construction order spec'd for this system: backend → store →
//! index manager (registers specs) → health monitor (reads specs
//! read-only).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use smarterbase_backend_fs::LocalFsBackend;
use smarterbase_backend_s3::S3Backend;
use smarterbase_core::{
    Backend, CancelToken, CircuitBreaker, CircuitBreakerConfig, IndexManager, IndexSink, IndexSpec, LockedBackend,
    MetricsSink, NeverCancel, NoopMetrics, Query, StoreResult,
};
use smarterbase_health::{HealthConfig, HealthMonitor, HealthReport};
use smarterbase_redis::{RedisClient, RedisIndexSink, RedisLock};

/// Knobs shared by every `Store` constructor. The defaults match the
/// opinionated defaults named in the design: a 30s/5-failure circuit
/// breaker and the health monitor's 5-minute/100-sample/5%/auto-repair
/// defaults.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub lock_ttl: Duration,
    pub lock_attempts: u32,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            lock_attempts: 5,
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// A document store over `B` with secondary indexes in `S`, metrics
/// reported through `M`. Construct directly with [`Store::new`] over any
/// `Backend`/`IndexSink` pair, or use [`FsStore::open_local`] /
/// [`S3Store::open_s3`] for the two drivers this workspace ships.
#[derive(Clone)]
pub struct Store<B, S, M = NoopMetrics> {
    index: IndexManager<B, S, M>,
    health: HealthMonitor<B, S, M>,
    breaker: Arc<CircuitBreaker>,
}

impl<B, S, M> Store<B, S, M>
where
    B: Backend,
    S: IndexSink,
    M: MetricsSink,
{
    pub fn new(backend: B, sink: S, specs: Vec<IndexSpec>, metrics: M, settings: StoreSettings) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(settings.circuit_breaker));
        let specs_for_health = Arc::new(specs.clone());

        let index = IndexManager::new(backend.clone(), sink.clone(), specs, breaker.clone(), metrics.clone());
        let health = HealthMonitor::new(backend, sink, specs_for_health, metrics, breaker.clone(), settings.health);

        Self { index, health, breaker }
    }

    pub fn index(&self) -> &IndexManager<B, S, M> {
        &self.index
    }

    pub fn health(&self) -> &HealthMonitor<B, S, M> {
        &self.health
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn create<V: Serialize>(&self, key: &str, value: &V) -> StoreResult<()> {
        self.index.create(key, value).await
    }

    pub async fn update<V: Serialize>(&self, key: &str, value: &V) -> StoreResult<()> {
        self.index.update(key, value).await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.index.delete(key).await
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> StoreResult<V> {
        self.index.get(key).await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.index.exists(key).await
    }

    pub fn query(&self, prefix: impl Into<String>) -> Query {
        Query::new(prefix)
    }

    /// One health-monitor sampling pass, run immediately rather than on
    /// the monitor's own interval.
    pub async fn run_health_once(&self, entity_type: &str, prefix: &str) -> StoreResult<HealthReport> {
        self.health.run_once(entity_type, prefix, &NeverCancel).await
    }

    /// Runs the health-monitor loop for one entity type until `cancel`
    /// fires. Spawn one of these per monitored entity type.
    pub async fn run_health_loop<C, F>(&self, entity_type: &str, prefix: &str, cancel: &C, on_report: F)
    where
        C: CancelToken,
        F: FnMut(HealthReport),
    {
        self.health.run(entity_type, prefix, cancel, on_report).await
    }
}

/// A [`Store`] over the local filesystem driver, distributed-locked
/// through Redis and indexed into Redis sets — the workspace's default
/// pairing for a single-machine or NFS-backed deployment.
pub type FsStore<M = NoopMetrics> = Store<LockedBackend<LocalFsBackend, RedisLock>, RedisIndexSink, M>;

impl<M> FsStore<M>
where
    M: MetricsSink + Default,
{
    pub async fn open_local(
        root: impl Into<PathBuf>,
        redis: &RedisClient,
        specs: Vec<IndexSpec>,
        settings: StoreSettings,
    ) -> StoreResult<Self> {
        let fs = LocalFsBackend::open(root).await?;
        let locked = LockedBackend::new(fs, redis.lock(), settings.lock_ttl, settings.lock_attempts);
        Ok(Store::new(locked, redis.index_sink(), specs, M::default(), settings))
    }
}

/// A [`Store`] over the S3-compatible object-store driver, the pairing
/// for a multi-writer, horizontally scaled deployment. Callers construct
/// the `ObjectStore` themselves (`object_store::aws::AmazonS3Builder`,
/// or any other `object_store` backend) since that's where
/// backend-specific credentials live.
pub type S3Store<M = NoopMetrics> = Store<LockedBackend<S3Backend, RedisLock>, RedisIndexSink, M>;

impl<M> S3Store<M>
where
    M: MetricsSink + Default,
{
    pub async fn open_s3(
        object_store: Arc<dyn object_store::ObjectStore>,
        bucket_prefix: impl Into<String>,
        redis: &RedisClient,
        specs: Vec<IndexSpec>,
        settings: StoreSettings,
    ) -> StoreResult<Self> {
        let s3 = S3Backend::with_prefix(object_store, bucket_prefix);
        let locked = LockedBackend::new(s3, redis.lock(), settings.lock_ttl, settings.lock_attempts);
        Ok(Store::new(locked, redis.index_sink(), specs, M::default(), settings))
    }
}
