//! `smarterbase`: a document-storage layer that turns an object store (S3-
//! compatible blob storage or a local filesystem) plus a Redis-compatible
//! coordination service into a database-like platform offering JSON
//! documents, optimistic concurrency, secondary indexes, and atomic
//! read-modify-write sequences.
//!
//! This crate is the facade: it wires the per-concern crates
//! ([`smarterbase_core`], [`smarterbase_backend_fs`], [`smarterbase_backend_s3`],
//! [`smarterbase_redis`], [`smarterbase_health`]) into a single [`Store`]
//! handle. Each subsystem is independently usable; most callers only need
//! what's re-exported here.

pub mod logging;
pub mod store;

pub use smarterbase_core as core;
pub use smarterbase_health as health;
pub use smarterbase_redis as redis;

pub use smarterbase_backend_fs::LocalFsBackend;
pub use smarterbase_backend_s3::S3Backend;
pub use smarterbase_core::{
    atomic_update, entity_type_of, must_not_exist, try_lock_with_retry, Backend, CancelToken, CircuitBreaker,
    CircuitBreakerConfig, CircuitState, DistributedLock, DotPathExtractor, ErrorKind, Extractor, FieldExtractor,
    IndexEntry, IndexManager, IndexSink, IndexSpec, LockGuard, LockedBackend, MetricsSink, NeverCancel, NoopMetrics,
    Query, StoreError, StoreResult, StripedLocks, TokioCancelToken, ETag,
};
pub use smarterbase_health::{HealthConfig, HealthMonitor, HealthReport, RepairOutcome};
pub use smarterbase_redis::{CounterAuditEntry, CounterFlaw, LockAdmin, LockInfo, RedisClient, RedisConfig};

pub use store::{FsStore, S3Store, Store, StoreSettings};
