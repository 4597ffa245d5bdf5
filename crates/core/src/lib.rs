//! Shared types and traits used by every `smarterbase` crate.
//!
//! This crate is the consistency and indexing engine described in the
//! top-level spec: the backend abstraction with optimistic concurrency via
//! entity tags, the distributed-lock coordinator, the secondary-index
//! manager, and the circuit breaker that guards calls into a flaky
//! coordination service. Concrete drivers (filesystem, object store,
//! Redis) live in their own crates and implement the traits defined here.

pub mod backend;
pub mod cancel;
pub mod circuit_breaker;
pub mod error;
pub mod index;
pub mod lock;
pub mod metrics;
pub mod query;
pub mod striped;

pub use backend::{must_not_exist, AsyncReadBox, AsyncWriteBox, Backend, Bytes, ETag, ListChunk};
pub use cancel::{CancelToken, NeverCancel, TokioCancelToken};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, SharedCircuitBreaker, Transition};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use index::{
    entity_type_of, DotPathExtractor, Extractor, FieldExtractor, IndexEntry, IndexManager, IndexSink, IndexSpec,
    NonParticipation,
};
pub use lock::{atomic_update, try_lock_with_retry, DistributedLock, LockGuard, LockedBackend};
pub use metrics::{MetricsSink, NoopMetrics};
pub use query::Query;
pub use striped::StripedLocks;
