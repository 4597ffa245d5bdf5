//! Test doubles shared across this workspace's integration tests: an
//! in-memory backend and index sink, a recording metrics sink, and a
//! fault-injecting backend wrapper.

pub mod faults;
pub mod in_memory_backend;
pub mod in_memory_index;
pub mod in_memory_lock;
pub mod metrics;

pub use faults::{FaultyBackend, FaultyIndexSink, InjectedFault};
pub use in_memory_backend::InMemoryBackend;
pub use in_memory_index::InMemoryIndexSink;
pub use in_memory_lock::InMemoryLock;
pub use metrics::RecordingMetrics;
