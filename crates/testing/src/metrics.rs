//! An in-memory [`MetricsSink`] that records every call, for test
//! assertions instead of actually exporting anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use smarterbase_core::MetricsSink;

#[derive(Clone, Default)]
pub struct RecordingMetrics {
    inner: Arc<Mutex<Recorded>>,
}

#[derive(Default)]
struct Recorded {
    errors: HashMap<String, u64>,
    drift: HashMap<String, f64>,
    missing: HashMap<String, u64>,
    extras: HashMap<String, u64>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_count(&self, operation: &str) -> u64 {
        self.inner.lock().unwrap().errors.get(operation).copied().unwrap_or(0)
    }

    pub fn last_drift(&self, entity_type: &str) -> Option<f64> {
        self.inner.lock().unwrap().drift.get(entity_type).copied()
    }

    pub fn missing_count(&self, entity_type: &str) -> u64 {
        self.inner.lock().unwrap().missing.get(entity_type).copied().unwrap_or(0)
    }

    pub fn extras_count(&self, entity_type: &str) -> u64 {
        self.inner.lock().unwrap().extras.get(entity_type).copied().unwrap_or(0)
    }
}

impl MetricsSink for RecordingMetrics {
    fn incr_error(&self, operation: &str) {
        *self.inner.lock().unwrap().errors.entry(operation.to_string()).or_insert(0) += 1;
    }

    fn observe_drift(&self, entity_type: &str, drift_percent: f64) {
        self.inner.lock().unwrap().drift.insert(entity_type.to_string(), drift_percent);
    }

    fn record_missing(&self, entity_type: &str, count: u64) {
        *self.inner.lock().unwrap().missing.entry(entity_type.to_string()).or_insert(0) += count;
    }

    fn record_extras(&self, entity_type: &str, count: u64) {
        *self.inner.lock().unwrap().extras.entry(entity_type.to_string()).or_insert(0) += count;
    }
}
