//! Metrics and logging sinks are external collaborators, wired in by the
//! caller rather than owned here. [`MetricsSink`] is the seam the circuit
//! breaker, index manager, and health monitor emit through;
//! [`NoopMetrics`] is the default, and `smarterbase-testing` carries an
//! in-memory implementation for assertions.

pub trait MetricsSink: Clone + Send + Sync + 'static {
    fn incr_error(&self, operation: &str);
    fn observe_drift(&self, entity_type: &str, drift_percent: f64);
    fn record_missing(&self, entity_type: &str, count: u64);
    fn record_extras(&self, entity_type: &str, count: u64);
}

#[derive(Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_error(&self, _operation: &str) {}
    fn observe_drift(&self, _entity_type: &str, _drift_percent: f64) {}
    fn record_missing(&self, _entity_type: &str, _count: u64) {}
    fn record_extras(&self, _entity_type: &str, _count: u64) {}
}
