//! Periodic secondary-index drift detection and repair.
//!
//! Samples documents, recomputes what their index entries should be, and
//! cross-checks the coordination-service index sets, in a loop whose
//! period, sample size, drift threshold, and repair policy are all
//! configurable at construction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use smarterbase_core::{
    Backend, CancelToken, CircuitBreaker, IndexEntry, IndexSink, IndexSpec, MetricsSink, StoreResult,
};

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    pub sample_size: usize,
    pub drift_threshold_percent: f64,
    pub auto_repair: bool,
    pub repair_time_budget: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            sample_size: 100,
            drift_threshold_percent: 5.0,
            auto_repair: true,
            repair_time_budget: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepairOutcome {
    pub repaired_missing: u64,
    pub repaired_extras: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub entity_type: String,
    pub sampled: usize,
    pub missing: Vec<String>,
    pub extras: Vec<(String, IndexEntry)>,
    pub drift_percent: f64,
    pub repair: Option<RepairOutcome>,
}

/// Samples one entity type's documents against its registered index
/// specs. One instance per entity type; construct several to monitor
/// several entity types.
#[derive(Clone)]
pub struct HealthMonitor<B, S, M> {
    backend: B,
    sink: S,
    specs: Arc<Vec<IndexSpec>>,
    metrics: M,
    breaker: Arc<CircuitBreaker>,
    config: HealthConfig,
}

impl<B, S, M> HealthMonitor<B, S, M>
where
    B: Backend,
    S: IndexSink,
    M: MetricsSink,
{
    pub fn new(
        backend: B,
        sink: S,
        specs: Arc<Vec<IndexSpec>>,
        metrics: M,
        breaker: Arc<CircuitBreaker>,
        config: HealthConfig,
    ) -> Self {
        Self { backend, sink, specs, metrics, breaker, config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn specs_for<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a IndexSpec> {
        self.specs.iter().filter(move |spec| spec.entity_type == entity_type)
    }

    /// Runs the monitor loop at `config.interval` until `cancel` fires.
    /// Each pass's report is handed to `on_report`.
    pub async fn run<C, F>(&self, entity_type: &str, prefix: &str, cancel: &C, mut on_report: F)
    where
        C: CancelToken,
        F: FnMut(HealthReport),
    {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.run_once(entity_type, prefix, cancel).await {
                Ok(report) => on_report(report),
                Err(err) => tracing::warn!(entity_type, %err, "health monitor pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// One sampling pass: enumerate, shuffle, sample, cross-check, and
    /// optionally repair. Returns the pass's report without scheduling
    /// the next one.
    pub async fn run_once<C: CancelToken>(&self, entity_type: &str, prefix: &str, cancel: &C) -> StoreResult<HealthReport> {
        let mut keys = self.backend.list(prefix).await?;
        keys.shuffle(&mut rand::thread_rng());
        keys.truncate(self.config.sample_size);

        let mut missing = Vec::new();

        for key in &keys {
            if cancel.is_cancelled() {
                break;
            }

            let bytes = match self.backend.get(key).await {
                Ok(bytes) => bytes,
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    self.metrics.incr_error("health_read");
                    tracing::warn!(entity_type, key, %err, "health monitor could not read sampled document");
                    continue;
                }
            };

            let entries = self.entries_for(entity_type, key, &bytes);
            for entry in entries {
                let members = match self.sink.query(entity_type, &entry.name, &entry.value).await {
                    Ok(members) => members,
                    Err(err) => {
                        self.metrics.incr_error("health_query");
                        tracing::warn!(entity_type, key, %err, "health monitor could not query index set");
                        continue;
                    }
                };

                if !members.contains(key) {
                    missing.push(key.clone());
                }
            }
        }

        // Extras detection requires enumerating every index set and
        // cross-checking each member's document, which this pass defers
        // to a dedicated full-scan job; a sampling pass only ever finds
        // missing entries.
        let extras: Vec<(String, IndexEntry)> = Vec::new();

        let sampled = keys.len();
        let drift_percent = if sampled == 0 {
            0.0
        } else {
            (missing.len() + extras.len()) as f64 / sampled as f64 * 100.0
        };

        self.metrics.observe_drift(entity_type, drift_percent);
        self.metrics.record_missing(entity_type, missing.len() as u64);
        self.metrics.record_extras(entity_type, extras.len() as u64);

        let repair = if drift_percent > self.config.drift_threshold_percent {
            if self.config.auto_repair {
                Some(self.repair(entity_type, &missing, &extras, cancel).await?)
            } else {
                tracing::warn!(entity_type, drift_percent, "index drift exceeds threshold, auto-repair disabled");
                None
            }
        } else {
            None
        };

        Ok(HealthReport { entity_type: entity_type.to_string(), sampled, missing, extras, drift_percent, repair })
    }

    fn entries_for(&self, entity_type: &str, key: &str, bytes: &[u8]) -> Vec<IndexEntry> {
        self.specs_for(entity_type)
            .filter_map(|spec| spec.extractor.extract(key, bytes).ok())
            .flatten()
            .collect()
    }

    /// Re-adds each missing entry and re-removes each extra one, honoring
    /// cancellation and a wall-clock budget. Protected by the circuit
    /// breaker: if the coordination service is unavailable, this returns
    /// immediately rather than retrying in a loop.
    async fn repair<C: CancelToken>(
        &self,
        entity_type: &str,
        missing: &[String],
        extras: &[(String, IndexEntry)],
        cancel: &C,
    ) -> StoreResult<RepairOutcome> {
        let deadline = Instant::now() + self.config.repair_time_budget;
        let mut outcome = RepairOutcome::default();

        for key in missing {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                break;
            }

            let bytes = match self.backend.get(key).await {
                Ok(bytes) => bytes,
                Err(err) if err.is_not_found() => continue,
                Err(_) => {
                    outcome.failed += 1;
                    continue;
                }
            };

            for entry in self.entries_for(entity_type, key, &bytes) {
                let sink = self.sink.clone();
                let (entity, key, entry) = (entity_type.to_string(), key.clone(), entry);
                let result = self
                    .breaker
                    .execute(|| async move { sink.add_member(&entity, &entry.name, &entry.value, &key).await })
                    .await;

                match result {
                    Ok(()) => outcome.repaired_missing += 1,
                    Err(err) if err.is_backend_unavailable() => return Err(err),
                    Err(_) => outcome.failed += 1,
                }
            }
        }

        for (key, entry) in extras {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                break;
            }

            let sink = self.sink.clone();
            let (entity, key, entry) = (entity_type.to_string(), key.clone(), entry.clone());
            let result = self
                .breaker
                .execute(|| async move { sink.remove_member(&entity, &entry.name, &entry.value, &key).await })
                .await;

            match result {
                Ok(()) => outcome.repaired_extras += 1,
                Err(err) if err.is_backend_unavailable() => return Err(err),
                Err(_) => outcome.failed += 1,
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smarterbase_core::{CircuitBreakerConfig, DotPathExtractor, FieldExtractor, NeverCancel, NoopMetrics};
    use smarterbase_testing::{InMemoryBackend, InMemoryIndexSink};

    use super::*;

    fn spec() -> IndexSpec {
        IndexSpec::new("users", "by_country", FieldExtractor { index_name: "by_country", field: "country" })
    }

    #[tokio::test]
    async fn detects_missing_entry_for_unindexed_document() {
        let backend = InMemoryBackend::new();
        let sink = InMemoryIndexSink::new();
        backend.put("users/1", br#"{"country":"fr"}"#.to_vec()).await.unwrap();

        let monitor = HealthMonitor::new(
            backend,
            sink,
            Arc::new(vec![spec()]),
            NoopMetrics,
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            HealthConfig { sample_size: 10, auto_repair: false, ..Default::default() },
        );

        let report = monitor.run_once("users", "users/", &NeverCancel).await.unwrap();
        assert_eq!(report.missing, vec!["users/1".to_string()]);
        assert!(report.drift_percent > 0.0);
    }

    #[tokio::test]
    async fn auto_repair_reindexes_missing_entries() {
        let backend = InMemoryBackend::new();
        let sink = InMemoryIndexSink::new();
        backend.put("users/1", br#"{"country":"fr"}"#.to_vec()).await.unwrap();

        let monitor = HealthMonitor::new(
            backend,
            sink.clone(),
            Arc::new(vec![spec()]),
            NoopMetrics,
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            HealthConfig { sample_size: 10, drift_threshold_percent: 0.0, auto_repair: true, ..Default::default() },
        );

        let report = monitor.run_once("users", "users/", &NeverCancel).await.unwrap();
        assert!(report.repair.is_some());
        assert_eq!(report.repair.unwrap().repaired_missing, 1);

        let members = sink.query("users", "by_country", "fr").await.unwrap();
        assert!(members.contains("users/1"));
    }

    #[test]
    fn dot_path_extractor_is_registrable() {
        let _ = IndexSpec::new("orders", "by_city", DotPathExtractor { index_name: "by_city", path: "address.city" });
    }
}
