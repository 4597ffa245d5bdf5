//! Three-state circuit breaker guarding calls into a flaky dependency,
//! typically the coordination service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// A `from -> to` transition, handed to every registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before tripping to `Open`.
    pub failure_threshold: u32,
    /// How long `Open` holds before admitting a probe call.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: bool,
}

type Observer = Box<dyn Fn(Transition) + Send + Sync>;

/// Guards calls into one logical dependency. One instance per dependency,
/// e.g. one per coordination-service indexer.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    observers: RwLock<Vec<Observer>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: false,
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> CircuitState {
        // try_read is enough: this is a point-in-time read used for metrics
        // and tests, never for correctness decisions (those go through
        // `execute`, which takes the lock itself).
        self.inner.try_read().map(|g| g.state).unwrap_or(CircuitState::Closed)
    }

    pub async fn on_transition<F>(&self, observer: F)
    where
        F: Fn(Transition) + Send + Sync + 'static,
    {
        self.observers.write().await.push(Box::new(observer));
    }

    async fn notify(&self, transition: Transition) {
        for observer in self.observers.read().await.iter() {
            observer(transition);
        }
    }

    /// Force the breaker back to `Closed`, resetting the failure counter.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        if inner.state != CircuitState::Closed {
            let from = inner.state;
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.half_open_in_flight = false;
            drop(inner);
            self.notify(Transition { from, to: CircuitState::Closed }).await;
        }
    }

    /// Returns `Ok(())` if a call should be admitted right now, marking a
    /// `HalfOpen` probe as in-flight so concurrent callers are rejected
    /// until it resolves.
    async fn admit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout && !inner.half_open_in_flight {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = true;
                    drop(inner);
                    self.notify(Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    })
                    .await;
                    Ok(())
                } else {
                    Err(StoreError::backend_unavailable("circuit breaker open"))
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight {
                    Err(StoreError::backend_unavailable(
                        "circuit breaker half-open probe already in flight",
                    ))
                } else {
                    inner.half_open_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                let from = inner.state;
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.half_open_in_flight = false;
                drop(inner);
                self.notify(Transition { from, to: CircuitState::Closed }).await;
                return;
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let from = inner.state;
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    drop(inner);
                    self.notify(Transition { from, to: CircuitState::Open }).await;
                }
            }
            CircuitState::HalfOpen => {
                let from = inner.state;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_in_flight = false;
                drop(inner);
                self.notify(Transition { from, to: CircuitState::Open }).await;
            }
            CircuitState::Open => {}
        }
    }

    /// Run `f` if the breaker admits the call; otherwise return
    /// `BackendUnavailable` without invoking `f`.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        self.admit().await?;

        match f().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker").field("state", &self.state()).finish()
    }
}

pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: threshold, reset_timeout: reset })
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), StoreError> {
        breaker.execute(|| async { Err(StoreError::internal("boom")) }).await
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures_and_rejects_without_invoking() {
        let breaker = breaker(5, Duration::from_secs(30));
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked2 = invoked.clone();
        let result: Result<(), StoreError> = breaker
            .execute(|| async move {
                invoked2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_backend_unavailable());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_in_closed_state_resets_the_failure_counter() {
        let breaker = breaker(3, Duration::from_secs(30));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        let _: Result<(), StoreError> = breaker.execute(|| async { Ok(()) }).await;

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_and_failure_reopens() {
        let breaker = breaker(1, Duration::from_millis(20));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let _: Result<(), StoreError> = breaker.execute(|| async { Ok(()) }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_forces_closed_regardless_of_state() {
        let breaker = breaker(1, Duration::from_secs(30));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset().await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn transitions_are_reported_to_observers() {
        let breaker = breaker(1, Duration::from_secs(30));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        breaker.on_transition(move |t| seen2.lock().unwrap().push((t.from, t.to))).await;

        let _ = fail(&breaker).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[(CircuitState::Closed, CircuitState::Open)]);
    }
}
