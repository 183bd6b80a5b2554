// Three-state failure isolator for the key-value store and the broker.
// Transitions happen under a per-breaker mutex; the wrapped call itself runs
// outside the lock.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Cool-down before a tripped breaker admits probes.
    pub reset_timeout: Duration,
    /// Probes admitted concurrently while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_probes: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitError<E: std::error::Error> {
    #[error("dependency unavailable: circuit open")]
    Open,

    #[error(transparent)]
    Inner(E),
}

/// Separates dependency failures from domain outcomes that merely travel
/// through a wrapped call. A missing refresh record means the store
/// answered; only the store failing to answer should move the breaker.
pub trait BreakerError: std::error::Error {
    fn is_dependency_failure(&self) -> bool;
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
}

enum Admission {
    Normal,
    Probe,
    Rejected,
}

pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker poisoned").state
    }

    /// Run a fallible operation through the breaker. While open, callers
    /// fail immediately without invoking the operation. Domain errors flow
    /// back unchanged and count as contact with a healthy dependency.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, CircuitError<E>>
    where
        E: BreakerError,
        F: Future<Output = Result<T, E>>,
    {
        let probe = match self.admit() {
            Admission::Normal => false,
            Admission::Probe => true,
            Admission::Rejected => return Err(CircuitError::Open),
        };

        match fut.await {
            Ok(value) => {
                self.on_success(probe);
                Ok(value)
            }
            Err(e) if e.is_dependency_failure() => {
                self.on_failure(probe);
                Err(CircuitError::Inner(e))
            }
            Err(e) => {
                self.on_success(probe);
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.failures = 0;
                    inner.half_open_in_flight = 1;
                    info!(breaker = self.name, "circuit half-open, admitting probe");
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_probes {
                    inner.half_open_in_flight += 1;
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.half_open_in_flight = 0;
                info!(breaker = self.name, "circuit closed after successful probe");
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(breaker = self.name, "probe failed, circuit re-opened");
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        breaker = self.name,
                        failures = inner.failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    impl BreakerError for Boom {
        fn is_dependency_failure(&self) -> bool {
            true
        }
    }

    #[derive(Debug, Error)]
    #[error("no such record")]
    struct NotFound;

    impl BreakerError for NotFound {
        fn is_dependency_failure(&self) -> bool {
            false
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitBreakerConfig::default())
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CircuitError<Boom>> {
        breaker
            .call(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Boom)
            })
            .await
            .map(|_| ())
    }

    #[tokio::test]
    async fn five_consecutive_failures_open_the_circuit() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            assert!(matches!(
                fail(&breaker, &calls).await,
                Err(CircuitError::Inner(_))
            ));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // the sixth call is rejected without invoking the operation
        assert!(matches!(
            fail(&breaker, &calls).await,
            Err(CircuitError::Open)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn domain_errors_never_move_the_breaker() {
        let breaker = breaker();

        for _ in 0..20 {
            let result: Result<(), _> = breaker.call(async { Err(NotFound) }).await;
            assert!(matches!(result, Err(CircuitError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn a_probe_returning_a_domain_error_closes_the_circuit() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        // the dependency answered, even though the answer was negative
        let result: Result<(), _> = breaker.call(async { Err(NotFound) }).await;
        assert!(matches!(result, Err(CircuitError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn success_in_closed_state_resets_the_failure_count() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..4 {
            let _ = fail(&breaker, &calls).await;
        }
        breaker.call(async { Ok::<_, Boom>(()) }).await.unwrap();

        // four more failures still do not trip it
        for _ in 0..4 {
            let _ = fail(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn after_the_reset_timeout_a_probe_closes_the_circuit() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _ = fail(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(matches!(
            fail(&breaker, &calls).await,
            Err(CircuitError::Open)
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        breaker.call(async { Ok::<_, Boom>(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // normal traffic flows again
        breaker.call(async { Ok::<_, Boom>(()) }).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_probe_reopens_the_circuit() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(matches!(
            fail(&breaker, &calls).await,
            Err(CircuitError::Inner(_))
        ));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            fail(&breaker, &calls).await,
            Err(CircuitError::Open)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_at_most_three_probes() {
        let breaker = Arc::new(breaker());
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        // three probes park on a channel each; the fourth is rejected
        let mut probes = Vec::new();
        let mut releases = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = tokio::sync::oneshot::channel::<()>();
            releases.push(tx);
            let breaker = breaker.clone();
            probes.push(tokio::spawn(async move {
                breaker
                    .call(async {
                        let _ = rx.await;
                        Ok::<_, Boom>(())
                    })
                    .await
            }));
        }
        tokio::task::yield_now().await;

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let rejected: Result<(), _> = breaker.call(async { Ok::<_, Boom>(()) }).await;
        assert!(matches!(rejected, Err(CircuitError::Open)));

        for tx in releases {
            let _ = tx.send(());
        }
        for probe in probes {
            probe.await.unwrap().unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
