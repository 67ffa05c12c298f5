//! Circuit breaker for a single platform dependency.
//!
//! Tracks failures and successes, transitioning between states:
//! - Closed: normal operation, calls allowed
//! - Open: too many consecutive failures, calls fail fast
//! - Half-Open: probing whether the dependency recovered
//!
//! Every call is raced against the configured timeout; a timed-out
//! operation future is dropped, so it cannot update shared state later.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use helm_types::ServiceName;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::CircuitBreakerConfig;
use crate::error::{BoxError, ResilienceError, ResilienceResult};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally.
    Closed,

    /// Circuit is open, calls are rejected without invoking the operation.
    Open,

    /// Circuit is probing whether the dependency has recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A state transition reported to listeners.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub service: ServiceName,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Handle for removing a previously registered state-change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

struct StateListener {
    id: ListenerId,
    callback: Box<dyn Fn(&StateChange) + Send + Sync>,
}

/// One entry in the sliding request history.
#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    at: Instant,
    success: bool,
}

/// Lifetime counters and state, snapshotted by [`CircuitBreaker::metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub service: ServiceName,
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

/// Rates and recent-call counts derived for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    /// Percentage of lifetime calls that succeeded; 100 with no calls.
    pub success_rate: f64,

    /// Percentage of lifetime calls that failed; 0 with no calls.
    pub error_rate: f64,

    /// Calls recorded within the monitoring window.
    pub recent_requests: usize,
}

struct BreakerInner {
    state: CircuitState,
    state_changed_at: Instant,
    state_changed_wall: DateTime<Utc>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    history: VecDeque<HistoryEntry>,
}

impl BreakerInner {
    fn record(&mut self, success: bool, window: std::time::Duration) {
        let now = Instant::now();
        self.history.push_back(HistoryEntry { at: now, success });
        self.prune(now, window);
    }

    fn prune(&mut self, now: Instant, window: std::time::Duration) {
        while let Some(front) = self.history.front() {
            if now.duration_since(front.at) > window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-dependency circuit breaker.
///
/// All state lives behind one mutex so the threshold read-check-mutate is
/// atomic under concurrent calls.
pub struct CircuitBreaker {
    name: ServiceName,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    listeners: Mutex<Vec<Arc<StateListener>>>,
}

impl CircuitBreaker {
    /// Create a new breaker for a service.
    pub fn new(name: ServiceName, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                state_changed_at: Instant::now(),
                state_changed_wall: Utc::now(),
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                last_success_at: None,
                history: VecDeque::new(),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The service this breaker protects.
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// The immutable configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Execute an operation through the breaker, enforcing the call
    /// timeout.
    ///
    /// While open, calls are rejected with [`ResilienceError::CircuitOpen`]
    /// until `reset_timeout` has elapsed; the first call after that is
    /// admitted as a half-open probe.
    pub async fn execute<T, Fut>(&self, operation: Fut) -> ResilienceResult<T>
    where
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let admission = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == CircuitState::Open {
                let elapsed = inner.state_changed_at.elapsed();
                if elapsed < self.config.reset_timeout {
                    let remaining = self.config.reset_timeout - elapsed;
                    return Err(ResilienceError::CircuitOpen {
                        service: self.name.clone(),
                        retry_after_ms: remaining.as_millis() as u64,
                    });
                }
                self.transition(&mut inner, CircuitState::HalfOpen)
            } else {
                None
            }
        };
        if let Some(change) = admission {
            self.notify(&change);
        }

        match tokio::time::timeout(self.config.call_timeout, operation).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(source)) => {
                self.record_failure();
                Err(ResilienceError::Operation {
                    service: self.name.clone(),
                    source,
                })
            }
            Err(_) => {
                self.record_failure();
                Err(ResilienceError::Timeout {
                    service: self.name.clone(),
                    timeout_ms: self.config.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn record_success(&self) {
        let change = {
            let mut inner = self.inner.lock().unwrap();
            inner.total_requests += 1;
            inner.successful_requests += 1;
            inner.last_success_at = Some(Utc::now());
            inner.consecutive_failures = 0;
            inner.consecutive_successes += 1;
            inner.record(true, self.config.monitoring_window);

            if inner.state == CircuitState::HalfOpen
                && inner.consecutive_successes >= self.config.success_threshold
            {
                self.transition(&mut inner, CircuitState::Closed)
            } else {
                None
            }
        };
        if let Some(change) = change {
            self.notify(&change);
        }
    }

    fn record_failure(&self) {
        let change = {
            let mut inner = self.inner.lock().unwrap();
            inner.total_requests += 1;
            inner.failed_requests += 1;
            inner.last_failure_at = Some(Utc::now());
            inner.consecutive_successes = 0;
            inner.consecutive_failures += 1;
            inner.record(false, self.config.monitoring_window);

            match inner.state {
                CircuitState::Closed
                    if inner.consecutive_failures >= self.config.failure_threshold =>
                {
                    self.transition(&mut inner, CircuitState::Open)
                }
                // A single failed probe reopens the circuit.
                CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
                _ => None,
            }
        };
        if let Some(change) = change {
            self.notify(&change);
        }
    }

    /// Transition to a new state, resetting counters as needed. Returns
    /// the change for listener notification outside the lock.
    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) -> Option<StateChange> {
        if inner.state == to {
            return None;
        }
        let from = inner.state;
        inner.state = to;
        inner.state_changed_at = Instant::now();
        inner.state_changed_wall = Utc::now();

        match to {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                info!(service = %self.name, "circuit closed");
            }
            CircuitState::Open => {
                inner.consecutive_successes = 0;
                warn!(
                    service = %self.name,
                    consecutive_failures = inner.consecutive_failures,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                info!(service = %self.name, "circuit half-open, probing");
            }
        }

        Some(StateChange {
            service: self.name.clone(),
            from,
            to,
            at: inner.state_changed_wall,
        })
    }

    /// Invoke listeners synchronously. Panics are caught and logged,
    /// never propagated to the caller.
    fn notify(&self, change: &StateChange) {
        let listeners: Vec<Arc<StateListener>> = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                (listener.callback)(change);
            }));
            if result.is_err() {
                error!(service = %self.name, "state change listener panicked");
            }
        }
    }

    /// Register a state-change listener. Returns an id for
    /// [`CircuitBreaker::remove_listener`].
    pub fn on_state_change(
        &self,
        listener: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners.lock().unwrap().push(Arc::new(StateListener {
            id,
            callback: Box::new(listener),
        }));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Snapshot the lifetime counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().unwrap();
        CircuitBreakerMetrics {
            service: self.name.clone(),
            state: inner.state,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            state_changed_at: inner.state_changed_wall,
        }
    }

    /// Success/error rates from lifetime counters plus the recent-call
    /// count from the pruned history.
    pub fn health(&self) -> BreakerHealth {
        let mut inner = self.inner.lock().unwrap();
        inner.prune(Instant::now(), self.config.monitoring_window);
        let total = inner.total_requests;
        let (success_rate, error_rate) = if total == 0 {
            (100.0, 0.0)
        } else {
            (
                inner.successful_requests as f64 / total as f64 * 100.0,
                inner.failed_requests as f64 / total as f64 * 100.0,
            )
        };
        BreakerHealth {
            success_rate,
            error_rate,
            recent_requests: inner.history.len(),
        }
    }

    /// Zero all counters, clear the history, and force the state back to
    /// closed.
    pub fn reset(&self) {
        let change = {
            let mut inner = self.inner.lock().unwrap();
            inner.total_requests = 0;
            inner.successful_requests = 0;
            inner.failed_requests = 0;
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.last_failure_at = None;
            inner.last_success_at = None;
            inner.history.clear();
            self.transition(&mut inner, CircuitState::Closed)
        };
        if let Some(change) = change {
            self.notify(&change);
        }
        info!(service = %self.name, "circuit breaker reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::advance;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            call_timeout: Duration::from_millis(100),
            reset_timeout: Duration::from_secs(1),
            monitoring_window: Duration::from_secs(60),
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(ServiceName::new("test"), test_config())
    }

    async fn ok_op() -> Result<&'static str, BoxError> {
        Ok("ok")
    }

    async fn fail_op() -> Result<&'static str, BoxError> {
        Err("ECONNRESET".into())
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.execute(ok_op()).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_exact_threshold() {
        let breaker = breaker();

        let _ = breaker.execute(fail_op()).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = breaker.execute(fail_op()).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = breaker.execute(fail_op()).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let breaker = breaker();

        let _ = breaker.execute(fail_op()).await;
        let _ = breaker.execute(fail_op()).await;
        let _ = breaker.execute(ok_op()).await;
        let _ = breaker.execute(fail_op()).await;
        let _ = breaker.execute(fail_op()).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = breaker.execute(fail_op()).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = std::sync::Arc::new(AtomicU32::new(0));
        let counted = {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>("never")
            }
        };
        let result = breaker.execute(counted).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // A rejected call does not count as a request.
        assert_eq!(breaker.metrics().total_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_after_reset_timeout() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = breaker.execute(fail_op()).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_millis(1100)).await;

        let result = breaker.execute(ok_op()).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = breaker.execute(fail_op()).await;
        }
        advance(Duration::from_millis(1100)).await;

        let _ = breaker.execute(ok_op()).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let _ = breaker.execute(ok_op()).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        let metrics = breaker.metrics();
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = breaker.execute(fail_op()).await;
        }
        advance(Duration::from_millis(1100)).await;

        let _ = breaker.execute(fail_op()).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let breaker = breaker();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BoxError>("late")
        };
        let result = breaker.execute(slow).await;
        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));

        let metrics = breaker.metrics();
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_pruned_to_monitoring_window() {
        let config = CircuitBreakerConfig {
            monitoring_window: Duration::from_secs(1),
            ..test_config()
        };
        let breaker = CircuitBreaker::new(ServiceName::new("test"), config);

        let _ = breaker.execute(ok_op()).await;
        let _ = breaker.execute(ok_op()).await;
        advance(Duration::from_secs(2)).await;
        let _ = breaker.execute(ok_op()).await;

        assert_eq!(breaker.health().recent_requests, 1);
        assert_eq!(breaker.metrics().total_requests, 3);
    }

    #[tokio::test]
    async fn test_rates() {
        let breaker = breaker();
        let health = breaker.health();
        assert_eq!(health.success_rate, 100.0);
        assert_eq!(health.error_rate, 0.0);

        let _ = breaker.execute(ok_op()).await;
        let _ = breaker.execute(ok_op()).await;
        let _ = breaker.execute(ok_op()).await;
        let _ = breaker.execute(fail_op()).await;

        let health = breaker.health();
        assert_eq!(health.success_rate, 75.0);
        assert_eq!(health.error_rate, 25.0);
    }

    #[tokio::test]
    async fn test_reset_zeroes_and_closes() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = breaker.execute(fail_op()).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        let metrics = breaker.metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.failed_requests, 0);
        assert_eq!(breaker.health().recent_requests, 0);
    }

    #[tokio::test]
    async fn test_listener_notified_and_removed() {
        let breaker = breaker();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let id = {
            let seen = seen.clone();
            breaker.on_state_change(move |change| {
                seen.lock().unwrap().push((change.from, change.to));
            })
        };

        for _ in 0..3 {
            let _ = breaker.execute(fail_op()).await;
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(CircuitState::Closed, CircuitState::Open)]
        );

        assert!(breaker.remove_listener(id));
        assert!(!breaker.remove_listener(id));
        breaker.reset();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_panic_is_caught() {
        let breaker = breaker();
        breaker.on_state_change(|_| panic!("listener bug"));

        for _ in 0..3 {
            let _ = breaker.execute(fail_op()).await;
        }
        // The panic must not reach the caller.
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
