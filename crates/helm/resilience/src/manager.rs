//! Resilience manager: the single entry point collaborators use instead
//! of calling a dependency directly.
//!
//! The manager owns one circuit breaker and one retry policy per
//! registered service, composes them around each call, substitutes the
//! service's degradation strategy while the circuit is open, and keeps
//! per-service metrics and health snapshots.
//!
//! There is no process-wide registry: the application constructs one
//! manager at startup and passes it around by `Arc`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use helm_types::{ServiceKind, ServiceName};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::ServiceConfig;
use crate::error::{BoxError, ResilienceError, ResilienceResult};
use crate::retry::{RetryAttempt, RetryPolicy};

/// Substitute computation used in place of the real call while the
/// service's circuit is open.
///
/// Strategies must be side-effect-safe to invoke repeatedly and should
/// not block indefinitely; nothing enforces a timeout around them.
#[async_trait]
pub trait DegradationStrategy: Send + Sync {
    /// Produce the degraded substitute value.
    async fn degrade(&self) -> Result<serde_json::Value, BoxError>;
}

/// Adapter turning an async closure into a [`DegradationStrategy`].
pub struct FnDegradation {
    f: Box<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value, BoxError>> + Send + Sync>,
}

impl FnDegradation {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, BoxError>> + Send + 'static,
    {
        Self {
            f: Box::new(move || Box::pin(f())),
        }
    }
}

#[async_trait]
impl DegradationStrategy for FnDegradation {
    async fn degrade(&self) -> Result<serde_json::Value, BoxError> {
        (self.f)().await
    }
}

/// Typed handle returned by [`ResilienceManager::register_service`].
///
/// Call sites hold a handle instead of re-typing the service name.
/// [`ServiceHandle::for_name`] exists for callers that only hold a name;
/// such a handle is rejected at call time if the name was never
/// registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    name: ServiceName,
}

impl ServiceHandle {
    pub fn for_name(name: impl Into<ServiceName>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }
}

/// Per-call options for [`ResilienceManager::execute`].
#[derive(Debug)]
pub struct CallOptions<T> {
    /// Bypass the retry policy for this call.
    pub skip_retry: bool,

    /// Bypass the circuit breaker (and its timeout) for this call.
    pub skip_circuit_breaker: bool,

    /// Value returned instead of the error when the call fails and no
    /// degraded substitute was produced.
    pub fallback_value: Option<T>,
}

impl<T> Default for CallOptions<T> {
    fn default() -> Self {
        Self {
            skip_retry: false,
            skip_circuit_breaker: false,
            fallback_value: None,
        }
    }
}

impl<T> CallOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_retry(mut self) -> Self {
        self.skip_retry = true;
        self
    }

    pub fn no_circuit_breaker(mut self) -> Self {
        self.skip_circuit_breaker = true;
        self
    }

    pub fn with_fallback(mut self, value: T) -> Self {
        self.fallback_value = Some(value);
        self
    }
}

/// The three outcomes a caller must handle.
#[derive(Debug)]
pub enum ResilienceOutcome<T> {
    /// The operation completed normally.
    Success(T),

    /// The circuit was open and the service's degradation strategy
    /// supplied a substitute.
    Degraded(serde_json::Value),

    /// The caller-supplied fallback value was used after the call failed.
    Fallback(T),
}

impl<T> ResilienceOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ResilienceOutcome::Degraded(_))
    }

    /// The typed value, if the outcome carries one.
    pub fn into_value(self) -> Option<T> {
        match self {
            ResilienceOutcome::Success(value) | ResilienceOutcome::Fallback(value) => Some(value),
            ResilienceOutcome::Degraded(_) => None,
        }
    }

    /// The degraded substitute, if that is what was returned.
    pub fn degraded_value(&self) -> Option<&serde_json::Value> {
        match self {
            ResilienceOutcome::Degraded(value) => Some(value),
            _ => None,
        }
    }
}

/// Manager-owned counters for one service. Monotonic except via reset.
#[derive(Debug, Default)]
struct ServiceMetrics {
    requests_total: AtomicU64,
    requests_successful: AtomicU64,
    requests_failed: AtomicU64,
    retries_total: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    degradation_invocations: AtomicU64,
}

impl ServiceMetrics {
    fn snapshot(&self, service: ServiceName) -> ResilienceMetrics {
        ResilienceMetrics {
            service,
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_successful: self.requests_successful.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
            degradation_invocations: self.degradation_invocations.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.requests_total.store(0, Ordering::Relaxed);
        self.requests_successful.store(0, Ordering::Relaxed);
        self.requests_failed.store(0, Ordering::Relaxed);
        self.retries_total.store(0, Ordering::Relaxed);
        self.circuit_breaker_trips.store(0, Ordering::Relaxed);
        self.degradation_invocations.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of the manager-owned counters for one service.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceMetrics {
    pub service: ServiceName,
    pub requests_total: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    pub retries_total: u64,
    pub circuit_breaker_trips: u64,
    pub degradation_invocations: u64,
}

/// Derived, read-only health view of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: ServiceName,
    pub kind: ServiceKind,
    pub state: CircuitState,
    pub healthy: bool,
    pub success_rate: f64,
    pub error_rate: f64,
    pub recent_requests: usize,
    pub last_error_at: Option<DateTime<Utc>>,
    pub degradation_active: bool,
}

/// Events broadcast to health subscribers.
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// A service was registered (or replaced).
    ServiceRegistered(ServiceName),

    /// A circuit breaker changed state.
    StateChanged {
        service: ServiceName,
        from: CircuitState,
        to: CircuitState,
    },

    /// A call completed; the service's health snapshot at that point.
    HealthChanged {
        service: ServiceName,
        health: ServiceHealth,
    },
}

struct ServiceEntry {
    kind: ServiceKind,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    degradation: Option<Arc<dyn DegradationStrategy>>,
    metrics: Arc<ServiceMetrics>,
}

/// Registry binding each service name to its breaker, retry policy, and
/// degradation strategy.
pub struct ResilienceManager {
    services: DashMap<ServiceName, Arc<ServiceEntry>>,
    event_tx: broadcast::Sender<HealthEvent>,
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceManager {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            services: DashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to health events.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.event_tx.subscribe()
    }

    /// Register a service, constructing its breaker and retry policy.
    ///
    /// Registering an already-known name replaces the previous entry with
    /// fresh state.
    pub fn register_service(&self, config: ServiceConfig) -> ServiceHandle {
        let name = config.name.clone();
        let breaker = Arc::new(CircuitBreaker::new(
            name.clone(),
            config.circuit_breaker.unwrap_or_default(),
        ));
        let retry = RetryPolicy::new(config.retry.unwrap_or_default());
        let metrics = Arc::new(ServiceMetrics::default());

        {
            let metrics = metrics.clone();
            let event_tx = self.event_tx.clone();
            breaker.on_state_change(move |change| {
                if change.to == CircuitState::Open {
                    metrics.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
                }
                let _ = event_tx.send(HealthEvent::StateChanged {
                    service: change.service.clone(),
                    from: change.from,
                    to: change.to,
                });
            });
        }

        let replaced = self
            .services
            .insert(
                name.clone(),
                Arc::new(ServiceEntry {
                    kind: config.kind,
                    breaker,
                    retry,
                    degradation: config.degradation,
                    metrics,
                }),
            )
            .is_some();
        info!(service = %name, kind = %config.kind, replaced, "service registered");

        let _ = self
            .event_tx
            .send(HealthEvent::ServiceRegistered(name.clone()));
        ServiceHandle { name }
    }

    /// Execute an operation under the service's resilience policies.
    ///
    /// The call is wrapped breaker-innermost, retry-outermost (each
    /// skippable per call). On failure, a degraded substitute is returned
    /// when the circuit is open and a strategy is registered; otherwise
    /// the caller's fallback value; otherwise the original error.
    pub async fn execute<T, F, Fut>(
        &self,
        service: &ServiceHandle,
        operation: F,
        options: CallOptions<T>,
    ) -> ResilienceResult<ResilienceOutcome<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let entry = self
            .services
            .get(&service.name)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ResilienceError::NotRegistered(service.name.clone()))?;

        let skip_breaker = options.skip_circuit_breaker;
        let name = service.name.clone();
        let attempt = || {
            let fut = operation();
            let breaker = entry.breaker.clone();
            let name = name.clone();
            async move {
                if skip_breaker {
                    fut.await.map_err(|source| ResilienceError::Operation {
                        service: name,
                        source,
                    })
                } else {
                    breaker.execute(fut).await
                }
            }
        };

        let result = if options.skip_retry {
            attempt().await
        } else {
            let retry_metrics = entry.metrics.clone();
            let on_retry = move |_: &RetryAttempt| {
                retry_metrics.retries_total.fetch_add(1, Ordering::Relaxed);
            };
            entry.retry.execute(attempt, Some(&on_retry)).await
        };

        let outcome = match result {
            Ok(value) => {
                entry
                    .metrics
                    .requests_successful
                    .fetch_add(1, Ordering::Relaxed);
                Ok(ResilienceOutcome::Success(value))
            }
            Err(err) => {
                entry.metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(service = %service.name, error = %err, "call failed");

                let degraded = if entry.breaker.state() == CircuitState::Open {
                    match &entry.degradation {
                        Some(strategy) => match strategy.degrade().await {
                            Ok(value) => {
                                entry
                                    .metrics
                                    .degradation_invocations
                                    .fetch_add(1, Ordering::Relaxed);
                                info!(service = %service.name, "degraded response substituted");
                                Some(value)
                            }
                            Err(degrade_err) => {
                                error!(
                                    service = %service.name,
                                    error = %degrade_err,
                                    "degradation strategy failed"
                                );
                                None
                            }
                        },
                        None => None,
                    }
                } else {
                    None
                };

                match degraded {
                    Some(value) => Ok(ResilienceOutcome::Degraded(value)),
                    None => match options.fallback_value {
                        Some(value) => Ok(ResilienceOutcome::Fallback(value)),
                        None => Err(err),
                    },
                }
            }
        };

        entry.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_tx.send(HealthEvent::HealthChanged {
            service: service.name.clone(),
            health: Self::entry_health(&service.name, &entry),
        });
        outcome
    }

    fn entry_health(name: &ServiceName, entry: &ServiceEntry) -> ServiceHealth {
        let state = entry.breaker.state();
        let breaker_health = entry.breaker.health();
        let breaker_metrics = entry.breaker.metrics();
        ServiceHealth {
            service: name.clone(),
            kind: entry.kind,
            state,
            healthy: state != CircuitState::Open,
            success_rate: breaker_health.success_rate,
            error_rate: breaker_health.error_rate,
            recent_requests: breaker_health.recent_requests,
            last_error_at: breaker_metrics.last_failure_at,
            degradation_active: state == CircuitState::Open && entry.degradation.is_some(),
        }
    }

    /// Look up the handle for a registered name.
    pub fn handle(&self, name: &ServiceName) -> Option<ServiceHandle> {
        self.services.get(name).map(|_| ServiceHandle {
            name: name.clone(),
        })
    }

    /// Names of all registered services, sorted.
    pub fn service_names(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> =
            self.services.iter().map(|r| r.key().clone()).collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    /// Health snapshot for one service.
    pub fn service_health(&self, name: &ServiceName) -> Option<ServiceHealth> {
        self.services
            .get(name)
            .map(|r| Self::entry_health(name, r.value()))
    }

    /// Health snapshots for all services, sorted by name.
    pub fn all_services_health(&self) -> Vec<ServiceHealth> {
        let mut all: Vec<ServiceHealth> = self
            .services
            .iter()
            .map(|r| Self::entry_health(r.key(), r.value()))
            .collect();
        all.sort_by(|a, b| a.service.as_str().cmp(b.service.as_str()));
        all
    }

    /// Manager-owned metrics for one service.
    pub fn service_metrics(&self, name: &ServiceName) -> Option<ResilienceMetrics> {
        self.services
            .get(name)
            .map(|r| r.value().metrics.snapshot(name.clone()))
    }

    /// Manager-owned metrics for all services, sorted by name.
    pub fn all_metrics(&self) -> Vec<ResilienceMetrics> {
        let mut all: Vec<ResilienceMetrics> = self
            .services
            .iter()
            .map(|r| r.value().metrics.snapshot(r.key().clone()))
            .collect();
        all.sort_by(|a, b| a.service.as_str().cmp(b.service.as_str()));
        all
    }

    /// Reset one service: breaker back to closed, all counters zeroed.
    pub fn reset_service(&self, name: &ServiceName) -> ResilienceResult<()> {
        let entry = self
            .services
            .get(name)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ResilienceError::NotRegistered(name.clone()))?;
        entry.breaker.reset();
        entry.metrics.reset();
        Ok(())
    }

    /// Reset every registered service.
    pub fn reset_all(&self) {
        let entries: Vec<Arc<ServiceEntry>> = self
            .services
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for entry in entries {
            entry.breaker.reset();
            entry.metrics.reset();
        }
    }
}
