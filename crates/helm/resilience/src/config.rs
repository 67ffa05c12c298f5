//! Configuration for circuit breakers, retry policies, and services.
//!
//! Per-dependency presets live in [`crate::presets`]; this module defines
//! the shapes and their defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use helm_types::{ServiceKind, ServiceName};
use serde::{Deserialize, Serialize};

use crate::manager::DegradationStrategy;

/// Circuit breaker configuration. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,

    /// Consecutive successes in half-open required to close the circuit.
    pub success_threshold: u32,

    /// Timeout applied to each call routed through the breaker.
    pub call_timeout: Duration,

    /// Time the circuit stays open before a probe call is admitted.
    pub reset_timeout: Duration,

    /// Sliding window over which recent requests are retained for health
    /// reporting. Does not influence state transitions.
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            call_timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(60),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,

    /// Multiplier applied per attempt: delay = initial * multiplier^n.
    pub backoff_multiplier: f64,

    /// Fractional jitter applied to each delay (0.25 = +/-25%).
    pub jitter_factor: f64,

    /// Error codes or substrings considered transient. Matching is
    /// case-insensitive over the rendered error chain.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.25,
            retryable_errors: vec![
                "ETIMEDOUT".to_string(),
                "ECONNRESET".to_string(),
                "ECONNREFUSED".to_string(),
                "timed out".to_string(),
                "rate limit".to_string(),
                "503".to_string(),
            ],
        }
    }
}

/// Registration-time description of one protected dependency.
///
/// Registered once per dependency at process start; registering the same
/// name again replaces the breaker and retry policy with fresh state.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Registry key for the service.
    pub name: ServiceName,

    /// What kind of dependency this is.
    pub kind: ServiceKind,

    /// Breaker settings; `None` uses the defaults.
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Retry settings; `None` uses the defaults.
    pub retry: Option<RetryPolicyConfig>,

    /// Substitute computation used while the circuit is open.
    pub degradation: Option<Arc<dyn DegradationStrategy>>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<ServiceName>, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            circuit_breaker: None,
            retry: None,
            degradation: None,
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_retry(mut self, config: RetryPolicyConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn with_degradation(mut self, strategy: Arc<dyn DegradationStrategy>) -> Self {
        self.degradation = Some(strategy);
        self
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("retry", &self.retry)
            .field("degradation", &self.degradation.as_ref().map(|_| "<strategy>"))
            .finish()
    }
}
