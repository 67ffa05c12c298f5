//! Error types for the resilience layer.

use helm_types::ServiceName;
use thiserror::Error;

/// Boxed error produced by wrapped operations and degradation strategies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by circuit breakers, retry policies, and the manager.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The wrapped operation itself failed.
    #[error("operation failed for service {service}")]
    Operation {
        service: ServiceName,
        #[source]
        source: BoxError,
    },

    /// The call exceeded the configured timeout. The operation future has
    /// been dropped; it cannot touch shared state afterwards.
    #[error("operation timed out after {timeout_ms}ms for service {service}")]
    Timeout { service: ServiceName, timeout_ms: u64 },

    /// The circuit is open; the operation was never invoked.
    #[error("circuit open for service {service}, retry in {retry_after_ms}ms")]
    CircuitOpen {
        service: ServiceName,
        retry_after_ms: u64,
    },

    /// No service registered under this name. A programmer error: never
    /// retried and never counted in any metric.
    #[error("service not registered: {0}")]
    NotRegistered(ServiceName),
}

impl ResilienceError {
    /// Render the full error chain into one string, used by the retry
    /// policy to match configured codes and substrings.
    pub fn chain_text(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            text.push_str(": ");
            text.push_str(&err.to_string());
            source = err.source();
        }
        text
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
