//! Per-dependency presets.
//!
//! The platform registers a fixed table of dependencies at startup; each
//! preset carries thresholds, retryable patterns, and a degradation
//! fallback shaped for that dependency:
//!
//! - mail: queue the message for delivery after recovery
//! - social / ads: serve the last cached snapshot
//! - document generation: keep the artifact as a draft
//! - database: no degradation, fail loud

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use helm_types::ServiceKind;
use serde_json::{json, Value};

use crate::config::{CircuitBreakerConfig, RetryPolicyConfig, ServiceConfig};
use crate::error::BoxError;
use crate::manager::{DegradationStrategy, ResilienceManager, ServiceHandle};

/// Acknowledge the request and queue it for delivery once the dependency
/// recovers.
pub struct QueueForLater;

#[async_trait]
impl DegradationStrategy for QueueForLater {
    async fn degrade(&self) -> Result<Value, BoxError> {
        Ok(json!({ "success": false, "queued": true }))
    }
}

/// Serve the last snapshot a collaborator stored.
///
/// Collaborators refresh the snapshot on successful reads via
/// [`CachedSnapshot::store`]; while the circuit is open, readers get the
/// stale copy marked as cached.
pub struct CachedSnapshot {
    value: RwLock<Value>,
}

impl CachedSnapshot {
    pub fn new(initial: Value) -> Self {
        Self {
            value: RwLock::new(initial),
        }
    }

    /// Replace the stored snapshot.
    pub fn store(&self, value: Value) {
        *self.value.write().unwrap() = value;
    }
}

#[async_trait]
impl DegradationStrategy for CachedSnapshot {
    async fn degrade(&self) -> Result<Value, BoxError> {
        let data = self.value.read().unwrap().clone();
        Ok(json!({ "success": true, "cached": true, "data": data }))
    }
}

/// Keep the generated artifact as a draft to be finalized later.
pub struct MarkAsDraft;

#[async_trait]
impl DegradationStrategy for MarkAsDraft {
    async fn degrade(&self) -> Result<Value, BoxError> {
        Ok(json!({ "success": false, "draft": true }))
    }
}

impl ServiceConfig {
    /// Transactional email provider. Mail tolerates latency, so the
    /// breaker is lenient and failures queue for later.
    pub fn mail_provider() -> Self {
        Self::new("mail-provider", ServiceKind::MailProvider)
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 2,
                call_timeout: Duration::from_secs(15),
                reset_timeout: Duration::from_secs(60),
                monitoring_window: Duration::from_secs(300),
            })
            .with_retry(RetryPolicyConfig {
                max_retries: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                backoff_multiplier: 2.0,
                jitter_factor: 0.25,
                retryable_errors: vec![
                    "ETIMEDOUT".to_string(),
                    "ECONNRESET".to_string(),
                    "rate limit".to_string(),
                    "421".to_string(),
                    "451".to_string(),
                ],
            })
            .with_degradation(Arc::new(QueueForLater))
    }

    /// A social media platform API. Aggressive rate limiters upstream, so
    /// long reset and cached reads while open.
    pub fn social_platform(name: impl Into<helm_types::ServiceName>) -> Self {
        Self::new(name, ServiceKind::SocialPlatform)
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 4,
                success_threshold: 2,
                call_timeout: Duration::from_secs(10),
                reset_timeout: Duration::from_secs(120),
                monitoring_window: Duration::from_secs(300),
            })
            .with_retry(RetryPolicyConfig {
                max_retries: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                backoff_multiplier: 2.0,
                jitter_factor: 0.3,
                retryable_errors: vec![
                    "ETIMEDOUT".to_string(),
                    "ECONNRESET".to_string(),
                    "rate limit".to_string(),
                    "429".to_string(),
                    "503".to_string(),
                ],
            })
            .with_degradation(Arc::new(CachedSnapshot::new(Value::Null)))
    }

    /// Advertising platform API.
    pub fn ad_platform() -> Self {
        Self::new("ad-platform", ServiceKind::AdPlatform)
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 3,
                call_timeout: Duration::from_secs(20),
                reset_timeout: Duration::from_secs(300),
                monitoring_window: Duration::from_secs(600),
            })
            .with_retry(RetryPolicyConfig {
                max_retries: 2,
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                backoff_multiplier: 2.0,
                jitter_factor: 0.2,
                retryable_errors: vec![
                    "ETIMEDOUT".to_string(),
                    "429".to_string(),
                    "500".to_string(),
                    "503".to_string(),
                ],
            })
            .with_degradation(Arc::new(CachedSnapshot::new(Value::Null)))
    }

    /// The hosted relational database. Tight timeout, quick recovery
    /// probes, and no degradation: a broken database fails loud.
    pub fn database() -> Self {
        Self::new("database", ServiceKind::Database)
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 10,
                success_threshold: 3,
                call_timeout: Duration::from_secs(5),
                reset_timeout: Duration::from_secs(15),
                monitoring_window: Duration::from_secs(60),
            })
            .with_retry(RetryPolicyConfig {
                max_retries: 5,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(2),
                backoff_multiplier: 2.0,
                jitter_factor: 0.25,
                retryable_errors: vec![
                    "connection".to_string(),
                    "deadlock".to_string(),
                    "ETIMEDOUT".to_string(),
                    "too many clients".to_string(),
                ],
            })
    }

    /// Document generation service (PDFs, quotes). Generation is slow, so
    /// a generous call timeout; failed artifacts stay drafts.
    pub fn document_service() -> Self {
        Self::new("document-service", ServiceKind::DocumentService)
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                call_timeout: Duration::from_secs(30),
                reset_timeout: Duration::from_secs(60),
                monitoring_window: Duration::from_secs(300),
            })
            .with_retry(RetryPolicyConfig {
                max_retries: 2,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(20),
                backoff_multiplier: 2.0,
                jitter_factor: 0.25,
                retryable_errors: vec![
                    "ETIMEDOUT".to_string(),
                    "ECONNRESET".to_string(),
                    "503".to_string(),
                ],
            })
            .with_degradation(Arc::new(MarkAsDraft))
    }
}

/// Handles for the default dependency table.
#[derive(Debug, Clone)]
pub struct DefaultServiceHandles {
    pub mail: ServiceHandle,
    pub social: ServiceHandle,
    pub ads: ServiceHandle,
    pub database: ServiceHandle,
    pub documents: ServiceHandle,
}

/// Register the default dependency table on a manager.
pub fn register_defaults(manager: &ResilienceManager) -> DefaultServiceHandles {
    DefaultServiceHandles {
        mail: manager.register_service(ServiceConfig::mail_provider()),
        social: manager.register_service(ServiceConfig::social_platform("social-platform")),
        ads: manager.register_service(ServiceConfig::ad_platform()),
        database: manager.register_service(ServiceConfig::database()),
        documents: manager.register_service(ServiceConfig::document_service()),
    }
}
