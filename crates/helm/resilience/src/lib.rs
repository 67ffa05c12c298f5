//! # Helm Resilience - Fault Isolation for Platform Dependencies
//!
//! This crate is the layer the operations platform puts between itself
//! and every unreliable dependency it talks to: the mail provider, social
//! and advertising platform APIs, the hosted database, and the document
//! generation service.
//!
//! ## Key Components
//!
//! - [`CircuitBreaker`]: per-dependency state machine that fails fast
//!   once consecutive failures cross a threshold, and enforces a call
//!   timeout
//! - [`RetryPolicy`]: bounded exponential backoff with jitter, retrying
//!   only whitelisted transient errors
//! - [`ResilienceManager`]: registry binding a service name to its
//!   breaker, retry policy, and degradation strategy; the single entry
//!   point collaborators call
//! - [`ResilienceMonitor`]: periodic health checks, alert callbacks, and
//!   export to an external metrics store
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use helm_resilience::{
//!     presets, CallOptions, ResilienceManager, ResilienceOutcome,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let manager = Arc::new(ResilienceManager::new());
//! let services = presets::register_defaults(&manager);
//!
//! let outcome = manager
//!     .execute(
//!         &services.mail,
//!         || async { send_campaign_email().await },
//!         CallOptions::new(),
//!     )
//!     .await?;
//!
//! match outcome {
//!     ResilienceOutcome::Success(receipt) => println!("sent: {receipt}"),
//!     ResilienceOutcome::Degraded(value) => println!("queued: {value}"),
//!     ResilienceOutcome::Fallback(receipt) => println!("fallback: {receipt}"),
//! }
//! # Ok(())
//! # }
//! # async fn send_campaign_email() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
//! #     Ok("receipt".to_string())
//! # }
//! ```
//!
//! ## Outcomes
//!
//! Every call through the manager ends one of three ways, and callers
//! handle all of them: the success value, a degraded substitute produced
//! while the circuit is open, or the propagated error (optionally
//! replaced by a per-call fallback value).

pub mod breaker;
pub mod config;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod presets;
pub mod retry;

// Re-export main types
pub use breaker::{
    BreakerHealth, CircuitBreaker, CircuitBreakerMetrics, CircuitState, ListenerId, StateChange,
};
pub use config::{CircuitBreakerConfig, RetryPolicyConfig, ServiceConfig};
pub use error::{BoxError, ResilienceError, ResilienceResult};
pub use manager::{
    CallOptions, DegradationStrategy, FnDegradation, HealthEvent, ResilienceManager,
    ResilienceMetrics, ResilienceOutcome, ServiceHandle, ServiceHealth,
};
pub use monitor::{
    AlertCallback, AlertConfig, HealthRecord, HealthSummary, MetricsStore, NullMetricsStore,
    OverallStatus, ResilienceMonitor,
};
pub use retry::{RetryAttempt, RetryPolicy};
