//! # Helm Types - Core Types for the Service Resilience Layer
//!
//! Shared, dependency-light types used across the Helm resilience crates:
//!
//! - [`ServiceName`]: strongly-typed key for a protected dependency
//! - [`ServiceKind`]: taxonomy of the dependencies the platform talks to
//! - [`Severity`]: alert severity levels for monitoring consumers
//!
//! Everything here is serde-serializable so that health snapshots and
//! metrics rows can cross the process boundary unchanged.

pub mod alert;
pub mod ids;
pub mod service;

pub use alert::Severity;
pub use ids::ServiceName;
pub use service::ServiceKind;
