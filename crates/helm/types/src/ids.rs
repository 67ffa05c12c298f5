//! Strongly-typed identifiers for Helm entities
//!
//! Service names are plain strings at the edges (config files, metrics
//! rows) but wrapped in a newtype internally for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a protected external dependency ("mail-provider",
/// "ads-platform", ...).
///
/// Used as the registry key in the resilience manager; one circuit breaker
/// and one retry policy exist per distinct name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self(name)
    }
}
