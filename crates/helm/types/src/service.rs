//! Dependency taxonomy for the operations platform.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of external dependencies the platform calls through the
/// resilience layer.
///
/// The kind drives nothing in the state machines; it is carried so that
/// health snapshots and alerts can group services by what they talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Transactional and campaign email provider.
    MailProvider,

    /// Social media platform APIs.
    SocialPlatform,

    /// Advertising platform APIs.
    AdPlatform,

    /// The hosted relational database.
    Database,

    /// Document generation service (PDFs, quotes).
    DocumentService,

    /// Anything else a collaborator registers ad hoc.
    Other,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::MailProvider => write!(f, "mail_provider"),
            ServiceKind::SocialPlatform => write!(f, "social_platform"),
            ServiceKind::AdPlatform => write!(f, "ad_platform"),
            ServiceKind::Database => write!(f, "database"),
            ServiceKind::DocumentService => write!(f, "document_service"),
            ServiceKind::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_snake_case() {
        let json = serde_json::to_string(&ServiceKind::DocumentService).unwrap();
        assert_eq!(json, "\"document_service\"");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ServiceKind::AdPlatform.to_string(), "ad_platform");
    }
}
