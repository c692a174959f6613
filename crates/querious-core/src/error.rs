//! Error types for the Querious client

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Payload the backend attaches to a plan-limit refusal.
///
/// Sent as the `detail` of a 403 response and as the data of a streaming
/// `error` event: `{"error": "limit_reached", "resource": "tokens", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitReached {
    pub resource: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub used: Option<u64>,
}

impl LimitReached {
    /// Recognise a limit payload inside an arbitrary JSON value.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        if value.get("error").and_then(|e| e.as_str()) != Some("limit_reached") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

impl std::fmt::Display for LimitReached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.limit, self.used) {
            (Some(limit), Some(used)) => {
                write!(f, "{} limit reached ({} of {} used)", self.resource, used, limit)
            }
            (Some(limit), None) => write!(f, "{} limit reached (limit {})", self.resource, limit),
            _ => write!(f, "{} limit reached", self.resource),
        }
    }
}

/// Core error types for the Querious client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Refresh failed or the retried request was still unauthorized.
    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(LimitReached),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether the caller should send the user back to the login flow.
    pub fn requires_login(&self) -> bool {
        matches!(self, Error::SessionExpired | Error::Authentication(_))
    }

    /// The limit payload, if this error is a quota refusal.
    pub fn limit_reached(&self) -> Option<&LimitReached> {
        match self {
            Error::QuotaExceeded(limit) => Some(limit),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_limit_reached_from_value() {
        let value = json!({"error": "limit_reached", "resource": "tokens", "limit": 10000, "used": 10400});
        let limit = LimitReached::from_value(&value).unwrap();
        assert_eq!(limit.resource, "tokens");
        assert_eq!(limit.limit, Some(10000));
        assert_eq!(limit.used, Some(10400));
        assert_eq!(limit.to_string(), "tokens limit reached (10400 of 10000 used)");
    }

    #[test]
    fn test_limit_reached_ignores_other_errors() {
        assert!(LimitReached::from_value(&json!({"error": "Chat not found"})).is_none());
        assert!(LimitReached::from_value(&json!("limit_reached")).is_none());
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::SessionExpired.requires_login());
        assert!(!Error::Network("reset".to_string()).requires_login());

        let quota = Error::QuotaExceeded(LimitReached {
            resource: "documents".to_string(),
            limit: Some(3),
            used: None,
        });
        assert_eq!(quota.limit_reached().unwrap().resource, "documents");
        assert_eq!(quota.to_string(), "Quota exceeded: documents limit reached (limit 3)");
    }
}
