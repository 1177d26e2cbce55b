//! Error types for leadflow operations.

use crate::sync::ProviderId;
use thiserror::Error;

/// Errors produced by fetchers (cache refresh and provider sync).
///
/// These cross the single-flight boundary, so every concurrent waiter
/// receives its own clone of the settled error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("authentication required for {provider}")]
    AuthRequired { provider: ProviderId },

    #[error("transient fetch failure: {reason}")]
    Transient { reason: String },

    #[error("rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: ProviderId,
        retry_after_ms: i64,
    },
}

impl FetchError {
    /// Credential missing or expired. Never retried outside the normal
    /// interval; the session collaborator pauses the scheduler instead.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::AuthRequired { .. })
    }

    /// Expected to succeed on a later cycle without intervention.
    pub fn is_transient(&self) -> bool {
        !self.is_auth()
    }
}

/// Validation errors for caller-supplied mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level error type aggregating all leadflow error categories.
#[derive(Debug, Clone, Error)]
pub enum LeadflowError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("store error: {reason}")]
    Store { reason: String },

    #[error("cache error: {reason}")]
    Cache { reason: String },

    #[error("subscriber failed: {reason}")]
    Subscriber { reason: String },
}

/// Result type alias for leadflow operations.
pub type LeadflowResult<T> = Result<T, LeadflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_classification() {
        let auth = FetchError::AuthRequired {
            provider: ProviderId::from("gmail"),
        };
        assert!(auth.is_auth());
        assert!(!auth.is_transient());

        let transient = FetchError::Transient {
            reason: "connection reset".to_string(),
        };
        assert!(transient.is_transient());

        let limited = FetchError::RateLimited {
            provider: ProviderId::from("gmail"),
            retry_after_ms: 30_000,
        };
        assert!(limited.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = FetchError::AuthRequired {
            provider: ProviderId::from("outlook"),
        };
        assert_eq!(err.to_string(), "authentication required for outlook");

        let err: LeadflowError = ValidationError::RequiredFieldMissing {
            field: "email".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "required field missing: email");
    }
}
