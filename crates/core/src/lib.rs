//! Shared primitives for all Rust crates in Tollgate.

#![forbid(unsafe_code)]

/// Authentication primitives shared across services.
pub mod auth;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::UserIdentity;

/// Result type used across Tollgate crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common application error categories.
///
/// Every variant maps to one stable machine-readable code through
/// [`AppError::code`]. Lost races on conditional writes are not errors and
/// never surface through this type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller is not authenticated or presented an invalid credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but blocked by policy.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Too many pending requests; the caller should retry later.
    #[error("rate limited: {message} (retry after {retry_after_seconds}s)")]
    RateLimited {
        /// Human-readable reason.
        message: String,
        /// Suggested retry delay taken from admission policy configuration.
        retry_after_seconds: u64,
    },

    /// Delete confirmation was not supplied in the form the environment requires.
    #[error("confirmation required: {0}")]
    ConfirmationRequired(String),

    /// Delete confirmation text did not match the resource name.
    #[error("confirmation mismatch: {0}")]
    ConfirmationMismatch(String),

    /// Environment class is not one the confirmation policy knows.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// No signing key is configured for access tokens.
    #[error("access token signing key is not configured")]
    SigningKeyMissing,

    /// Access token is past its expiry.
    #[error("access token expired")]
    TokenExpired,

    /// Access token is bound to a different target resource.
    #[error("access token target mismatch: {0}")]
    TokenTargetMismatch(String),

    /// Access token was already consumed.
    #[error("access token already used")]
    TokenReplayed,

    /// External infrastructure call failed.
    #[error("external error (retryable: {retryable}): {message}")]
    External {
        /// Whether the queue should retry the call.
        retryable: bool,
        /// Failure details.
        message: String,
    },

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::RateLimited { .. } => "too_many_pending",
            Self::ConfirmationRequired(_) => "confirmation_required",
            Self::ConfirmationMismatch(_) => "confirmation_mismatch",
            Self::UnsupportedEnvironment(_) => "unsupported_environment",
            Self::SigningKeyMissing => "signing_key_missing",
            Self::TokenExpired => "token_expired",
            Self::TokenTargetMismatch(_) => "target_mismatch",
            Self::TokenReplayed => "token_replayed",
            Self::External { .. } => "external_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns true for external failures the queue should retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::External {
                retryable: true,
                ..
            }
        )
    }

    /// Prefixes the error message with context while keeping the category.
    #[must_use]
    pub fn with_context(self, context: impl AsRef<str>) -> Self {
        let context = context.as_ref();
        match self {
            Self::Validation(message) => Self::Validation(format!("{context}: {message}")),
            Self::NotFound(message) => Self::NotFound(format!("{context}: {message}")),
            Self::Conflict(message) => Self::Conflict(format!("{context}: {message}")),
            Self::Unauthorized(message) => Self::Unauthorized(format!("{context}: {message}")),
            Self::Forbidden(message) => Self::Forbidden(format!("{context}: {message}")),
            Self::RateLimited {
                message,
                retry_after_seconds,
            } => Self::RateLimited {
                message: format!("{context}: {message}"),
                retry_after_seconds,
            },
            Self::ConfirmationRequired(message) => {
                Self::ConfirmationRequired(format!("{context}: {message}"))
            }
            Self::ConfirmationMismatch(message) => {
                Self::ConfirmationMismatch(format!("{context}: {message}"))
            }
            Self::UnsupportedEnvironment(message) => {
                Self::UnsupportedEnvironment(format!("{context}: {message}"))
            }
            Self::TokenTargetMismatch(message) => {
                Self::TokenTargetMismatch(format!("{context}: {message}"))
            }
            Self::External { retryable, message } => Self::External {
                retryable,
                message: format!("{context}: {message}"),
            },
            Self::Internal(message) => Self::Internal(format!("{context}: {message}")),
            // Unit variants carry no message to prefix.
            Self::SigningKeyMissing | Self::TokenExpired | Self::TokenReplayed => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn confirmation_errors_have_distinct_codes() {
        let required = AppError::ConfirmationRequired("x".to_owned());
        let mismatch = AppError::ConfirmationMismatch("x".to_owned());
        let unsupported = AppError::UnsupportedEnvironment("x".to_owned());

        assert_eq!(required.code(), "confirmation_required");
        assert_eq!(mismatch.code(), "confirmation_mismatch");
        assert_eq!(unsupported.code(), "unsupported_environment");
    }

    #[test]
    fn with_context_keeps_category_and_prefixes_message() {
        let error = AppError::Conflict("boom".to_owned()).with_context("event 'e-1'");

        assert_eq!(error.code(), "conflict");
        assert_eq!(error.to_string(), "conflict: event 'e-1': boom");
    }

    #[test]
    fn only_retryable_external_errors_are_retryable() {
        let retryable = AppError::External {
            retryable: true,
            message: "503".to_owned(),
        };
        let terminal = AppError::External {
            retryable: false,
            message: "400".to_owned(),
        };

        assert!(retryable.is_retryable());
        assert!(!terminal.is_retryable());
        assert!(!AppError::Internal("x".to_owned()).is_retryable());
    }
}
