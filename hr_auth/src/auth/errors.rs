//! Authentication error types.

use crate::{cache::CacheError, db::timeouts::TimeoutError, password::PasswordViolation};
use std::time::Duration;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Shared cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// Token could not be signed
    #[error("Token signing failed")]
    TokenSigning,

    /// Wrong password or unknown identity
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Too many failed logins
    #[error("Account temporarily locked, try again in {} seconds", .remaining.as_secs())]
    AccountLocked { remaining: Duration },

    /// Identity is not active
    #[error("Account is not active")]
    AccountInactive,

    /// Token past its `exp`
    #[error("Token expired")]
    TokenExpired,

    /// Bad signature, wrong type or malformed token
    #[error("Invalid token")]
    TokenInvalid,

    /// Session is on the revocation list
    #[error("Session has been revoked")]
    SessionRevoked,

    /// No live code for this identity and purpose
    #[error("Code expired or not found")]
    OtpExpired,

    /// Wrong code or attempts exhausted
    #[error("Invalid code")]
    OtpInvalid,

    /// Too many requests
    #[error("Too many requests, retry in {} seconds", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// Caller lacks a required permission
    #[error("Permission denied")]
    PermissionDenied,

    /// New password fails the policy
    #[error("Password too weak: {}", format_violations(.0))]
    WeakPassword(Vec<PasswordViolation>),

    /// Malformed input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Reset token unknown, used or expired
    #[error("Invalid or expired reset token")]
    InvalidResetToken,

    /// Identity not found (internal lookups only)
    #[error("Identity not found")]
    IdentityNotFound,

    /// Unknown role slug
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Outbound mail collaborator failed
    #[error("Message delivery failed: {0}")]
    Delivery(String),

    /// Request deadline exceeded
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

fn format_violations(violations: &[PasswordViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<TimeoutError> for AuthError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(duration) => AuthError::Timeout(duration),
            TimeoutError::Database(e) => AuthError::Database(e),
        }
    }
}

impl AuthError {
    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Infrastructure errors are sanitized, and an unknown identity reads the
    /// same as a wrong password.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Database(_)
            | AuthError::Cache(_)
            | AuthError::HashingFailed
            | AuthError::TokenSigning
            | AuthError::Delivery(_) => "Internal server error".to_string(),
            AuthError::IdentityNotFound => AuthError::InvalidCredentials.to_string(),
            _ => self.to_string(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Database(_)
            | AuthError::Cache(_)
            | AuthError::HashingFailed
            | AuthError::TokenSigning
            | AuthError::Delivery(_) => "internal_error",
            AuthError::InvalidCredentials | AuthError::IdentityNotFound => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::AccountInactive => "account_inactive",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenInvalid => "token_invalid",
            AuthError::SessionRevoked => "session_revoked",
            AuthError::OtpExpired => "otp_expired",
            AuthError::OtpInvalid => "otp_invalid",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::PermissionDenied => "permission_denied",
            AuthError::WeakPassword(_) => "weak_password",
            AuthError::Validation(_) => "validation_error",
            AuthError::InvalidResetToken => "invalid_reset_token",
            AuthError::RoleNotFound(_) => "role_not_found",
            AuthError::Timeout(_) => "timeout",
        }
    }

    /// How long the caller should wait before retrying, when known
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AuthError::AccountLocked { remaining } => Some(*remaining),
            AuthError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the failure comes from infrastructure rather than the caller
    pub fn is_internal(&self) -> bool {
        self.code() == "internal_error"
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_sanitizes_infrastructure() {
        let err = AuthError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.client_message(), "Internal server error");
        assert!(err.is_internal());

        let err = AuthError::Cache(CacheError::NotACounter("hr:x".into()));
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_unknown_identity_reads_as_bad_credentials() {
        assert_eq!(
            AuthError::IdentityNotFound.client_message(),
            AuthError::InvalidCredentials.client_message()
        );
        assert_eq!(AuthError::IdentityNotFound.code(), "invalid_credentials");
    }

    #[test]
    fn test_retry_after() {
        let locked = AuthError::AccountLocked {
            remaining: Duration::from_secs(90),
        };
        assert_eq!(locked.retry_after(), Some(Duration::from_secs(90)));
        assert!(locked.to_string().contains("90 seconds"));

        assert_eq!(AuthError::TokenExpired.retry_after(), None);
    }

    #[test]
    fn test_weak_password_lists_violations() {
        let err = AuthError::WeakPassword(vec![
            PasswordViolation::MissingDigit,
            PasswordViolation::MissingSymbol,
        ]);
        let msg = err.to_string();
        assert!(msg.contains("digit"));
        assert!(msg.contains("symbol"));
    }

    #[test]
    fn test_timeout_conversion() {
        let err: AuthError = TimeoutError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, AuthError::Timeout(d) if d == Duration::from_secs(5)));
    }
}
