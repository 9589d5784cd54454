//! Mapping of auth errors to HTTP responses.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use hr_auth::{AuthError, password::PasswordViolation};
use serde::Serialize;

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<PasswordViolation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Handler error
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError(err)
    }
}

/// HTTP status for an auth error
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::IdentityNotFound
        | AuthError::TokenExpired
        | AuthError::TokenInvalid
        | AuthError::SessionRevoked => StatusCode::UNAUTHORIZED,
        AuthError::AccountInactive | AuthError::PermissionDenied => StatusCode::FORBIDDEN,
        AuthError::AccountLocked { .. } | AuthError::RateLimited { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        }
        AuthError::OtpExpired
        | AuthError::OtpInvalid
        | AuthError::Validation(_)
        | AuthError::WeakPassword(_)
        | AuthError::InvalidResetToken => StatusCode::BAD_REQUEST,
        AuthError::RoleNotFound(_) => StatusCode::NOT_FOUND,
        AuthError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AuthError::Database(_)
        | AuthError::Cache(_)
        | AuthError::HashingFailed
        | AuthError::TokenSigning
        | AuthError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);

        if err.is_internal() {
            tracing::error!(error = %err, "Request failed on infrastructure error");
        } else if matches!(err, AuthError::Timeout(_)) {
            tracing::warn!(error = %err, "Request deadline exceeded");
        }

        let retry_after = err.retry_after().map(|d| d.as_secs().max(1));
        let body = ErrorResponse {
            error: err.client_message(),
            code: err.code(),
            violations: match &err {
                AuthError::WeakPassword(violations) => Some(violations.clone()),
                _ => None,
            },
            retry_after_secs: retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
