//! Authentication API handlers.
//!
//! Public endpoints (login, two-factor, refresh, password reset, one-time
//! codes) and the endpoints that act on the caller's own session.
//!
//! # Examples
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "employee@example.com", "password": "Correct-Horse-9"}'
//! ```
//!
//! Refresh:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/refresh \
//!   -H "Content-Type: application/json" \
//!   -d '{"refresh_token": "eyJhbGciOiJIUzI1NiIs..."}'
//! ```

use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use hr_auth::{
    AuthError, CurrentIdentity,
    auth::{
        AuthenticatedSession, ChangePasswordRequest, ClientInfo, LoginOutcome, LoginRequest,
        PasswordResetConfirm, PasswordResetRequest, RefreshRequest, SendOtpRequest,
        TwoFactorRequest, VerifyOtpRequest,
    },
    config::RateLimitRule,
    tokens::TokenPair,
};
use serde::Serialize;
use uuid::Uuid;

use super::{AppState, error::ApiError};
use crate::{logging::log_security_event, metrics};

/// Generic acknowledgement that reveals nothing about the account
pub const ACCEPTED_MESSAGE: &str =
    "If the address belongs to an account, a message has been sent to it";

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Authenticated {
        tokens: TokenPair,
        identity: CurrentIdentity,
    },
    TwoFactorRequired {
        email: String,
    },
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn accepted() -> Json<Self> {
        Json(Self {
            message: ACCEPTED_MESSAGE.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct VerifiedResponse {
    pub verified: bool,
}

/// One entry of the caller's session list
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub current: bool,
}

/// Per-route limit keyed by client IP
async fn enforce_endpoint_limit(
    state: &AppState,
    endpoint: &str,
    client: &ClientInfo,
    rule: RateLimitRule,
) -> Result<(), ApiError> {
    let ip = client.ip.as_deref().unwrap_or("unknown");
    let decision = state
        .auth
        .rate_limiter()
        .check_endpoint(endpoint, ip, rule)
        .await?;
    if !decision.allowed {
        metrics::rate_limit_hits_total(endpoint);
        log_security_event("rate_limited", None, Some(ip), &format!("{endpoint} limit exceeded"));
        return Err(AuthError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into());
    }
    Ok(())
}

/// Count and log a failed first or second login step
fn record_login_failure(err: &AuthError, client: &ClientInfo) {
    let outcome = match err {
        AuthError::InvalidCredentials | AuthError::OtpInvalid | AuthError::OtpExpired => {
            "invalid"
        }
        AuthError::AccountLocked { .. } => {
            metrics::lockouts_total();
            "locked"
        }
        AuthError::AccountInactive => "inactive",
        _ => "error",
    };
    metrics::login_attempts_total(outcome);
    if outcome != "error" {
        log_security_event(
            "failed_login",
            None,
            client.ip.as_deref(),
            &format!("Login rejected ({outcome})"),
        );
    }
}

/// Exchange credentials for a session, or start the two-factor step.
///
/// # Request Body
///
/// ```json
/// { "email": "employee@example.com", "password": "Correct-Horse-9" }
/// ```
///
/// # Response
///
/// `200 OK` with `{"status": "authenticated", "tokens": {..}, "identity": {..}}`
/// or `{"status": "two_factor_required", "email": ".."}`.
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown e-mail or wrong password (indistinguishable)
/// - `403 Forbidden`: Account is not active
/// - `429 Too Many Requests`: Account locked or route limit hit
pub async fn login(
    State(state): State<AppState>,
    Extension(client): Extension<ClientInfo>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let rule = state.auth.rate_limiter().rules().login;
    enforce_endpoint_limit(&state, "login", &client, rule).await?;

    match state.auth.login(payload, &client).await {
        Ok(LoginOutcome::Authenticated(AuthenticatedSession { identity, tokens })) => {
            metrics::login_attempts_total("success");
            tracing::info!(identity_id = %identity.id, session_id = %tokens.session_id, "Login succeeded");
            Ok(Json(LoginResponse::Authenticated { tokens, identity }))
        }
        Ok(LoginOutcome::TwoFactorRequired { email }) => {
            metrics::login_attempts_total("two_factor");
            metrics::otp_events_total("two_factor", "issued");
            Ok(Json(LoginResponse::TwoFactorRequired { email }))
        }
        Err(e) => {
            record_login_failure(&e, &client);
            Err(e.into())
        }
    }
}

/// Complete a two-factor login with the mailed code
pub async fn verify_two_factor(
    State(state): State<AppState>,
    Extension(client): Extension<ClientInfo>,
    Json(payload): Json<TwoFactorRequest>,
) -> Result<Json<AuthenticatedSession>, ApiError> {
    let rule = state.auth.rate_limiter().rules().login;
    enforce_endpoint_limit(&state, "verify-2fa", &client, rule).await?;

    match state.auth.verify_two_factor(payload, &client).await {
        Ok(session) => {
            metrics::login_attempts_total("success");
            metrics::otp_events_total("two_factor", "verified");
            Ok(Json(session))
        }
        Err(e) => {
            if matches!(e, AuthError::OtpInvalid | AuthError::OtpExpired) {
                metrics::otp_events_total("two_factor", "rejected");
            }
            record_login_failure(&e, &client);
            Err(e.into())
        }
    }
}

/// Rotate a refresh token into a new pair.
///
/// The presented token is revoked; presenting it again yields `401`.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(client): Extension<ClientInfo>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthenticatedSession>, ApiError> {
    let rule = state.auth.rate_limiter().rules().refresh;
    enforce_endpoint_limit(&state, "refresh", &client, rule).await?;

    match state.auth.refresh(&payload.refresh_token, &client).await {
        Ok(session) => Ok(Json(session)),
        Err(AuthError::SessionRevoked) => {
            log_security_event(
                "refresh_replay",
                None,
                client.ip.as_deref(),
                "Revoked refresh token presented",
            );
            Err(AuthError::SessionRevoked.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Request a password reset link. Always answers with the same message.
pub async fn forgot_password(
    State(state): State<AppState>,
    Extension(client): Extension<ClientInfo>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let rule = state.auth.rate_limiter().rules().password_reset;
    enforce_endpoint_limit(&state, "forgot-password", &client, rule).await?;

    state.auth.request_password_reset(payload).await?;
    Ok(MessageResponse::accepted())
}

/// Set a new password with a reset token
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(client): Extension<ClientInfo>,
    Json(payload): Json<PasswordResetConfirm>,
) -> Result<Json<MessageResponse>, ApiError> {
    let rule = state.auth.rate_limiter().rules().password_reset;
    enforce_endpoint_limit(&state, "reset-password", &client, rule).await?;

    match state.auth.reset_password(payload).await {
        Ok(()) => {
            log_security_event(
                "password_reset",
                None,
                client.ip.as_deref(),
                "Password reset with token",
            );
            Ok(Json(MessageResponse {
                message: "Password has been reset".to_string(),
            }))
        }
        Err(e) => Err(e.into()),
    }
}

/// Send a one-time code for the given purpose
pub async fn send_otp(
    State(state): State<AppState>,
    Json(payload): Json<SendOtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let purpose = payload.purpose;
    match state.auth.send_otp(payload).await {
        Ok(()) => {
            metrics::otp_events_total(purpose.as_str(), "requested");
            Ok(MessageResponse::accepted())
        }
        Err(e) => {
            if matches!(e, AuthError::RateLimited { .. }) {
                metrics::rate_limit_hits_total("otp");
            }
            Err(e.into())
        }
    }
}

/// Consume a one-time code
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<VerifiedResponse>, ApiError> {
    let purpose = payload.purpose;
    match state.auth.verify_otp(payload).await {
        Ok(()) => {
            metrics::otp_events_total(purpose.as_str(), "verified");
            Ok(Json(VerifiedResponse { verified: true }))
        }
        Err(e) => {
            metrics::otp_events_total(purpose.as_str(), "rejected");
            Err(e.into())
        }
    }
}

/// Revoke the caller's current session
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentIdentity>,
) -> Result<StatusCode, ApiError> {
    state.auth.logout(identity.session_id).await?;
    metrics::sessions_revoked_total(1);
    tracing::info!(identity_id = %identity.id, session_id = %identity.session_id, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Change the caller's password. Every session, including this one, ends.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentIdentity>,
    Extension(client): Extension<ClientInfo>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    match state.auth.change_password(&identity, payload).await {
        Ok(()) => {
            log_security_event(
                "password_changed",
                Some(identity.id),
                client.ip.as_deref(),
                "Password changed, sessions revoked",
            );
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            if matches!(e, AuthError::InvalidCredentials) {
                log_security_event(
                    "failed_password_change",
                    Some(identity.id),
                    client.ip.as_deref(),
                    "Wrong current password",
                );
            }
            Err(e.into())
        }
    }
}

/// The authenticated caller with effective roles and permissions
pub async fn me(Extension(identity): Extension<CurrentIdentity>) -> Json<CurrentIdentity> {
    Json(identity)
}

/// Active sessions of the caller
pub async fn sessions(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentIdentity>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let records = state.auth.list_sessions(&identity).await?;
    let views = records
        .into_iter()
        .map(|record| SessionView {
            current: record.session_id == identity.session_id,
            session_id: record.session_id,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            ip_address: record.ip_address,
            user_agent: record.user_agent,
        })
        .collect();
    Ok(Json(views))
}

/// Revoke every session of the caller
pub async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentIdentity>,
) -> Result<StatusCode, ApiError> {
    let revoked = state.auth.revoke_all_sessions(identity.id).await?;
    metrics::sessions_revoked_total(revoked as u64);
    log_security_event(
        "sessions_revoked",
        Some(identity.id),
        None,
        &format!("{revoked} sessions revoked by owner"),
    );
    Ok(StatusCode::NO_CONTENT)
}
