//! Request gates: client context and IP rate limit, token authentication,
//! and permission checks.
//!
//! Gates run in that order. Handlers behind the authentication gate extract
//! the caller with `Extension<CurrentIdentity>`:
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use hr_auth::CurrentIdentity;
//!
//! async fn protected_handler(Extension(identity): Extension<CurrentIdentity>) -> String {
//!     format!("Authenticated as {}", identity.email)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{ConnectInfo, Extension, Request, State},
    http::{HeaderMap, HeaderValue, header::AUTHORIZATION, header::USER_AGENT},
    middleware::Next,
    response::Response,
};
use hr_auth::{AuthError, CurrentIdentity, auth::ClientInfo};
use std::net::{IpAddr, SocketAddr};

use super::{AppState, error::ApiError, request_id::metric_path};
use crate::{logging::log_security_event, metrics};

/// Permission required by the role administration routes
pub const ROLES_MANAGE: &str = "roles.manage";

/// Resolve the client IP.
///
/// Forwarding headers are honoured only when the direct peer is a trusted
/// proxy. `X-Forwarded-For` is read from the right, skipping trusted proxies,
/// since only the entries our own proxies appended can be believed. The
/// first untrusted hop is the client. `X-Real-IP` is used when there is no
/// usable `X-Forwarded-For`.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted: &[IpAddr]) -> Option<IpAddr> {
    let peer = peer?;
    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .collect::<Vec<_>>();
    if !forwarded.is_empty() {
        for hop in forwarded.iter().rev() {
            match hop.parse::<IpAddr>() {
                Ok(ip) if trusted.contains(&ip) => continue,
                Ok(ip) => return Some(ip),
                // Anything left of a malformed hop is unverifiable
                Err(_) => return Some(peer),
            }
        }
        // Every hop was one of our proxies
        return Some(peer);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(Some(peer))
}

/// Attach [`ClientInfo`] to the request and enforce the per-IP limit.
pub async fn client_context_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let ip = client_ip(request.headers(), peer, &state.trusted_proxies);
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client = ClientInfo::new(ip.map(|ip| ip.to_string()), user_agent);

    let ip_key = client.ip.clone().unwrap_or_else(|| "unknown".to_string());
    let decision = state.auth.rate_limiter().check_ip(&ip_key).await?;
    if !decision.allowed {
        metrics::rate_limit_hits_total("ip");
        log_security_event("rate_limited", None, Some(&ip_key), "Per-IP limit exceeded");
        return Err(AuthError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into());
    }

    request.extensions_mut().insert(client);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    Ok(response)
}

/// Validate the bearer access token and attach the caller.
///
/// Expects `Authorization: Bearer <token>`. Missing or malformed headers
/// fail as an invalid token; revoked sessions fail as revoked.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AuthError::TokenInvalid)?;

    match state.auth.authenticate(token).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(AuthError::SessionRevoked) => {
            let ip = request
                .extensions()
                .get::<ClientInfo>()
                .and_then(|c| c.ip.clone());
            log_security_event(
                "revoked_token_used",
                None,
                ip.as_deref(),
                "Request with a revoked session",
            );
            Err(AuthError::SessionRevoked.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Allow only callers holding [`ROLES_MANAGE`]
pub async fn require_roles_manage(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentIdentity>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(e) = state.auth.require_permission(&identity, &[ROLES_MANAGE]) {
        metrics::permission_denials_total(&metric_path(request.uri().path()));
        log_security_event(
            "permission_denied",
            Some(identity.id),
            None,
            &format!("Missing {ROLES_MANAGE}"),
        );
        return Err(e.into());
    }
    Ok(next.run(request).await)
}
