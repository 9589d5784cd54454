//! HTTP API for the HR authentication service.
//!
//! # Architecture
//!
//! The API is built with:
//! - **Axum**: Async web framework
//! - **Tower**: Middleware for CORS, timeouts and the request gates
//! - **hr_auth**: All credential, session and permission decisions
//!
//! # Modules
//!
//! - [`auth`]: Login, two-factor, refresh, password and one-time code flows
//! - [`admin`]: Role assignment
//! - [`middleware`]: Client context, rate limiting and token gates
//! - [`error`]: Status mapping for auth errors
//!
//! # Endpoints Overview
//!
//! ## Public (rate-limited)
//! - `POST /api/v1/auth/login`
//! - `POST /api/v1/auth/verify-2fa`
//! - `POST /api/v1/auth/refresh`
//! - `POST /api/v1/auth/forgot-password`
//! - `POST /api/v1/auth/reset-password`
//! - `POST /api/v1/auth/send-otp`
//! - `POST /api/v1/auth/verify-otp`
//!
//! ## Token-gated
//! - `POST /api/v1/auth/logout`
//! - `POST /api/v1/auth/change-password`
//! - `GET /api/v1/auth/me`
//! - `GET|DELETE /api/v1/auth/sessions`
//!
//! ## Requires `roles.manage`
//! - `POST|DELETE /api/v1/admin/identities/{id}/roles`
//!
//! ## Health Check
//! - `GET /health`

pub mod admin;
pub mod auth;
pub mod error;
pub mod middleware;
pub mod request_id;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use hr_auth::AuthService;
use serde_json::json;
use sqlx::PgPool;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

/// Application state shared across all HTTP handlers.
///
/// - `auth`: the authentication service
/// - `pool`: database pool for health checks, absent with in-memory stores
/// - `trusted_proxies`: peers whose forwarding headers are believed
/// - `request_timeout`: outer bound on every request
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub pool: Option<PgPool>,
    pub trusted_proxies: Arc<Vec<IpAddr>>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(auth: AuthService, pool: Option<PgPool>) -> Self {
        Self {
            auth: Arc::new(auth),
            pool,
            trusted_proxies: Arc::new(Vec::new()),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = Arc::new(proxies);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use hr_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/verify-2fa", post(auth::verify_two_factor))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/send-otp", post(auth::send_otp))
        .route("/auth/verify-otp", post(auth::verify_otp));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/me", get(auth::me))
        .route(
            "/auth/sessions",
            get(auth::sessions).delete(auth::revoke_sessions),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Layers run outermost-last: the token gate runs before the permission gate
    let admin_routes = Router::new()
        .route(
            "/admin/identities/{id}/roles",
            post(admin::assign_role).delete(admin::remove_role),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_roles_manage,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::client_context_middleware,
        ))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the database answers (or no database is in use),
/// `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","version":"0.1.0","database":true,"timestamp":"2026-01-12T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = match &state.pool {
        Some(pool) => sqlx::query("SELECT 1").fetch_one(pool).await.is_ok(),
        None => true,
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
