//! # HR Auth
//!
//! Authentication and session security core for the HR platform.
//!
//! Business handlers (employees, attendance, payroll, leave) consume the two
//! outputs of this crate: an authenticated identity and its effective
//! permission set. Everything that decides those outputs lives here.
//!
//! ## Architecture
//!
//! Components, leaf-first:
//!
//! - **Credential store** ([`db`]): identity rows, lockout mirror, reset tokens
//! - **Password policy & hashing** ([`password`]): strength rules, Argon2id
//! - **OTP engine** ([`otp`]): short-lived numeric codes stored as hashes
//! - **Token issuer/validator** ([`tokens`]): signed access/refresh pairs
//! - **Session registry** ([`session`]): audit rows plus a revocation list
//! - **Login attempt governor** ([`lockout`]): consecutive-failure lockout
//! - **Rate limiter** ([`rate_limit`]): sliding-window limiter
//! - **Permission resolver** ([`permissions`]): roles to permission slugs
//!
//! [`auth::AuthService`] orchestrates them into the login, two-factor,
//! refresh, logout and password flows.
//!
//! ## Two-tier session model
//!
//! Signed tokens carry identity and authorization claims so the hot path
//! never reads a session table. Forced invalidation goes through a negative
//! cache of revoked session ids ([`session::SessionRegistry`]) whose entries
//! expire together with the refresh token they shadow. Both tiers are
//! required: without the revocation list a leaked token stays valid until
//! it expires.
//!
//! ## Example
//!
//! ```no_run
//! use hr_auth::{
//!     auth::{AuthService, ClientInfo, LoginOutcome, LoginRequest},
//!     cache::MemoryCache,
//!     config::AuthConfig,
//!     db::{Database, DatabaseConfig, PgCredentialStore, PgRoleStore, PgSessionStore},
//!     otp::NoopDispatcher,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::from_env()).await?;
//!     let pool = db.pool().clone();
//!
//!     let auth = AuthService::builder(AuthConfig::from_env()?)
//!         .cache(Arc::new(MemoryCache::new()))
//!         .credentials(Arc::new(PgCredentialStore::new(pool.clone())))
//!         .sessions(Arc::new(PgSessionStore::new(pool.clone())))
//!         .roles(Arc::new(PgRoleStore::new(pool)))
//!         .dispatcher(Arc::new(NoopDispatcher))
//!         .build()?;
//!
//!     let request = LoginRequest {
//!         email: "employee@example.com".to_string(),
//!         password: "Correct-Horse-9".to_string(),
//!     };
//!
//!     match auth.login(request, &ClientInfo::default()).await? {
//!         LoginOutcome::Authenticated(session) => {
//!             println!("session {}", session.tokens.session_id);
//!         }
//!         LoginOutcome::TwoFactorRequired { email } => {
//!             println!("code sent to {email}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod lockout;
pub mod otp;
pub mod password;
pub mod permissions;
pub mod rate_limit;
pub mod session;
pub mod tokens;

pub use auth::{AuthError, AuthResult, AuthService, CurrentIdentity};
pub use config::AuthConfig;
