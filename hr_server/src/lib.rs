//! HTTP server for the HR platform authentication core.
//!
//! Wires [`hr_auth::AuthService`] to an Axum router, a shared cache backend,
//! outbound mail and Prometheus metrics.

pub mod api;
pub mod config;
pub mod logging;
pub mod mailer;
pub mod metrics;
