//! Prometheus metrics for the authentication surface.
//!
//! Metrics are exposed in Prometheus text format on a separate listener
//! when `METRICS_BIND` is set. Without an installed recorder every call
//! below is a no-op.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use hr_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/auth/login", 200);
//! metrics::login_attempts_total("success");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Auth Metrics
// ============================================================================

/// Increment login attempts counter, labelled by outcome
/// (`success`, `two_factor`, `invalid`, `locked`, `inactive`, `error`).
pub fn login_attempts_total(outcome: &str) {
    metrics::counter!("login_attempts_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Increment lockout rejections counter.
pub fn lockouts_total() {
    metrics::counter!("lockouts_total").increment(1);
}

/// Increment OTP events counter.
pub fn otp_events_total(purpose: &str, event: &str) {
    metrics::counter!("otp_events_total",
        "purpose" => purpose.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

/// Add revoked sessions.
pub fn sessions_revoked_total(count: u64) {
    metrics::counter!("sessions_revoked_total").increment(count);
}

/// Increment permission denials counter.
pub fn permission_denials_total(path: &str) {
    metrics::counter!("permission_denials_total",
        "path" => path.to_string()
    )
    .increment(1);
}

// ============================================================================
// Rate Limiting Metrics
// ============================================================================

/// Increment rate limit hits counter.
pub fn rate_limit_hits_total(scope: &str) {
    metrics::counter!("rate_limit_hits_total",
        "scope" => scope.to_string()
    )
    .increment(1);
}
