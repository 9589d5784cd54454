//! Structured logging configuration.
//!
//! Sets up `tracing-subscriber` with an env filter. Records emitted by the
//! auth core through the `log` facade are captured by the same subscriber.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use hr_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// Never pass passwords, codes or tokens in `message`.
///
/// # Example
///
/// ```
/// use hr_server::logging::log_security_event;
///
/// log_security_event(
///     "failed_login",
///     None,
///     Some("192.168.1.1"),
///     "Invalid credentials",
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    identity_id: Option<Uuid>,
    ip_address: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        identity_id = identity_id.map(|id| id.to_string()),
        ip_address = ip_address,
        "SECURITY: {}",
        message
    );
}

/// Log API request/response
pub fn log_api_request(method: &str, path: &str, status_code: u16, duration_ms: u64) {
    if duration_ms > 1000 {
        tracing::warn!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "Slow API request"
        );
    } else {
        tracing::info!(
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request completed"
        );
    }
}
