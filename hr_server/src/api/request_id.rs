//! Request correlation and HTTP metrics.
//!
//! Each request runs inside a `request` span carrying its id, so every log
//! line emitted while serving it (including auth library records) can be
//! correlated. The id comes from `x-request-id` when the caller sent a sane
//! one and is echoed on the response.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{logging::log_api_request, metrics};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

fn acceptable_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// The caller's id if acceptable, otherwise a fresh UUID
fn request_id_for(headers: &HeaderMap) -> String {
    match headers.get(REQUEST_ID_HEADER).map(HeaderValue::to_str) {
        Some(Ok(id)) if acceptable_id(id) => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Collapse id segments so metric labels stay bounded.
///
/// `/api/v1/admin/identities/<uuid>/roles` becomes
/// `/api/v1/admin/identities/{id}/roles`.
pub fn metric_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let id = request_id_for(request.headers());
    let method = request.method().clone();
    let path = metric_path(request.uri().path());
    let span = tracing::info_span!("request", request_id = %id, %method, %path);

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let elapsed = started.elapsed();

    // Only ids that passed acceptable_id or were generated reach here
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status().as_u16();
    metrics::http_requests_total(method.as_str(), &path, status);
    metrics::http_request_duration_ms(method.as_str(), &path, elapsed.as_secs_f64() * 1000.0);
    span.in_scope(|| log_api_request(method.as_str(), &path, status, elapsed.as_millis() as u64));

    response
}
