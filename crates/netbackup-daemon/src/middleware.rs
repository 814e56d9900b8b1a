// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request-scoped middleware for the dispatch endpoint.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestId middleware
// ---------------------------------------------------------------------------

/// A unique request identifier, available as an Axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Stamps every request with a [`RequestId`] and echoes it back as the
/// `x-request-id` response header, so a worker-reported failure can be
/// correlated with the controller log line that served it.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&id.0.to_string()).expect("uuid is valid header value"),
    );
    resp
}

// ---------------------------------------------------------------------------
// RequestLogger
// ---------------------------------------------------------------------------

/// Logs method, path, status, and duration for every request.
pub struct RequestLogger;

impl RequestLogger {
    /// Axum-compatible middleware function.
    pub async fn layer(req: Request, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let start = Instant::now();

        let resp = next.run(req).await;

        let duration = start.elapsed();
        let status = resp.status().as_u16();
        info!(
            %method,
            %path,
            status,
            duration_ms = duration.as_millis() as u64,
            "request handled"
        );
        resp
    }
}
