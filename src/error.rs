//! Error types for the relay gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;

/// Gateway error type.
///
/// The variants follow the error taxonomy of the service: structural and
/// policy violations are permanent and carry the full list of reasons,
/// replay is permanent and distinct from any transient failure, timeouts
/// and upstream failures are retryable by the caller, and configuration
/// errors surface as service-unavailable rather than degrading silently.
#[derive(Debug)]
pub enum Error {
    /// Missing or invalid service configuration (shared secret, keys).
    Config(String),
    /// Structural or policy validation failure. Carries every violated rule.
    Validation(Vec<String>),
    /// The authorization nonce was already claimed.
    Replay,
    /// Caller is inside a cached rate-limit window.
    RateLimited { retry_after_secs: u64 },
    /// The upstream relayer did not answer within the deadline.
    UpstreamTimeout,
    /// Non-success response from the upstream relayer.
    Upstream { status: u16, message: String },
    /// Nonce store communication error.
    Store(String),
    /// Signing failure.
    Signer(String),
    /// Chain RPC communication error (fleet monitor).
    Rpc(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Validation(reasons) => {
                write!(f, "validation failed: {}", reasons.join("; "))
            }
            Error::Replay => write!(f, "authorization nonce already used"),
            Error::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            Error::UpstreamTimeout => write!(f, "upstream relayer timed out"),
            Error::Upstream { status, message } => {
                write!(f, "upstream error ({status}): {message}")
            }
            Error::Store(msg) => write!(f, "nonce store error: {msg}"),
            Error::Signer(msg) => write!(f, "signer error: {msg}"),
            Error::Rpc(msg) => write!(f, "rpc error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Validation(reasons) => {
                let body = serde_json::json!({
                    "error": "validation failed",
                    "reasons": reasons,
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Error::Replay => {
                let body = serde_json::json!({
                    "error": "authorization nonce already used",
                });
                (StatusCode::CONFLICT, Json(body)).into_response()
            }
            Error::RateLimited { retry_after_secs } => {
                let body = serde_json::json!({
                    "error": "rate limited",
                    "retryAfter": retry_after_secs,
                });
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("Retry-After", retry_after_secs.to_string())],
                    Json(body),
                )
                    .into_response()
            }
            Error::UpstreamTimeout => {
                let body = serde_json::json!({ "error": "upstream relayer timed out" });
                (StatusCode::GATEWAY_TIMEOUT, Json(body)).into_response()
            }
            Error::Upstream { status, message } => {
                let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                let body = serde_json::json!({ "error": message });
                (code, Json(body)).into_response()
            }
            Error::Config(_) => {
                let body = serde_json::json!({ "error": "relayer not configured" });
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
            Error::Store(_) | Error::Rpc(_) => {
                let body = serde_json::json!({ "error": self.to_string() });
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
            Error::Signer(_) => {
                let body = serde_json::json!({ "error": self.to_string() });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
