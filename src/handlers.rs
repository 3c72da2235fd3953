//! HTTP request handlers.

use crate::gateway::RelayRequest;
use crate::metrics::METRICS;
use crate::middleware::RequestId;
use crate::response::HealthResponse;
use crate::state::AppState;
use axum::extract::{ConnectInfo, FromRequest, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Validate and forward a signed transfer authorization.
pub async fn relay(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request_parts: axum::extract::Request,
) -> Response {
    let start = Instant::now();
    METRICS.relay_total.fetch_add(1, Ordering::Relaxed);
    state.request_count.fetch_add(1, Ordering::Relaxed);

    // Extract correlation ID (set by middleware).
    let req_id = request_parts
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    let caller_ip = client_ip(request_parts.headers(), peer);

    let request: RelayRequest =
        match Json::<RelayRequest>::from_request(request_parts, &state).await {
            Ok(Json(r)) => r,
            Err(e) => {
                METRICS.relay_error.fetch_add(1, Ordering::Relaxed);
                warn!(req_id = %req_id, error = %e, "Invalid JSON body");
                let body = serde_json::json!({
                    "error": "validation failed",
                    "reasons": [format!("invalid request body: {e}")],
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
        };

    match state.gateway.relay(&request, &caller_ip).await {
        Ok(result) => {
            METRICS.relay_success.fetch_add(1, Ordering::Relaxed);
            METRICS.record_relay_duration(start);
            info!(req_id = %req_id, id = %result.id, "Relay forwarded");
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            METRICS.relay_error.fetch_add(1, Ordering::Relaxed);
            if matches!(e, crate::Error::UpstreamTimeout) {
                METRICS.upstream_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            METRICS.record_relay_duration(start);
            warn!(req_id = %req_id, error = %e, "Relay rejected");
            e.into_response()
        }
    }
}

/// Poll submission status from the upstream relayer. `GET /status/{id}`
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::upstream::SubmitResult>, crate::Error> {
    let upstream = state
        .gateway
        .upstream()
        .ok_or_else(|| crate::Error::Config("upstream shared secret not configured".into()))?;
    let result = upstream.status(&id).await?;
    Ok(Json(result))
}

/// Health check with backend and counter details.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let upstream_configured = state.gateway.upstream().is_some();
    Json(HealthResponse {
        status: if upstream_configured { "ok" } else { "unconfigured" },
        nonce_backend: state.gateway.nonce_guard().backend(),
        upstream_configured,
        fleet_wallets: state.fleet.wallet_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        requests: state.request_count.load(Ordering::Relaxed),
    })
}

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = METRICS.render(
        state.gateway.rate_cache().len(),
        state.fleet.wallet_count(),
    );
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

/// Caller identity: forwarded headers first, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }
    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.9:4242".parse().unwrap()
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, peer()), "198.51.100.2");
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "192.0.2.9");
    }
}
