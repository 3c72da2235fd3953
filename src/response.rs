//! Response types for the gateway API.

use serde::Serialize;

/// Response from the health endpoint.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub nonce_backend: &'static str,
    pub upstream_configured: bool,
    pub fleet_wallets: usize,
    pub uptime_secs: u64,
    pub requests: u64,
}
