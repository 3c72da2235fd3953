//! Application state shared across handlers.

use crate::authorization::TransferPolicy;
use crate::config::Config;
use crate::fleet::FleetMonitor;
use crate::gateway::RelayGateway;
use crate::nonce_guard::NonceGuard;
use crate::upstream::{RetryPolicy, UpstreamClient};
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};
use tracing::warn;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub gateway: RelayGateway,
    pub fleet: FleetMonitor,
    pub start_time: Instant,
    pub request_count: AtomicU64,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// The nonce store backend is selected here, once: a configured redis
    /// URL that fails to connect is a hard error, never a silent fall back
    /// to the in-memory variant.
    pub async fn new(config: Config) -> Result<Self, crate::Error> {
        let nonce_guard = match &config.redis_url {
            Some(url) => NonceGuard::connect_redis(url, config.nonce_ttl_secs).await?,
            None => NonceGuard::in_memory(
                Duration::from_secs(config.nonce_ttl_secs),
                config.is_production_like(),
            ),
        };

        let upstream = match &config.internal_secret {
            Some(secret) if !secret.is_empty() => Some(UpstreamClient::new(
                config.upstream_url.clone(),
                secret.clone(),
                Duration::from_millis(config.request_timeout_ms),
                RetryPolicy {
                    max_attempts: config.upstream_max_attempts,
                    base_delay_ms: config.upstream_retry_base_ms,
                    backoff_multiplier: config.upstream_backoff_multiplier,
                },
                config.rate_limit_fallback_secs,
            )?),
            _ => {
                warn!("internal_secret not set, /relay will answer 503 until configured");
                None
            }
        };

        let gateway = RelayGateway::new(
            TransferPolicy::new(config.min_transfer, config.max_transfer),
            nonce_guard,
            upstream,
        );
        let fleet = FleetMonitor::from_config(&config)?;

        Ok(Self {
            config,
            gateway,
            fleet,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        })
    }
}
