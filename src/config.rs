//! Relayer configuration.

use serde::Deserialize;

/// Wallet rotation strategy for the self-funded execution fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    RoundRobin,
    HighestBalance,
    /// Currently equivalent to round-robin: no live on-chain nonce
    /// inspection is implemented.
    LowestNonce,
}

/// A self-funded relayer wallet key with an optional display label.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletKeyConfig {
    pub private_key: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Configuration for the relay gateway and fleet monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    /// Base URL of the upstream relayer service.
    #[serde(default = "defaults::upstream_url")]
    pub upstream_url: String,

    /// Shared secret for the upstream relayer. Absent means the relay
    /// surface answers 503; it is never downgraded to an unauthenticated
    /// call.
    #[serde(default)]
    pub internal_secret: Option<String>,

    /// Deadline for a single upstream call, in milliseconds.
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Transfer policy bounds, in atomic token units.
    #[serde(default = "defaults::min_transfer")]
    pub min_transfer: u128,
    #[serde(default = "defaults::max_transfer")]
    pub max_transfer: u128,

    /// Default authorization validity window, in seconds.
    #[serde(default = "defaults::validity_period_secs")]
    pub validity_period_secs: u64,

    /// Nonce claim lifetime, in seconds.
    #[serde(default = "defaults::nonce_ttl_secs")]
    pub nonce_ttl_secs: u64,

    /// Rate-limit window used when the upstream 429 carries no reset time.
    #[serde(default = "defaults::rate_limit_fallback_secs")]
    pub rate_limit_fallback_secs: u64,

    /// Shared nonce store. Absent selects the in-memory fallback, which is
    /// unsafe across multiple service instances.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "defaults::environment")]
    pub environment: String,

    // --- EIP-712 domain ---
    #[serde(default = "defaults::domain_name")]
    pub domain_name: String,
    #[serde(default = "defaults::domain_version")]
    pub domain_version: String,
    #[serde(default = "defaults::chain_id")]
    pub chain_id: u64,
    #[serde(default = "defaults::verifying_contract")]
    pub verifying_contract: String,

    // --- Fleet monitor ---
    #[serde(default = "defaults::rpc_url")]
    pub rpc_url: String,
    #[serde(default = "defaults::token_address")]
    pub token_address: String,
    #[serde(default)]
    pub relayer_keys: Vec<WalletKeyConfig>,
    #[serde(default = "defaults::rotation_strategy")]
    pub rotation_strategy: RotationStrategy,
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
    #[serde(default = "defaults::alerts_enabled")]
    pub alerts_enabled: bool,
    /// Low-balance thresholds: native gas in wei, token in atomic units.
    #[serde(default = "defaults::native_low_threshold")]
    pub native_low_threshold: u128,
    #[serde(default = "defaults::token_low_threshold")]
    pub token_low_threshold: u128,
    /// Gas units consumed by one transfer submission.
    #[serde(default = "defaults::gas_per_tx")]
    pub gas_per_tx: u64,
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,

    // --- Upstream retry policy ---
    #[serde(default = "defaults::upstream_max_attempts")]
    pub upstream_max_attempts: u32,
    #[serde(default = "defaults::upstream_retry_base_ms")]
    pub upstream_retry_base_ms: u64,
    #[serde(default = "defaults::upstream_backoff_multiplier")]
    pub upstream_backoff_multiplier: u32,
}

impl Config {
    /// True when running in a production-like environment, where the
    /// in-memory nonce fallback must warn loudly.
    pub fn is_production_like(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "staging")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: defaults::bind_address(),
            upstream_url: defaults::upstream_url(),
            internal_secret: None,
            request_timeout_ms: defaults::request_timeout_ms(),
            min_transfer: defaults::min_transfer(),
            max_transfer: defaults::max_transfer(),
            validity_period_secs: defaults::validity_period_secs(),
            nonce_ttl_secs: defaults::nonce_ttl_secs(),
            rate_limit_fallback_secs: defaults::rate_limit_fallback_secs(),
            redis_url: None,
            environment: defaults::environment(),
            domain_name: defaults::domain_name(),
            domain_version: defaults::domain_version(),
            chain_id: defaults::chain_id(),
            verifying_contract: defaults::verifying_contract(),
            rpc_url: defaults::rpc_url(),
            token_address: defaults::token_address(),
            relayer_keys: Vec::new(),
            rotation_strategy: defaults::rotation_strategy(),
            alert_webhook_url: None,
            alerts_enabled: defaults::alerts_enabled(),
            native_low_threshold: defaults::native_low_threshold(),
            token_low_threshold: defaults::token_low_threshold(),
            gas_per_tx: defaults::gas_per_tx(),
            poll_interval_secs: defaults::poll_interval_secs(),
            upstream_max_attempts: defaults::upstream_max_attempts(),
            upstream_retry_base_ms: defaults::upstream_retry_base_ms(),
            upstream_backoff_multiplier: defaults::upstream_backoff_multiplier(),
        }
    }
}

mod defaults {
    use super::RotationStrategy;

    pub fn bind_address() -> String {
        "0.0.0.0:3050".into()
    }

    pub fn upstream_url() -> String {
        "http://127.0.0.1:4020".into()
    }

    pub fn request_timeout_ms() -> u64 {
        30_000
    }

    pub fn min_transfer() -> u128 {
        1
    }

    /// 10,000 tokens at 6 decimals.
    pub fn max_transfer() -> u128 {
        10_000_000_000
    }

    pub fn validity_period_secs() -> u64 {
        600
    }

    pub fn nonce_ttl_secs() -> u64 {
        86_400
    }

    pub fn rate_limit_fallback_secs() -> u64 {
        60
    }

    pub fn environment() -> String {
        std::env::var("RELAYER_ENVIRONMENT").unwrap_or_else(|_| "development".into())
    }

    pub fn domain_name() -> String {
        "USD Coin".into()
    }

    pub fn domain_version() -> String {
        "2".into()
    }

    pub fn chain_id() -> u64 {
        1
    }

    pub fn verifying_contract() -> String {
        // USDC mainnet
        "0xA0b86991c6218b36c1d19D4a2e9eb0cE3606eB48".into()
    }

    pub fn rpc_url() -> String {
        if let Ok(url) = std::env::var("RELAYER_RPC_URL") {
            if !url.is_empty() {
                return url;
            }
        }
        "https://eth.llamarpc.com".into()
    }

    pub fn token_address() -> String {
        verifying_contract()
    }

    pub fn rotation_strategy() -> RotationStrategy {
        RotationStrategy::RoundRobin
    }

    pub fn alerts_enabled() -> bool {
        true
    }

    /// 0.05 ETH in wei.
    pub fn native_low_threshold() -> u128 {
        50_000_000_000_000_000
    }

    /// 100 tokens at 6 decimals.
    pub fn token_low_threshold() -> u128 {
        100_000_000
    }

    pub fn gas_per_tx() -> u64 {
        90_000
    }

    pub fn poll_interval_secs() -> u64 {
        300
    }

    pub fn upstream_max_attempts() -> u32 {
        3
    }

    pub fn upstream_retry_base_ms() -> u64 {
        250
    }

    pub fn upstream_backoff_multiplier() -> u32 {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.validity_period_secs, 600);
        assert_eq!(config.nonce_ttl_secs, 86_400);
        assert_eq!(config.rotation_strategy, RotationStrategy::RoundRobin);
        assert!(config.internal_secret.is_none());
        assert!(config.redis_url.is_none());
        assert!(config.min_transfer < config.max_transfer);
    }

    #[test]
    fn test_rotation_strategy_kebab_case() {
        let s: RotationStrategy = serde_json::from_str("\"highest-balance\"").unwrap();
        assert_eq!(s, RotationStrategy::HighestBalance);
        let s: RotationStrategy = serde_json::from_str("\"lowest-nonce\"").unwrap();
        assert_eq!(s, RotationStrategy::LowestNonce);
    }

    #[test]
    fn test_production_like() {
        let mut config = Config::default();
        assert!(!config.is_production_like());
        config.environment = "production".into();
        assert!(config.is_production_like());
    }
}
