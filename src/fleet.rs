//! Relayer fleet monitor for the self-funded execution fallback.
//!
//! Tracks native and token balances of the wallets that pay gas directly,
//! fires webhook alerts when they run low, and selects a wallet under the
//! configured rotation strategy. Independent of the relay request path.

use crate::authorization::now_secs;
use crate::config::{Config, RotationStrategy, WalletKeyConfig};
use crate::metrics::METRICS;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

alloy::sol! {
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }
}

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Low-balance thresholds: native gas in wei, token in atomic units.
#[derive(Debug, Clone, Copy)]
pub struct WalletThresholds {
    pub native_low: U256,
    pub token_low: U256,
}

/// A self-funded relayer wallet.
pub struct RelayerWallet {
    pub signer: PrivateKeySigner,
    pub label: String,
}

impl RelayerWallet {
    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

/// Point-in-time wallet status. Recomputed on each poll, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerWalletStatus {
    pub address: Address,
    pub label: String,
    pub native_balance: U256,
    pub token_balance: U256,
    pub low_native_balance: bool,
    pub low_token_balance: bool,
    pub estimated_txs_remaining: u64,
    pub checked_at: u64,
}

/// Monitors and rotates the relayer wallet fleet.
pub struct FleetMonitor {
    wallets: Vec<RelayerWallet>,
    provider: Arc<RootProvider>,
    token: Address,
    thresholds: WalletThresholds,
    gas_per_tx: u64,
    strategy: RotationStrategy,
    /// Rotation cursor, owned by this instance rather than a process-wide
    /// global.
    next: AtomicU64,
    http: reqwest::Client,
    webhook_url: Option<String>,
    alerts_enabled: bool,
}

impl FleetMonitor {
    /// Build the monitor from configuration. Invalid wallet keys are
    /// skipped with a warning rather than failing the whole rotation set;
    /// `RELAYER_KEYS_JSON` overrides the config file list when set.
    pub fn from_config(config: &Config) -> Result<Self, crate::Error> {
        let key_configs = match std::env::var("RELAYER_KEYS_JSON") {
            Ok(json) if !json.is_empty() => serde_json::from_str::<Vec<WalletKeyConfig>>(&json)
                .map_err(|e| crate::Error::Config(format!("invalid RELAYER_KEYS_JSON: {e}")))?,
            _ => config.relayer_keys.clone(),
        };

        let wallets = parse_wallets(&key_configs);
        if !key_configs.is_empty() {
            info!(
                wallets = wallets.len(),
                skipped = key_configs.len() - wallets.len(),
                strategy = ?config.rotation_strategy,
                "Fleet monitor initialized"
            );
        }

        let url = config
            .rpc_url
            .parse()
            .map_err(|e| crate::Error::Config(format!("invalid rpc_url: {e}")))?;
        let token = config
            .token_address
            .parse()
            .map_err(|e| crate::Error::Config(format!("invalid token_address: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| crate::Error::Config(format!("http client build failed: {e}")))?;

        Ok(Self {
            wallets,
            provider: Arc::new(RootProvider::new_http(url)),
            token,
            thresholds: WalletThresholds {
                native_low: U256::from(config.native_low_threshold),
                token_low: U256::from(config.token_low_threshold),
            },
            gas_per_tx: config.gas_per_tx,
            strategy: config.rotation_strategy,
            next: AtomicU64::new(0),
            http,
            webhook_url: config.alert_webhook_url.clone(),
            alerts_enabled: config.alerts_enabled,
        })
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    pub fn wallets(&self) -> &[RelayerWallet] {
        &self.wallets
    }

    // --- Status ---

    /// Read live balances and derive the wallet's status.
    pub async fn wallet_status(
        &self,
        wallet: &RelayerWallet,
    ) -> Result<RelayerWalletStatus, crate::Error> {
        let address = wallet.address();
        let native_balance = self
            .provider
            .get_balance(address)
            .await
            .map_err(|e| crate::Error::Rpc(format!("balance query failed: {e}")))?;
        let token_balance = self.token_balance(address).await?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| crate::Error::Rpc(format!("gas price query failed: {e}")))?;

        Ok(derive_status(
            address,
            wallet.label.clone(),
            native_balance,
            token_balance,
            gas_price,
            self.gas_per_tx,
            &self.thresholds,
            now_secs(),
        ))
    }

    async fn token_balance(&self, owner: Address) -> Result<U256, crate::Error> {
        let data = IERC20::balanceOfCall { account: owner }.abi_encode();
        let request = TransactionRequest::default()
            .with_to(self.token)
            .with_input(Bytes::from(data));
        let output = self
            .provider
            .call(request)
            .await
            .map_err(|e| crate::Error::Rpc(format!("token balance query failed: {e}")))?;
        Ok(U256::from_be_slice(&output))
    }

    // --- Alerting ---

    /// Poll every wallet and alert on low balances. Healthy wallets never
    /// alert; sending is fire-and-forget.
    pub async fn check_and_alert(&self) -> Result<(), crate::Error> {
        for wallet in &self.wallets {
            let status = match self.wallet_status(wallet).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(wallet = %wallet.address(), error = %e, "Wallet status read failed");
                    continue;
                }
            };

            if status.low_native_balance || status.low_token_balance {
                warn!(
                    wallet = %status.address,
                    label = %status.label,
                    native = %status.native_balance,
                    token = %status.token_balance,
                    remaining_txs = status.estimated_txs_remaining,
                    "Relayer wallet balance low"
                );
            }

            let Some(severity) = alert_severity(&status) else {
                continue;
            };
            let Some(url) = self.webhook_url.as_ref().filter(|_| self.alerts_enabled) else {
                continue;
            };

            let payload = serde_json::json!({
                "severity": severity,
                "wallet": format!("{:#x}", status.address),
                "label": status.label,
                "conditions": alert_conditions(&status),
                "nativeBalance": status.native_balance.to_string(),
                "tokenBalance": status.token_balance.to_string(),
                "estimatedTxsRemaining": status.estimated_txs_remaining,
                "checkedAt": status.checked_at,
            });

            match self.http.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    METRICS.alerts_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(response) => {
                    error!(status = %response.status(), "Alert webhook rejected payload");
                }
                Err(e) => {
                    error!(error = %e, "Alert webhook unreachable");
                }
            }
        }
        Ok(())
    }

    /// Run `check_and_alert` on a timer until cancelled.
    pub async fn run_poller(&self, interval: Duration, cancel: CancellationToken) {
        if self.wallets.is_empty() {
            info!("No relayer wallets configured, fleet poller idle");
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Fleet poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_alert().await {
                        warn!(error = %e, "Fleet poll failed");
                    }
                }
            }
        }
    }

    // --- Rotation ---

    /// Choose a wallet under the configured strategy.
    pub async fn select_wallet(&self) -> Result<&RelayerWallet, crate::Error> {
        if self.wallets.is_empty() {
            return Err(crate::Error::Config("no relayer wallets configured".into()));
        }
        match self.strategy {
            RotationStrategy::RoundRobin => Ok(self.select_round_robin()),
            RotationStrategy::HighestBalance => self.select_highest_balance().await,
            RotationStrategy::LowestNonce => {
                // No live on-chain nonce inspection yet; behaves as
                // round-robin.
                warn!("lowest-nonce rotation not implemented, using round-robin");
                Ok(self.select_round_robin())
            }
        }
    }

    fn select_round_robin(&self) -> &RelayerWallet {
        let index = self.next.fetch_add(1, Ordering::Relaxed) as usize;
        &self.wallets[index % self.wallets.len()]
    }

    /// Fetch live native balances in parallel and pick the richest wallet.
    /// Ties break stably toward the earlier configured wallet; wallets
    /// whose balance read fails are skipped.
    async fn select_highest_balance(&self) -> Result<&RelayerWallet, crate::Error> {
        let mut reads = tokio::task::JoinSet::new();
        for (index, wallet) in self.wallets.iter().enumerate() {
            let provider = Arc::clone(&self.provider);
            let address = wallet.address();
            reads.spawn(async move { (index, provider.get_balance(address).await) });
        }

        let mut balances: Vec<Option<U256>> = vec![None; self.wallets.len()];
        while let Some(joined) = reads.join_next().await {
            let Ok((index, result)) = joined else { continue };
            match result {
                Ok(balance) => balances[index] = Some(balance),
                Err(e) => {
                    warn!(wallet = %self.wallets[index].address(), error = %e, "Balance read failed, wallet skipped");
                }
            }
        }

        let mut best: Option<(usize, U256)> = None;
        for (index, balance) in balances.iter().enumerate() {
            if let Some(balance) = balance {
                if best.map_or(true, |(_, b)| *balance > b) {
                    best = Some((index, *balance));
                }
            }
        }

        match best {
            Some((index, _)) => Ok(&self.wallets[index]),
            None => {
                warn!("All balance reads failed, falling back to round-robin");
                Ok(self.select_round_robin())
            }
        }
    }
}

/// Parse wallet keys, skipping invalid ones with a warning.
fn parse_wallets(configs: &[WalletKeyConfig]) -> Vec<RelayerWallet> {
    let mut wallets = Vec::with_capacity(configs.len());
    for (index, key_config) in configs.iter().enumerate() {
        let label = key_config
            .label
            .clone()
            .unwrap_or_else(|| format!("relayer-{index}"));
        match key_config.private_key.parse::<PrivateKeySigner>() {
            Ok(signer) => wallets.push(RelayerWallet { signer, label }),
            Err(e) => {
                warn!(label = %label, error = %e, "Invalid relayer key skipped");
            }
        }
    }
    wallets
}

/// Derive a wallet status from raw balance reads.
#[allow(clippy::too_many_arguments)]
fn derive_status(
    address: Address,
    label: String,
    native_balance: U256,
    token_balance: U256,
    gas_price: u128,
    gas_per_tx: u64,
    thresholds: &WalletThresholds,
    checked_at: u64,
) -> RelayerWalletStatus {
    RelayerWalletStatus {
        address,
        label,
        native_balance,
        token_balance,
        low_native_balance: native_balance < thresholds.native_low,
        low_token_balance: token_balance < thresholds.token_low,
        estimated_txs_remaining: estimate_remaining(native_balance, gas_per_tx, gas_price),
        checked_at,
    }
}

/// `floor(native / (gas_per_tx * gas_price))`, floored at 0.
pub fn estimate_remaining(native_balance: U256, gas_per_tx: u64, gas_price: u128) -> u64 {
    let cost = U256::from(gas_per_tx) * U256::from(gas_price);
    if cost.is_zero() {
        return 0;
    }
    (native_balance / cost).min(U256::from(u64::MAX)).to::<u64>()
}

/// `critical` when both balances are low, `warning` for one, none when
/// healthy.
fn alert_severity(status: &RelayerWalletStatus) -> Option<&'static str> {
    match (status.low_native_balance, status.low_token_balance) {
        (true, true) => Some("critical"),
        (true, false) | (false, true) => Some("warning"),
        (false, false) => None,
    }
}

fn alert_conditions(status: &RelayerWalletStatus) -> Vec<&'static str> {
    let mut conditions = Vec::new();
    if status.low_native_balance {
        conditions.push("low_native_balance");
    }
    if status.low_token_balance {
        conditions.push("low_token_balance");
    }
    conditions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_thresholds() -> WalletThresholds {
        WalletThresholds {
            native_low: U256::from(1_000_000u64),
            token_low: U256::from(500u64),
        }
    }

    fn status(native: u64, token: u64) -> RelayerWalletStatus {
        derive_status(
            Address::repeat_byte(1),
            "test".into(),
            U256::from(native),
            U256::from(token),
            10,
            100,
            &test_thresholds(),
            0,
        )
    }

    fn test_monitor(wallet_count: usize, strategy: RotationStrategy) -> FleetMonitor {
        let wallets = (0..wallet_count)
            .map(|index| RelayerWallet {
                signer: PrivateKeySigner::random(),
                label: format!("relayer-{index}"),
            })
            .collect();
        FleetMonitor {
            wallets,
            provider: Arc::new(RootProvider::new_http("http://127.0.0.1:1".parse().unwrap())),
            token: Address::repeat_byte(0xee),
            thresholds: test_thresholds(),
            gas_per_tx: 100,
            strategy,
            next: AtomicU64::new(0),
            http: reqwest::Client::new(),
            webhook_url: None,
            alerts_enabled: false,
        }
    }

    #[test]
    fn test_low_native_only_is_warning_not_critical() {
        let s = status(500, 10_000);
        assert!(s.low_native_balance);
        assert!(!s.low_token_balance);
        assert_eq!(alert_severity(&s), Some("warning"));
        assert_eq!(alert_conditions(&s), vec!["low_native_balance"]);
    }

    #[test]
    fn test_both_low_is_critical() {
        let s = status(500, 100);
        assert_eq!(alert_severity(&s), Some("critical"));
        assert_eq!(
            alert_conditions(&s),
            vec!["low_native_balance", "low_token_balance"]
        );
    }

    #[test]
    fn test_healthy_never_alerts() {
        let s = status(2_000_000, 10_000);
        assert_eq!(alert_severity(&s), None);
        assert!(alert_conditions(&s).is_empty());
    }

    #[test]
    fn test_estimate_zero_balance_is_zero() {
        assert_eq!(estimate_remaining(U256::ZERO, 100, 10), 0);
    }

    #[test]
    fn test_estimate_floors_fraction() {
        // cost per tx = 1000; 2500 wei funds exactly 2 transactions.
        assert_eq!(estimate_remaining(U256::from(2_500u64), 100, 10), 2);
        assert_eq!(estimate_remaining(U256::from(999u64), 100, 10), 0);
    }

    #[test]
    fn test_estimate_non_increasing_as_balance_decreases() {
        let mut previous = u64::MAX;
        for balance in (0..=10_000u64).rev().step_by(250) {
            let estimate = estimate_remaining(U256::from(balance), 100, 10);
            assert!(estimate <= previous);
            previous = estimate;
        }
    }

    #[test]
    fn test_estimate_zero_gas_cost_is_zero() {
        assert_eq!(estimate_remaining(U256::from(1_000u64), 0, 10), 0);
        assert_eq!(estimate_remaining(U256::from(1_000u64), 100, 0), 0);
    }

    #[tokio::test]
    async fn test_round_robin_cycles_in_order() {
        let monitor = test_monitor(2, RotationStrategy::RoundRobin);
        let first = monitor.select_wallet().await.unwrap().address();
        let second = monitor.select_wallet().await.unwrap().address();
        let third = monitor.select_wallet().await.unwrap().address();

        assert_eq!(first, monitor.wallets[0].address());
        assert_eq!(second, monitor.wallets[1].address());
        assert_eq!(third, monitor.wallets[0].address());
    }

    #[tokio::test]
    async fn test_lowest_nonce_behaves_as_round_robin() {
        let monitor = test_monitor(2, RotationStrategy::LowestNonce);
        let first = monitor.select_wallet().await.unwrap().address();
        let second = monitor.select_wallet().await.unwrap().address();
        assert_eq!(first, monitor.wallets[0].address());
        assert_eq!(second, monitor.wallets[1].address());
    }

    #[tokio::test]
    async fn test_select_with_no_wallets_errors() {
        let monitor = test_monitor(0, RotationStrategy::RoundRobin);
        assert!(monitor.select_wallet().await.is_err());
    }

    #[test]
    fn test_invalid_keys_skipped() {
        let configs = vec![
            WalletKeyConfig {
                private_key: format!("0x{}", "11".repeat(32)),
                label: Some("good".into()),
            },
            WalletKeyConfig {
                private_key: "not-a-key".into(),
                label: Some("bad".into()),
            },
        ];
        let wallets = parse_wallets(&configs);
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].label, "good");
    }

    #[test]
    fn test_unlabeled_keys_get_indexed_labels() {
        let configs = vec![WalletKeyConfig {
            private_key: format!("0x{}", "22".repeat(32)),
            label: None,
        }];
        let wallets = parse_wallets(&configs);
        assert_eq!(wallets[0].label, "relayer-0");
    }
}
