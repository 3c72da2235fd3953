//! The relay gateway: validate, guard, shield, forward.

use crate::authorization::{now_secs, validate_at, TransferAuthorization, TransferPolicy};
use crate::metrics::METRICS;
use crate::nonce_guard::NonceGuard;
use crate::rate_limit::{from_key, ip_key, RateLimitCache};
use crate::upstream::{SubmitOutcome, SubmitResult, UpstreamClient};
use alloy::primitives::{Address, B256, U256};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, warn};

/// Inbound relay request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayRequest {
    pub authorization: AuthorizationPayload,
    /// 65-byte recoverable signature, `0x`-prefixed hex.
    pub signature: String,
}

/// Wire form of a transfer authorization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPayload {
    pub from: String,
    pub to: String,
    /// Decimal string, atomic token units.
    pub value: String,
    pub valid_after: u64,
    pub valid_before: u64,
    /// 32 bytes, `0x`-prefixed hex.
    pub nonce: String,
}

/// Validates inbound requests, consults the nonce guard, shields and
/// forwards to the upstream relayer. Owns its rate-limit cache; no hidden
/// globals, so isolated instances don't bleed state.
pub struct RelayGateway {
    policy: TransferPolicy,
    nonce_guard: NonceGuard,
    rate_cache: RateLimitCache,
    upstream: Option<UpstreamClient>,
}

impl RelayGateway {
    pub fn new(
        policy: TransferPolicy,
        nonce_guard: NonceGuard,
        upstream: Option<UpstreamClient>,
    ) -> Self {
        Self {
            policy,
            nonce_guard,
            rate_cache: RateLimitCache::new(),
            upstream,
        }
    }

    pub fn nonce_guard(&self) -> &NonceGuard {
        &self.nonce_guard
    }

    pub fn rate_cache(&self) -> &RateLimitCache {
        &self.rate_cache
    }

    pub fn upstream(&self) -> Option<&UpstreamClient> {
        self.upstream.as_ref()
    }

    /// Relay a signed authorization to the upstream relayer.
    ///
    /// The nonce is claimed only after the upstream confirms success: a
    /// failed or timed-out attempt never burns a nonce the caller may
    /// legitimately resubmit.
    pub async fn relay(
        &self,
        request: &RelayRequest,
        caller_ip: &str,
    ) -> Result<SubmitResult, crate::Error> {
        // Missing shared secret is a configuration failure, never an
        // unauthenticated forward.
        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| crate::Error::Config("upstream shared secret not configured".into()))?;

        // 1-2. Structural, policy, and signature-format validation with the
        // full violation list.
        let (auth, signature) = self.parse_and_validate(request)?;

        // 3. Local rate-limit pre-check by IP and by sender; an active
        // window rejects without contacting the upstream.
        let limit_keys = [ip_key(caller_ip), from_key(auth.from)];
        if let Some(wait) = self.rate_cache.remaining(&limit_keys) {
            METRICS.relay_rate_limited.fetch_add(1, Ordering::Relaxed);
            return Err(crate::Error::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            });
        }

        // Replay pre-check. Read-only: a claim here would burn the nonce
        // before the upstream ever saw the payload.
        if self.nonce_guard.is_used(auth.from, auth.nonce).await? {
            METRICS.relay_replays.fetch_add(1, Ordering::Relaxed);
            return Err(crate::Error::Replay);
        }

        // 4-6. Forward under the deadline and classify the outcome.
        match upstream.submit(&auth, &signature, caller_ip).await? {
            SubmitOutcome::RateLimited { retry_after_secs } => {
                self.rate_cache
                    .mark(&limit_keys, Duration::from_secs(retry_after_secs));
                METRICS.relay_rate_limited.fetch_add(1, Ordering::Relaxed);
                warn!(
                    from = %auth.from,
                    retry_after_secs,
                    "Upstream rate limited, window cached locally"
                );
                Err(crate::Error::RateLimited { retry_after_secs })
            }
            SubmitOutcome::Failed { status, message } => {
                Err(crate::Error::Upstream { status, message })
            }
            SubmitOutcome::Accepted(result) => {
                // 7. Claim the nonce only now that the upstream accepted.
                match self.nonce_guard.check_and_mark(auth.from, auth.nonce).await {
                    Ok(true) => {}
                    Ok(false) => {
                        // A concurrent submission of the same payload won the
                        // claim after both passed the pre-check. The upstream
                        // accepted this one too; on-chain single-use
                        // semantics are the final guard.
                        warn!(
                            from = %auth.from,
                            nonce = %auth.nonce,
                            "Nonce claimed concurrently by a duplicate submission"
                        );
                    }
                    Err(e) => {
                        // The transfer is already submitted; failing the call
                        // now would misreport it. Surface loudly instead.
                        warn!(error = %e, "Nonce claim failed after upstream success");
                    }
                }
                info!(from = %auth.from, id = %result.id, status = %result.status, "Relay accepted");
                Ok(result)
            }
        }
    }

    /// Steps 1-2: parse the wire form and collect **every** violation.
    fn parse_and_validate(
        &self,
        request: &RelayRequest,
    ) -> Result<(TransferAuthorization, String), crate::Error> {
        let mut reasons = Vec::new();
        let payload = &request.authorization;

        let from = parse_address(&payload.from, "from", &mut reasons);
        let to = parse_address(&payload.to, "to", &mut reasons);

        let value = match U256::from_str(&payload.value) {
            Ok(v) => Some(v),
            Err(_) => {
                reasons.push("value is not a valid unsigned integer".into());
                None
            }
        };

        let nonce = parse_nonce(&payload.nonce, &mut reasons);

        if let Some(sig_reason) = check_signature_format(&request.signature) {
            reasons.push(sig_reason);
        }

        if let (Some(from), Some(to), Some(value), Some(nonce)) = (from, to, value, nonce) {
            let auth = TransferAuthorization {
                from,
                to,
                value,
                valid_after: payload.valid_after,
                valid_before: payload.valid_before,
                nonce,
            };
            for error in validate_at(&auth, &self.policy, now_secs()) {
                reasons.push(error.to_string());
            }
            if reasons.is_empty() {
                return Ok((auth, request.signature.clone()));
            }
        }

        Err(crate::Error::Validation(reasons))
    }
}

fn parse_address(raw: &str, field: &str, reasons: &mut Vec<String>) -> Option<Address> {
    match Address::from_str(raw) {
        Ok(address) => Some(address),
        Err(_) => {
            reasons.push(format!("{field} is not a valid address"));
            None
        }
    }
}

fn parse_nonce(raw: &str, reasons: &mut Vec<String>) -> Option<B256> {
    let well_formed = raw
        .strip_prefix("0x")
        .map(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    if !well_formed {
        reasons.push("nonce must be 32 bytes of 0x-prefixed hex".into());
        return None;
    }
    B256::from_str(raw).ok()
}

/// A recoverable signature is 65 bytes: `0x` + 130 hex chars.
fn check_signature_format(raw: &str) -> Option<String> {
    let well_formed = raw
        .strip_prefix("0x")
        .map(|hex| hex.len() == 130 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    if well_formed {
        None
    } else {
        Some("signature must be 65 bytes of 0x-prefixed hex".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce_guard::NonceGuard;

    fn test_gateway() -> RelayGateway {
        RelayGateway::new(
            TransferPolicy::new(10, 1_000_000),
            NonceGuard::in_memory(Duration::from_secs(60), false),
            None,
        )
    }

    fn valid_request() -> RelayRequest {
        let now = now_secs();
        RelayRequest {
            authorization: AuthorizationPayload {
                from: format!("{:#x}", Address::repeat_byte(1)),
                to: format!("{:#x}", Address::repeat_byte(2)),
                value: "500".into(),
                valid_after: now - 10,
                valid_before: now + 600,
                nonce: format!("{:#x}", B256::repeat_byte(7)),
            },
            signature: format!("0x{}", "ab".repeat(65)),
        }
    }

    fn reasons(gateway: &RelayGateway, request: &RelayRequest) -> Vec<String> {
        match gateway.parse_and_validate(request) {
            Err(crate::Error::Validation(reasons)) => reasons,
            Ok(_) => Vec::new(),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_request_passes() {
        let gateway = test_gateway();
        let (auth, _) = gateway.parse_and_validate(&valid_request()).unwrap();
        assert_eq!(auth.value, U256::from(500));
    }

    #[test]
    fn test_malformed_fields_all_reported() {
        let gateway = test_gateway();
        let mut request = valid_request();
        request.authorization.from = "not-an-address".into();
        request.authorization.value = "12.5".into();
        request.authorization.nonce = "0x1234".into();
        request.signature = "0xdeadbeef".into();

        let reasons = reasons(&gateway, &request);
        assert_eq!(reasons.len(), 4);
        assert!(reasons.iter().any(|r| r.contains("from")));
        assert!(reasons.iter().any(|r| r.contains("value")));
        assert!(reasons.iter().any(|r| r.contains("nonce")));
        assert!(reasons.iter().any(|r| r.contains("signature")));
    }

    #[test]
    fn test_self_transfer_rejected() {
        let gateway = test_gateway();
        let mut request = valid_request();
        request.authorization.to = request.authorization.from.clone();
        let reasons = reasons(&gateway, &request);
        assert!(reasons.iter().any(|r| r.contains("distinct")));
    }

    #[test]
    fn test_bounds_have_distinct_messages() {
        let gateway = test_gateway();

        let mut low = valid_request();
        low.authorization.value = "5".into();
        let low_reasons = reasons(&gateway, &low);
        assert!(low_reasons.iter().any(|r| r.contains("below the minimum")));

        let mut high = valid_request();
        high.authorization.value = "2000000".into();
        let high_reasons = reasons(&gateway, &high);
        assert!(high_reasons.iter().any(|r| r.contains("above the maximum")));

        assert_ne!(low_reasons, high_reasons);
    }

    #[test]
    fn test_expired_window_rejected() {
        let gateway = test_gateway();
        let mut request = valid_request();
        request.authorization.valid_before = now_secs() - 10;
        request.authorization.valid_after = now_secs() - 600;
        let reasons = reasons(&gateway, &request);
        assert!(reasons.iter().any(|r| r.contains("expired")));
    }

    #[test]
    fn test_signature_without_prefix_rejected() {
        let gateway = test_gateway();
        let mut request = valid_request();
        request.signature = "ab".repeat(65);
        let reasons = reasons(&gateway, &request);
        assert_eq!(reasons, vec!["signature must be 65 bytes of 0x-prefixed hex"]);
    }

    #[tokio::test]
    async fn test_relay_without_secret_is_config_error() {
        let gateway = test_gateway();
        let err = gateway.relay(&valid_request(), "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[tokio::test]
    async fn test_rate_limited_caller_rejected_locally() {
        let gateway = RelayGateway::new(
            TransferPolicy::new(10, 1_000_000),
            NonceGuard::in_memory(Duration::from_secs(60), false),
            Some(
                UpstreamClient::new(
                    "http://127.0.0.1:1".into(),
                    "secret".into(),
                    Duration::from_secs(1),
                    crate::upstream::RetryPolicy::default(),
                    60,
                )
                .unwrap(),
            ),
        );

        // Simulate a previously cached upstream 429 for this caller.
        gateway
            .rate_cache
            .mark(&[ip_key("10.0.0.1")], Duration::from_secs(50));

        let err = gateway.relay(&valid_request(), "10.0.0.1").await.unwrap_err();
        match err {
            crate::Error::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs <= 50 && retry_after_secs >= 45);
            }
            other => panic!("expected rate limit, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_used_nonce_rejected_as_replay() {
        let gateway = RelayGateway::new(
            TransferPolicy::new(10, 1_000_000),
            NonceGuard::in_memory(Duration::from_secs(60), false),
            Some(
                UpstreamClient::new(
                    "http://127.0.0.1:1".into(),
                    "secret".into(),
                    Duration::from_secs(1),
                    crate::upstream::RetryPolicy::default(),
                    60,
                )
                .unwrap(),
            ),
        );

        let request = valid_request();
        gateway
            .nonce_guard
            .check_and_mark(Address::repeat_byte(1), B256::repeat_byte(7))
            .await
            .unwrap();

        let err = gateway.relay(&request, "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, crate::Error::Replay));
    }
}
