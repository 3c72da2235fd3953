//! HTTP client for the upstream relayer service.
//!
//! Outbound calls carry the shared secret and the end user's IP, run under
//! an explicit per-call deadline, and retry transient failures under an
//! explicit policy. A 429 from the upstream is never retried here; it is
//! surfaced so the gateway can cache the window locally.

use crate::authorization::{now_secs, TransferAuthorization};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry policy for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry attempt (1-based), with jitter up to
    /// half the base delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .base_delay_ms
            .saturating_mul(u64::from(self.backoff_multiplier).saturating_pow(attempt - 1));
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

/// Submission record from the upstream relayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub id: String,
    /// One of `queued`, `pending`, `submitted`, `confirmed`, `failed`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a submission attempt, before the gateway maps it to a
/// response.
#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted(SubmitResult),
    RateLimited { retry_after_secs: u64 },
    Failed { status: u16, message: String },
}

/// Client for the upstream relayer wire protocol.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    timeout: Duration,
    retry: RetryPolicy,
    rate_limit_fallback_secs: u64,
}

impl UpstreamClient {
    pub fn new(
        base_url: String,
        secret: String,
        timeout: Duration,
        retry: RetryPolicy,
        rate_limit_fallback_secs: u64,
    ) -> Result<Self, crate::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| crate::Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            timeout,
            retry,
            rate_limit_fallback_secs,
        })
    }

    /// Submit a signed authorization. Bounded by the configured deadline;
    /// hitting it returns the distinct timeout error, not a generic
    /// failure. Transient failures (network, 5xx) retry under the policy
    /// inside the same deadline.
    pub async fn submit(
        &self,
        auth: &TransferAuthorization,
        signature: &str,
        user_ip: &str,
    ) -> Result<SubmitOutcome, crate::Error> {
        match tokio::time::timeout(self.timeout, self.submit_inner(auth, signature, user_ip)).await
        {
            Ok(result) => result,
            Err(_) => Err(crate::Error::UpstreamTimeout),
        }
    }

    async fn submit_inner(
        &self,
        auth: &TransferAuthorization,
        signature: &str,
        user_ip: &str,
    ) -> Result<SubmitOutcome, crate::Error> {
        let url = format!("{}/submit", self.base_url);
        let body = serde_json::json!({
            "authorization": {
                "from": format!("{:#x}", auth.from),
                "to": format!("{:#x}", auth.to),
                "value": auth.value.to_string(),
                "validAfter": auth.valid_after,
                "validBefore": auth.valid_before,
                "nonce": format!("{:#x}", auth.nonce),
            },
            "signature": signature,
        });

        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }

            let response = match self
                .http
                .post(&url)
                .header("X-Internal-Secret", &self.secret)
                .header("X-User-IP", user_ip)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_timeout() => return Err(crate::Error::UpstreamTimeout),
                Err(e) => {
                    warn!(attempt, error = %e, "Upstream submit request failed (retrying)");
                    last_err = Some(crate::Error::Upstream {
                        status: 502,
                        message: format!("upstream unreachable: {e}"),
                    });
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let payload: serde_json::Value = response.json().await.unwrap_or_default();
                let retry_after_secs =
                    parse_reset(&payload, self.rate_limit_fallback_secs, now_secs());
                return Ok(SubmitOutcome::RateLimited { retry_after_secs });
            }

            if status.is_success() {
                let result: SubmitResult = response.json().await.map_err(|e| {
                    crate::Error::Upstream {
                        status: 502,
                        message: format!("invalid upstream response: {e}"),
                    }
                })?;
                return Ok(SubmitOutcome::Accepted(result));
            }

            let message = upstream_error_message(response).await;
            if status.is_server_error() && attempt + 1 < self.retry.max_attempts {
                warn!(attempt, status = %status, "Upstream submit transient error (retrying)");
                last_err = Some(crate::Error::Upstream {
                    status: status.as_u16(),
                    message: message.clone(),
                });
                continue;
            }

            return Ok(SubmitOutcome::Failed {
                status: status.as_u16(),
                message,
            });
        }

        Err(last_err.unwrap_or(crate::Error::Upstream {
            status: 502,
            message: "upstream submit failed".into(),
        }))
    }

    /// Poll submission status by id.
    pub async fn status(&self, id: &str) -> Result<SubmitResult, crate::Error> {
        let url = format!("{}/status/{id}", self.base_url);
        let response = match tokio::time::timeout(
            self.timeout,
            self.http
                .get(&url)
                .header("X-Internal-Secret", &self.secret)
                .send(),
        )
        .await
        {
            Err(_) => return Err(crate::Error::UpstreamTimeout),
            Ok(Err(e)) if e.is_timeout() => return Err(crate::Error::UpstreamTimeout),
            Ok(Err(e)) => {
                return Err(crate::Error::Upstream {
                    status: 502,
                    message: format!("upstream unreachable: {e}"),
                })
            }
            Ok(Ok(r)) => r,
        };

        let status = response.status();
        if !status.is_success() {
            let message = upstream_error_message(response).await;
            return Err(crate::Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| crate::Error::Upstream {
            status: 502,
            message: format!("invalid upstream response: {e}"),
        })
    }
}

/// Extract the upstream's error message, falling back to the raw body.
async fn upstream_error_message(response: reqwest::Response) -> String {
    match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("error")
            .map(|e| match e {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| body.to_string()),
        Err(_) => "upstream error".into(),
    }
}

/// Compute a retry-after window from a 429 body. `resetsAt` is unix
/// seconds; absent or already-past values fall back to the conservative
/// configured window.
fn parse_reset(body: &serde_json::Value, fallback_secs: u64, now: u64) -> u64 {
    body.pointer("/error/details/resetsAt")
        .and_then(|v| v.as_u64())
        .filter(|resets_at| *resets_at > now)
        .map(|resets_at| resets_at - now)
        .unwrap_or(fallback_secs)
}
