//! Prometheus metrics (lock-free atomics, zero allocation on hot path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Traffic ---
    pub relay_total: AtomicU64,
    pub relay_success: AtomicU64,
    pub relay_error: AtomicU64,
    pub relay_rate_limited: AtomicU64,
    pub relay_replays: AtomicU64,

    // --- Latency (μs, updated via CAS) ---
    pub relay_duration_us_sum: AtomicU64,
    pub relay_duration_us_max: AtomicU64,

    // --- Upstream ---
    pub upstream_timeouts: AtomicU64,

    // --- Fleet ---
    pub alerts_sent: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            relay_total: AtomicU64::new(0),
            relay_success: AtomicU64::new(0),
            relay_error: AtomicU64::new(0),
            relay_rate_limited: AtomicU64::new(0),
            relay_replays: AtomicU64::new(0),
            relay_duration_us_sum: AtomicU64::new(0),
            relay_duration_us_max: AtomicU64::new(0),
            upstream_timeouts: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
        }
    }

    pub fn record_relay_duration(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.relay_duration_us_sum.fetch_add(us, Ordering::Relaxed);
        // CAS loop for max tracking
        let mut cur = self.relay_duration_us_max.load(Ordering::Relaxed);
        while us > cur {
            match self.relay_duration_us_max.compare_exchange_weak(
                cur,
                us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self, rate_limit_entries: usize, fleet_wallets: usize) -> String {
        let relay_total = self.relay_total.load(Ordering::Relaxed);
        let relay_success = self.relay_success.load(Ordering::Relaxed);
        let relay_error = self.relay_error.load(Ordering::Relaxed);
        let rate_limited = self.relay_rate_limited.load(Ordering::Relaxed);
        let replays = self.relay_replays.load(Ordering::Relaxed);
        let dur_sum = self.relay_duration_us_sum.load(Ordering::Relaxed);
        let dur_max = self.relay_duration_us_max.swap(0, Ordering::Relaxed);
        let timeouts = self.upstream_timeouts.load(Ordering::Relaxed);
        let alerts = self.alerts_sent.load(Ordering::Relaxed);

        // Convert μs to seconds for Prometheus conventions
        let dur_sum_s = dur_sum as f64 / 1_000_000.0;
        let dur_max_s = dur_max as f64 / 1_000_000.0;

        format!(
            "\
# HELP relay_requests_total Total relay requests received.\n\
# TYPE relay_requests_total counter\n\
relay_requests_total {relay_total}\n\
# HELP relay_success_total Authorizations accepted by the upstream.\n\
# TYPE relay_success_total counter\n\
relay_success_total {relay_success}\n\
# HELP relay_error_total Failed relay requests.\n\
# TYPE relay_error_total counter\n\
relay_error_total {relay_error}\n\
# HELP relay_rate_limited_total Requests rejected by a rate-limit window.\n\
# TYPE relay_rate_limited_total counter\n\
relay_rate_limited_total {rate_limited}\n\
# HELP relay_replays_total Requests rejected for nonce reuse.\n\
# TYPE relay_replays_total counter\n\
relay_replays_total {replays}\n\
# HELP relay_duration_seconds_sum Total handler time (seconds).\n\
# TYPE relay_duration_seconds_sum counter\n\
relay_duration_seconds_sum {dur_sum_s:.6}\n\
# HELP relay_duration_seconds_max Max handler time since last scrape (seconds).\n\
# TYPE relay_duration_seconds_max gauge\n\
relay_duration_seconds_max {dur_max_s:.6}\n\
# HELP relay_upstream_timeouts_total Upstream calls that hit the deadline.\n\
# TYPE relay_upstream_timeouts_total counter\n\
relay_upstream_timeouts_total {timeouts}\n\
# HELP relay_alerts_sent_total Low-balance webhook alerts delivered.\n\
# TYPE relay_alerts_sent_total counter\n\
relay_alerts_sent_total {alerts}\n\
# HELP relay_rate_limit_entries Cached rate-limit windows.\n\
# TYPE relay_rate_limit_entries gauge\n\
relay_rate_limit_entries {rate_limit_entries}\n\
# HELP relay_fleet_wallets Configured relayer wallets.\n\
# TYPE relay_fleet_wallets gauge\n\
relay_fleet_wallets {fleet_wallets}\n"
        )
    }
}
