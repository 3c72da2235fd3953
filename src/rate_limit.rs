//! Local rate-limit cache shielding the upstream relayer.
//!
//! When the upstream signals 429, the window is cached here keyed by caller
//! IP and by `from` address, and later calls are rejected locally until the
//! window passes, so the upstream never sees the repeat traffic.

use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Expiry map keyed by caller identity. Owned by a gateway instance, never
/// a process-wide global, so tests run isolated instances.
pub struct RateLimitCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl Default for RateLimitCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Longest remaining wait across the given identities, if any is still
    /// inside a cached window. Expired entries are removed lazily.
    pub fn remaining(&self, keys: &[String]) -> Option<Duration> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let mut longest: Option<Duration> = None;
        for key in keys {
            match entries.get(key) {
                Some(expiry) if *expiry > now => {
                    let wait = *expiry - now;
                    if longest.map_or(true, |cur| wait > cur) {
                        longest = Some(wait);
                    }
                }
                Some(_) => {
                    entries.remove(key);
                }
                None => {}
            }
        }
        longest
    }

    /// Cache a rate-limit window for the given identities.
    pub fn mark(&self, keys: &[String], wait: Duration) {
        let expiry = Instant::now() + wait;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            entries.insert(key.clone(), expiry);
        }
    }

    /// Drop expired entries to bound memory.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn ip_key(ip: &str) -> String {
    format!("ip:{ip}")
}

pub fn from_key(from: Address) -> String {
    format!("from:{from:#x}")
}
