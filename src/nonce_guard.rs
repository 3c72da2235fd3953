//! Exactly-once nonce claims for `(from, nonce)` pairs.
//!
//! The claim must be atomic at the store level: "read then write" would let
//! two concurrent submissions of the same payload both pass. The redis
//! variant claims with a single `SET NX EX`, which is linearizable per key
//! across any number of service instances. The in-memory variant satisfies
//! the same interface but is only atomic within one process.

use alloy::primitives::{Address, B256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::authorization::now_secs;

/// Nonce claim store. The backend is selected once at construction and
/// never switched at runtime.
pub enum NonceGuard {
    Redis(RedisNonceStore),
    Memory(MemoryNonceStore),
}

impl NonceGuard {
    /// Connect the distributed store. Fails hard on connection errors
    /// rather than degrading to the in-memory variant.
    pub async fn connect_redis(url: &str, ttl_secs: u64) -> Result<Self, crate::Error> {
        let client = redis::Client::open(url)
            .map_err(|e| crate::Error::Config(format!("invalid redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| crate::Error::Store(format!("redis connect failed: {e}")))?;
        info!(ttl_secs, "Nonce guard using redis backend");
        Ok(Self::Redis(RedisNonceStore { manager, ttl_secs }))
    }

    /// In-memory fallback for environments without a shared store.
    ///
    /// Claims are not atomic across service instances; running more than
    /// one instance with this backend reintroduces the replay risk the
    /// guard exists to prevent.
    pub fn in_memory(ttl: Duration, production_like: bool) -> Self {
        if production_like {
            warn!(
                "SECURITY: in-memory nonce store selected in a production-like \
                 environment; replay protection does NOT extend across service \
                 instances. Configure redis_url for multi-instance deployments"
            );
        } else {
            info!("Nonce guard using in-memory backend (single instance only)");
        }
        Self::Memory(MemoryNonceStore {
            entries: Mutex::new(HashMap::new()),
            ttl,
        })
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Memory(_) => "memory",
        }
    }

    /// Read-only check. Never mutates claim state.
    pub async fn is_used(&self, from: Address, nonce: B256) -> Result<bool, crate::Error> {
        match self {
            Self::Redis(store) => store.is_used(from, nonce).await,
            Self::Memory(store) => Ok(store.is_used(from, nonce)),
        }
    }

    /// Atomic claim. Returns `true` exactly once per `(from, nonce)` before
    /// TTL expiry; every subsequent call returns `false`.
    pub async fn check_and_mark(&self, from: Address, nonce: B256) -> Result<bool, crate::Error> {
        match self {
            Self::Redis(store) => store.check_and_mark(from, nonce).await,
            Self::Memory(store) => Ok(store.check_and_mark(from, nonce)),
        }
    }

    /// Drop entries past their TTL to bound memory. Redis expires keys
    /// natively, so this only does work for the in-memory variant. Removal
    /// never affects concurrent claims: only already-expired entries go.
    pub async fn purge_expired(&self) -> usize {
        match self {
            Self::Redis(_) => 0,
            Self::Memory(store) => store.purge_expired(),
        }
    }
}

/// Redis-backed claim store.
pub struct RedisNonceStore {
    manager: redis::aio::ConnectionManager,
    ttl_secs: u64,
}

impl RedisNonceStore {
    async fn is_used(&self, from: Address, nonce: B256) -> Result<bool, crate::Error> {
        let mut conn = self.manager.clone();
        let used: bool = redis::cmd("EXISTS")
            .arg(nonce_key(from, nonce))
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::Error::Store(format!("redis EXISTS failed: {e}")))?;
        Ok(used)
    }

    async fn check_and_mark(&self, from: Address, nonce: B256) -> Result<bool, crate::Error> {
        let mut conn = self.manager.clone();
        // SET NX EX is the atomic create-if-absent-with-expiry primitive;
        // it returns OK on a fresh claim and nil when the key exists.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(nonce_key(from, nonce))
            .arg(now_secs())
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| crate::Error::Store(format!("redis SET NX failed: {e}")))?;
        Ok(claimed.is_some())
    }
}

/// Single-process claim store. One mutex, short critical sections.
pub struct MemoryNonceStore {
    entries: Mutex<HashMap<(Address, B256), Instant>>,
    ttl: Duration,
}

impl MemoryNonceStore {
    fn is_used(&self, from: Address, nonce: B256) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&(from, nonce)) {
            Some(claimed_at) => claimed_at.elapsed() < self.ttl,
            None => false,
        }
    }

    fn check_and_mark(&self, from: Address, nonce: B256) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&(from, nonce)) {
            Some(claimed_at) if claimed_at.elapsed() < self.ttl => false,
            _ => {
                entries.insert((from, nonce), Instant::now());
                true
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, claimed_at| claimed_at.elapsed() < self.ttl);
        before - entries.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

fn nonce_key(from: Address, nonce: B256) -> String {
    format!("nonce:{from:#x}:{nonce:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn memory_guard(ttl: Duration) -> NonceGuard {
        NonceGuard::in_memory(ttl, false)
    }

    fn key(n: u8) -> (Address, B256) {
        (Address::repeat_byte(1), B256::repeat_byte(n))
    }

    #[tokio::test]
    async fn test_check_and_mark_succeeds_exactly_once() {
        let guard = memory_guard(Duration::from_secs(60));
        let (from, nonce) = key(1);
        assert!(guard.check_and_mark(from, nonce).await.unwrap());
        assert!(!guard.check_and_mark(from, nonce).await.unwrap());
        assert!(!guard.check_and_mark(from, nonce).await.unwrap());
    }

    #[tokio::test]
    async fn test_unrelated_pairs_are_independent() {
        let guard = memory_guard(Duration::from_secs(60));
        let (from, nonce) = key(1);
        assert!(guard.check_and_mark(from, nonce).await.unwrap());
        assert!(guard.check_and_mark(from, B256::repeat_byte(2)).await.unwrap());
        assert!(guard
            .check_and_mark(Address::repeat_byte(9), nonce)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_is_used_never_mutates() {
        let guard = memory_guard(Duration::from_secs(60));
        let (from, nonce) = key(1);
        for _ in 0..10 {
            assert!(!guard.is_used(from, nonce).await.unwrap());
        }
        // The claim is still available after repeated reads.
        assert!(guard.check_and_mark(from, nonce).await.unwrap());
        for _ in 0..10 {
            assert!(guard.is_used(from, nonce).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_claim_expires_after_ttl() {
        let guard = memory_guard(Duration::from_millis(20));
        let (from, nonce) = key(1);
        assert!(guard.check_and_mark(from, nonce).await.unwrap());
        assert!(!guard.check_and_mark(from, nonce).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!guard.is_used(from, nonce).await.unwrap());
        assert!(guard.check_and_mark(from, nonce).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_entries() {
        let store = match memory_guard(Duration::from_millis(30)) {
            NonceGuard::Memory(store) => store,
            _ => unreachable!(),
        };
        let (from, _) = key(1);
        assert!(store.check_and_mark(from, B256::repeat_byte(1)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.check_and_mark(from, B256::repeat_byte(2)));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        // The live claim survives purging.
        assert!(!store.check_and_mark(from, B256::repeat_byte(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_single_winner() {
        let guard = Arc::new(memory_guard(Duration::from_secs(60)));
        let (from, nonce) = key(1);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = Arc::clone(&guard);
            handles.push(tokio::spawn(async move {
                guard.check_and_mark(from, nonce).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
