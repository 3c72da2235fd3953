//! Transfer authorization construction and validation.
//!
//! An authorization is a time-bounded, single-use instruction to move a
//! fixed amount between two accounts. The factory builds the value object
//! and checks it against policy; nonce uniqueness is enforced by the nonce
//! guard, not here.

use alloy::primitives::{Address, B256, U256};
use rand::RngCore;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Policy bounds for transfer amounts, in atomic token units.
#[derive(Debug, Clone, Copy)]
pub struct TransferPolicy {
    pub min_transfer: U256,
    pub max_transfer: U256,
}

impl TransferPolicy {
    pub fn new(min_transfer: u128, max_transfer: u128) -> Self {
        Self {
            min_transfer: U256::from(min_transfer),
            max_transfer: U256::from(max_transfer),
        }
    }
}

/// A transfer authorization. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    /// Unix seconds. The authorization is valid from this instant.
    pub valid_after: u64,
    /// Unix seconds. The authorization expires at this instant.
    pub valid_before: u64,
    /// Random 32 bytes, globally unique per `from`.
    pub nonce: B256,
}

/// Optional overrides for [`AuthorizationFactory::build`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub valid_after: Option<u64>,
    pub valid_before: Option<u64>,
    /// Callers may supply their own nonce for idempotent retries.
    pub nonce: Option<B256>,
    /// Window length when no explicit window is given.
    pub validity_period: Option<u64>,
}

/// A single violated validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    ZeroFrom,
    ZeroTo,
    SelfTransfer,
    ZeroValue,
    BelowMinimum { min: U256 },
    AboveMaximum { max: U256 },
    InvertedWindow,
    NotYetValid { valid_after: u64 },
    Expired { valid_before: u64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroFrom => write!(f, "from must not be the zero address"),
            ValidationError::ZeroTo => write!(f, "to must not be the zero address"),
            ValidationError::SelfTransfer => write!(f, "from and to must be distinct"),
            ValidationError::ZeroValue => write!(f, "value must be greater than zero"),
            ValidationError::BelowMinimum { min } => {
                write!(f, "value is below the minimum transfer of {min}")
            }
            ValidationError::AboveMaximum { max } => {
                write!(f, "value is above the maximum transfer of {max}")
            }
            ValidationError::InvertedWindow => {
                write!(f, "validBefore must be greater than validAfter")
            }
            ValidationError::NotYetValid { valid_after } => {
                write!(f, "authorization is not yet valid (validAfter {valid_after})")
            }
            ValidationError::Expired { valid_before } => {
                write!(f, "authorization has expired (validBefore {valid_before})")
            }
        }
    }
}

/// Builds and validates transfer authorizations. No I/O.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationFactory {
    policy: TransferPolicy,
    /// Default validity window length, in seconds.
    validity_period: u64,
}

impl AuthorizationFactory {
    pub fn new(policy: TransferPolicy, validity_period: u64) -> Self {
        Self {
            policy,
            validity_period,
        }
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// Build an authorization. When no explicit window is given, the window
    /// is `[now, now + validity_period]`; the nonce defaults to 32 random
    /// bytes from OS entropy.
    pub fn build(
        &self,
        from: Address,
        to: Address,
        value: U256,
        options: BuildOptions,
    ) -> TransferAuthorization {
        let now = now_secs();
        let period = options.validity_period.unwrap_or(self.validity_period);
        let valid_after = options.valid_after.unwrap_or(now);
        let valid_before = options.valid_before.unwrap_or(valid_after + period);

        TransferAuthorization {
            from,
            to,
            value,
            valid_after,
            valid_before,
            nonce: options.nonce.unwrap_or_else(random_nonce),
        }
    }

    /// Validate against policy at the current time. Never panics; returns
    /// every violated rule so callers can surface a complete list.
    pub fn validate(&self, auth: &TransferAuthorization) -> Vec<ValidationError> {
        validate_at(auth, &self.policy, now_secs())
    }
}

/// Validate an authorization against a policy at a given instant.
pub fn validate_at(
    auth: &TransferAuthorization,
    policy: &TransferPolicy,
    now: u64,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if auth.from == Address::ZERO {
        errors.push(ValidationError::ZeroFrom);
    }
    if auth.to == Address::ZERO {
        errors.push(ValidationError::ZeroTo);
    }
    if auth.from == auth.to && auth.from != Address::ZERO {
        errors.push(ValidationError::SelfTransfer);
    }

    if auth.value.is_zero() {
        errors.push(ValidationError::ZeroValue);
    } else if auth.value < policy.min_transfer {
        errors.push(ValidationError::BelowMinimum {
            min: policy.min_transfer,
        });
    } else if auth.value > policy.max_transfer {
        errors.push(ValidationError::AboveMaximum {
            max: policy.max_transfer,
        });
    }

    if auth.valid_before <= auth.valid_after {
        errors.push(ValidationError::InvertedWindow);
    } else if now < auth.valid_after {
        errors.push(ValidationError::NotYetValid {
            valid_after: auth.valid_after,
        });
    } else if now >= auth.valid_before {
        errors.push(ValidationError::Expired {
            valid_before: auth.valid_before,
        });
    }

    errors
}

/// A cryptographically random 32-byte nonce.
pub fn random_nonce() -> B256 {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    B256::from(bytes)
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_factory() -> AuthorizationFactory {
        AuthorizationFactory::new(TransferPolicy::new(10, 1_000_000), 600)
    }

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn test_build_defaults_validate_clean() {
        let factory = test_factory();
        let auth = factory.build(addr(1), addr(2), U256::from(500), BuildOptions::default());
        assert!(factory.validate(&auth).is_empty());
        assert_eq!(auth.valid_before - auth.valid_after, 600);
    }

    #[test]
    fn test_build_honors_explicit_nonce() {
        let factory = test_factory();
        let nonce = B256::repeat_byte(7);
        let auth = factory.build(
            addr(1),
            addr(2),
            U256::from(500),
            BuildOptions {
                nonce: Some(nonce),
                ..Default::default()
            },
        );
        assert_eq!(auth.nonce, nonce);
    }

    #[test]
    fn test_build_random_nonces_differ() {
        let factory = test_factory();
        let a = factory.build(addr(1), addr(2), U256::from(500), BuildOptions::default());
        let b = factory.build(addr(1), addr(2), U256::from(500), BuildOptions::default());
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_build_custom_validity_period() {
        let factory = test_factory();
        let auth = factory.build(
            addr(1),
            addr(2),
            U256::from(500),
            BuildOptions {
                validity_period: Some(60),
                ..Default::default()
            },
        );
        assert_eq!(auth.valid_before - auth.valid_after, 60);
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let factory = test_factory();
        let auth = TransferAuthorization {
            from: Address::ZERO,
            to: Address::ZERO,
            value: U256::ZERO,
            valid_after: 100,
            valid_before: 50,
            nonce: B256::ZERO,
        };
        let errors = factory.validate(&auth);
        assert!(errors.contains(&ValidationError::ZeroFrom));
        assert!(errors.contains(&ValidationError::ZeroTo));
        assert!(errors.contains(&ValidationError::ZeroValue));
        assert!(errors.contains(&ValidationError::InvertedWindow));
        // Zero-to-zero is not additionally a self-transfer.
        assert!(!errors.contains(&ValidationError::SelfTransfer));
    }

    #[test]
    fn test_validate_self_transfer() {
        let factory = test_factory();
        let auth = factory.build(addr(3), addr(3), U256::from(500), BuildOptions::default());
        assert!(factory.validate(&auth).contains(&ValidationError::SelfTransfer));
    }

    #[test]
    fn test_validate_bounds() {
        let factory = test_factory();
        let low = factory.build(addr(1), addr(2), U256::from(5), BuildOptions::default());
        assert!(factory
            .validate(&low)
            .contains(&ValidationError::BelowMinimum {
                min: U256::from(10)
            }));

        let high = factory.build(addr(1), addr(2), U256::from(2_000_000), BuildOptions::default());
        assert!(factory
            .validate(&high)
            .contains(&ValidationError::AboveMaximum {
                max: U256::from(1_000_000)
            }));
    }

    #[test]
    fn test_not_yet_valid_vs_expired_distinct() {
        let policy = TransferPolicy::new(10, 1_000_000);
        let auth = TransferAuthorization {
            from: addr(1),
            to: addr(2),
            value: U256::from(500),
            valid_after: 1_000,
            valid_before: 2_000,
            nonce: B256::repeat_byte(1),
        };
        assert_eq!(
            validate_at(&auth, &policy, 500),
            vec![ValidationError::NotYetValid { valid_after: 1_000 }]
        );
        assert_eq!(
            validate_at(&auth, &policy, 2_000),
            vec![ValidationError::Expired { valid_before: 2_000 }]
        );
        assert!(validate_at(&auth, &policy, 1_500).is_empty());
        // Window boundaries: validAfter inclusive, validBefore exclusive.
        assert!(validate_at(&auth, &policy, 1_000).is_empty());
    }
}
