//! EIP-712 typed-data signing for transfer authorizations.
//!
//! Signing is deterministic for identical inputs: all entropy (nonce, time
//! window) originates in the factory, none is added here.

use crate::authorization::{AuthorizationFactory, BuildOptions, TransferAuthorization};
use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::{Eip712Domain, SolStruct};
use std::borrow::Cow;

alloy::sol! {
    /// EIP-3009 transfer authorization message.
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// Signing backend for authorizations.
///
/// Local keys sign synchronously in-process; the enum leaves room for a
/// remote key holder, which is why the sign path is async and cancellable
/// by the caller.
pub enum SignerBackend {
    Local { signer: PrivateKeySigner },
}

impl SignerBackend {
    pub fn address(&self) -> Address {
        match self {
            Self::Local { signer } => signer.address(),
        }
    }

    async fn sign_hash(&self, hash: B256) -> Result<alloy::primitives::Signature, crate::Error> {
        match self {
            Self::Local { signer } => signer
                .sign_hash(&hash)
                .await
                .map_err(|e| crate::Error::Signer(format!("local sign failed: {e}"))),
        }
    }
}

impl std::fmt::Debug for SignerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { signer } => write!(f, "SignerBackend::Local({})", signer.address()),
        }
    }
}

/// A signed authorization with its split signature components. Immutable.
#[derive(Debug, Clone)]
pub struct SignedAuthorization {
    pub authorization: TransferAuthorization,
    /// 65-byte signature, `0x`-prefixed hex.
    pub signature: String,
    /// Recovery id, 27 or 28.
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

/// Signs transfer authorizations under a fixed EIP-712 domain.
pub struct AuthorizationSigner {
    domain: Eip712Domain,
    backend: SignerBackend,
}

impl AuthorizationSigner {
    pub fn new(
        domain_name: String,
        domain_version: String,
        chain_id: u64,
        verifying_contract: Address,
        backend: SignerBackend,
    ) -> Self {
        let domain = Eip712Domain::new(
            Some(Cow::Owned(domain_name)),
            Some(Cow::Owned(domain_version)),
            Some(U256::from(chain_id)),
            Some(verifying_contract),
            None,
        );
        Self { domain, backend }
    }

    pub fn address(&self) -> Address {
        self.backend.address()
    }

    /// Sign an authorization and split the signature into `(v, r, s)`.
    pub async fn sign(
        &self,
        auth: &TransferAuthorization,
    ) -> Result<SignedAuthorization, crate::Error> {
        let message = TransferWithAuthorization {
            from: auth.from,
            to: auth.to,
            value: auth.value,
            validAfter: U256::from(auth.valid_after),
            validBefore: U256::from(auth.valid_before),
            nonce: auth.nonce,
        };
        let hash = message.eip712_signing_hash(&self.domain);
        let signature = self.backend.sign_hash(hash).await?;

        let r = B256::from(signature.r().to_be_bytes::<32>());
        let s = B256::from(signature.s().to_be_bytes::<32>());
        let v = 27 + signature.v() as u8;

        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(r.as_slice());
        bytes[32..64].copy_from_slice(s.as_slice());
        bytes[64] = v;

        Ok(SignedAuthorization {
            authorization: *auth,
            signature: format!("0x{}", hex::encode(bytes)),
            v,
            r,
            s,
        })
    }

    /// Build an authorization, validate it against policy, and sign it in
    /// one call. Validation failures are returned with every violated rule.
    pub async fn build_and_sign(
        &self,
        factory: &AuthorizationFactory,
        from: Address,
        to: Address,
        value: U256,
        options: BuildOptions,
    ) -> Result<SignedAuthorization, crate::Error> {
        let auth = factory.build(from, to, value, options);
        let errors = factory.validate(&auth);
        if !errors.is_empty() {
            return Err(crate::Error::Validation(
                errors.iter().map(|e| e.to_string()).collect(),
            ));
        }
        self.sign(&auth).await
    }
}
