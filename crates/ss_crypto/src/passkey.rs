//! Passkey PRF boundary.
//!
//! The platform authenticator is an external collaborator: this crate only
//! defines the contract. A provider evaluates the WebAuthn PRF extension
//! over a fixed domain-separation input and returns 32 bytes that become
//! the non-extractable master key.
//!
//! On platforms without a PRF-capable authenticator only PIN mode is
//! available; providers signal that with `PasskeyUnavailable`.

use async_trait::async_trait;

use crate::error::CryptoError;
use crate::identity::MasterKey;
use crate::kdf::labels;

/// Hardware- or platform-backed PRF evaluation.
#[async_trait]
pub trait PasskeyProvider: Send + Sync {
    /// Authenticate the user and evaluate the PRF extension over `input`.
    ///
    /// Errors: [`CryptoError::PasskeyUnavailable`] when the authenticator
    /// lacks the PRF extension, [`CryptoError::Cancelled`] when the user
    /// dismisses the prompt.
    async fn prf_evaluate(&self, input: &[u8]) -> Result<[u8; 32], CryptoError>;
}

/// Authenticate with the protocol's PRF input and wrap the output as a
/// master key.
pub async fn authenticate(provider: &dyn PasskeyProvider) -> Result<MasterKey, CryptoError> {
    let prf = provider.prf_evaluate(labels::PASSKEY_PRF).await?;
    Ok(MasterKey::from_prf_output(prf))
}

// ── Software provider ────────────────────────────────────────────────────────

/// Deterministic software PRF over a stored 32-byte secret.
///
/// Stands in for a hardware authenticator in tests and headless
/// deployments; the PRF is HMAC-SHA-256(secret, input), mirroring what
/// CTAP2 `hmac-secret` computes on a real key.
pub struct SoftwarePasskey {
    secret: [u8; 32],
}

impl SoftwarePasskey {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl PasskeyProvider for SoftwarePasskey {
    async fn prf_evaluate(&self, input: &[u8]) -> Result<[u8; 32], CryptoError> {
        use hmac::{Hmac, Mac};
        let mut mac = <Hmac<sha2::Sha256>>::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(input);
        Ok(mac.finalize().into_bytes().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn software_prf_is_deterministic() {
        let pk = SoftwarePasskey::new([7u8; 32]);
        let a = authenticate(&pk).await.unwrap().derive_identity().unwrap();
        let b = authenticate(&pk).await.unwrap().derive_identity().unwrap();
        assert_eq!(a.public_id(), b.public_id());
    }

    #[tokio::test]
    async fn distinct_secrets_yield_distinct_identities() {
        let a = authenticate(&SoftwarePasskey::new([1u8; 32]))
            .await
            .unwrap()
            .derive_identity()
            .unwrap();
        let b = authenticate(&SoftwarePasskey::new([2u8; 32]))
            .await
            .unwrap()
            .derive_identity()
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
