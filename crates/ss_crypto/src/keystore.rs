//! Non-extractable key handles.
//!
//! The engine never sees raw key bytes. Session keys, ephemeral scalars and
//! PIN bytes live inside sealed structs that expose derive/encrypt/decrypt
//! only; the private material is zeroized on drop and there is no API that
//! returns it.
//!
//! - [`SessionKey`]   — AES-256-GCM key; constructed only by this crate's KDFs.
//! - [`EphemeralKeyPair`] — per-session P-256 keypair; the scalar never leaves.
//! - [`PinMaterial`]  — owned PIN bytes, consumed by the PBKDF2 derivation.

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use zeroize::{Zeroize, Zeroizing};

use crate::aead;
use crate::error::CryptoError;
use crate::kdf;

/// Uncompressed SEC1 P-256 point length (the wire form of the `epk` tag).
pub const EPK_LEN: usize = 65;

// ── Session key ──────────────────────────────────────────────────────────────

/// Sealed AES-256-GCM key. The only representation of a session key.
///
/// Constructible exclusively from KDF output inside this crate; callers get
/// encrypt/decrypt and nothing else.
pub struct SessionKey {
    key: [u8; 32],
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl SessionKey {
    pub(crate) fn from_kdf(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt with a random nonce prepended to the ciphertext.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        aead::encrypt(&self.key, plaintext, aad)
    }

    /// Encrypt with a caller-supplied nonce; returns ciphertext+tag only.
    /// The chunk transport derives its nonces from the sequence number and
    /// must never reuse one under this key.
    pub fn encrypt_with_nonce(
        &self,
        nonce: &[u8; aead::NONCE_LEN],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        aead::encrypt_with_nonce(&self.key, nonce, plaintext, aad)
    }

    /// Decrypt wire-format bytes (nonce || ciphertext+tag).
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        aead::decrypt(&self.key, data, aad)
    }

    /// Decrypt ciphertext+tag with a detached nonce.
    pub fn decrypt_detached(
        &self,
        nonce: &[u8; aead::NONCE_LEN],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        aead::decrypt_detached(&self.key, nonce, ciphertext, aad)
    }
}

// ── Ephemeral keypair ────────────────────────────────────────────────────────

/// Per-session P-256 keypair for the PFS handshake.
///
/// The private scalar is owned by [`p256::ecdh::EphemeralSecret`], which has
/// no byte-export API; all DH output is consumed internally by HKDF.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: [u8; EPK_LEN],
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        let mut public = [0u8; EPK_LEN];
        public.copy_from_slice(point.as_bytes());
        Self { secret, public }
    }

    /// Uncompressed SEC1 encoding of the public key (65 bytes, `epk` tag).
    pub fn public_bytes(&self) -> &[u8; EPK_LEN] {
        &self.public
    }

    /// Run ECDH against the peer's ephemeral public key and derive the
    /// session AES key: HKDF-SHA-256(dh, salt, "secure-send-session-key-v1").
    pub fn derive_session_key(
        &self,
        peer_public: &[u8],
        salt: &[u8; kdf::SALT_LEN],
    ) -> Result<SessionKey, CryptoError> {
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| CryptoError::InvalidKey("invalid ephemeral public key".into()))?;
        let shared = self.secret.diffie_hellman(&peer);

        let mut key = [0u8; 32];
        kdf::hkdf_expand(
            shared.raw_secret_bytes().as_slice(),
            Some(salt),
            kdf::labels::SESSION_KEY,
            &mut key,
        )?;
        Ok(SessionKey::from_kdf(key))
    }
}

// ── PIN material ─────────────────────────────────────────────────────────────

/// Owned PIN bytes, zeroized on drop. Produced by the PIN parser and consumed
/// by [`crate::kdf::derive_pin_key`].
pub struct PinMaterial {
    bytes: Zeroizing<Vec<u8>>,
}

impl PinMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: Zeroizing::new(bytes) }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::generate_salt;

    #[test]
    fn ephemeral_ecdh_agrees() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let salt = generate_salt();

        let key_a = a.derive_session_key(b.public_bytes(), &salt).unwrap();
        let key_b = b.derive_session_key(a.public_bytes(), &salt).unwrap();

        let ct = key_a.encrypt(b"session check", b"").unwrap();
        let pt = key_b.decrypt(&ct, b"").unwrap();
        assert_eq!(&pt[..], b"session check");
    }

    #[test]
    fn different_salts_diverge() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();

        let key_a = a.derive_session_key(b.public_bytes(), &[0u8; 16]).unwrap();
        let key_b = b.derive_session_key(a.public_bytes(), &[1u8; 16]).unwrap();

        let ct = key_a.encrypt(b"x", b"").unwrap();
        assert!(key_b.decrypt(&ct, b"").is_err());
    }

    #[test]
    fn public_point_is_uncompressed_sec1() {
        let kp = EphemeralKeyPair::generate();
        assert_eq!(kp.public_bytes().len(), EPK_LEN);
        assert_eq!(kp.public_bytes()[0], 0x04);
    }

    #[test]
    fn rejects_garbage_peer_key() {
        let kp = EphemeralKeyPair::generate();
        assert!(kp.derive_session_key(&[0u8; 65], &[0u8; 16]).is_err());
    }
}
