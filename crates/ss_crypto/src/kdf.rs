//! Key derivation functions
//!
//! `derive_pin_key` — PBKDF2-HMAC-SHA-256, derives the 32-byte AES key that
//!   protects the handshake payload in PIN mode.
//!
//! `hkdf_expand` — HKDF-SHA256, used for every other key in the protocol.
//!
//! All HKDF uses carry a versioned domain-separation label from [`labels`];
//! two different uses of the same input keying material can never collide.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::keystore::{PinMaterial, SessionKey};

/// PBKDF2 iteration count for PIN-derived keys.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Per-transfer salt length in bytes, carried in the handshake `s` tag.
pub const SALT_LEN: usize = 16;

/// Domain-separation labels. One label per distinct key use.
pub mod labels {
    /// PFS session key from the ephemeral ECDH output.
    pub const SESSION_KEY: &[u8] = b"secure-send-session-key-v1";
    /// Session binding: proves an ephemeral key came from an identity holder.
    pub const SESSION_BIND: &[u8] = b"secure-send-session-bind-v1";
    /// Key-confirmation value hashed into the `kc` tag.
    pub const KEY_CONFIRM: &[u8] = b"secure-send-key-confirm-v1";
    /// Payload key protecting handshake event content in passkey modes.
    pub const PAYLOAD_KEY: &[u8] = b"secure-send-payload-key-v1";
    /// Stable public identifier derived from the passkey master key.
    pub const PUBLIC_ID: &[u8] = b"secure-send-public-id-v1";
    /// HMAC signing key derived from the passkey master key.
    pub const HMAC_KEY: &[u8] = b"secure-send-hmac-v1";
    /// Identity DH scalar derived from the passkey master key.
    pub const IDENTITY_DH: &[u8] = b"secure-send-identity-dh-v1";
    /// PRF evaluation input presented to the passkey authenticator.
    pub const PASSKEY_PRF: &[u8] = b"secure-send-passkey-ecdh-v1";
}

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF will use a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the PIN-mode AES-256-GCM key from the PIN bytes and the
/// per-transfer salt. Slow by construction (600k PBKDF2 rounds) to blunt
/// offline guessing against captured handshake events.
pub fn derive_pin_key(pin: &PinMaterial, salt: &[u8; SALT_LEN]) -> SessionKey {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(pin.bytes(), salt, PBKDF2_ITERATIONS, &mut out);
    SessionKey::from_kdf(out)
}

/// Generate a fresh random per-transfer salt (produced by the sender and
/// carried in the handshake `s` tag).
pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_labels_separate_domains() {
        let ikm = [11u8; 32];
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        hkdf_expand(&ikm, None, labels::SESSION_KEY, &mut a).unwrap();
        hkdf_expand(&ikm, None, labels::SESSION_BIND, &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn pin_key_depends_on_salt() {
        // Reduced-cost check is not possible (iteration count is fixed), so
        // this test pays the full PBKDF2 cost twice.
        let pin = PinMaterial::new(b"W5mrT2kqv8Fd".to_vec());
        let key_a = derive_pin_key(&pin, &[0u8; SALT_LEN]);
        let key_b = derive_pin_key(&pin, &[1u8; SALT_LEN]);
        let ct = key_a.encrypt(b"x", b"").unwrap();
        assert!(key_b.decrypt(&ct, b"").is_err());
        assert!(key_a.decrypt(&ct, b"").is_ok());
    }
}
