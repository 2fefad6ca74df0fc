//! Party identity derived from the passkey PRF.
//!
//! One passkey evaluation yields a 32-byte master key; everything else is
//! derived from it deterministically via HKDF:
//!   - `public_id` — 32-byte opaque stable identifier
//!   - HMAC signing key — pairing-key signatures and verification secrets
//!   - identity DH keypair (X25519) — the 32-byte `ppk` published in
//!     pairing keys, and the identity shared secret behind payload keys,
//!     session bindings and key confirmation
//!
//! In PIN mode there is no identity at all; the PIN-derived key is the only
//! shared material. Identities exist only in the passkey modes.
//!
//! None of the derived secrets is exportable: the identity exposes signing,
//! verification and key-derivation operations, never key bytes.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;
use crate::kdf::{self, labels};
use crate::keystore::SessionKey;

type HmacSha256 = Hmac<Sha256>;

/// Length of a public identifier in bytes.
pub const PUBLIC_ID_LEN: usize = 32;
/// Length of an identity DH public key (`ppk`) in bytes.
pub const PPK_LEN: usize = 32;
/// Fingerprint length in hex characters (first 64 bits of SHA-256).
pub const FINGERPRINT_LEN: usize = 16;

// ── Master key ───────────────────────────────────────────────────────────────

/// 32-byte passkey PRF output. Zeroized on drop; consumed by
/// [`MasterKey::derive_identity`].
pub struct MasterKey {
    bytes: [u8; 32],
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl MasterKey {
    pub fn from_prf_output(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Derive the full identity bundle.
    pub fn derive_identity(&self) -> Result<Identity, CryptoError> {
        let mut public_id = [0u8; PUBLIC_ID_LEN];
        kdf::hkdf_expand(&self.bytes, None, labels::PUBLIC_ID, &mut public_id)?;

        let mut hmac_key = [0u8; 32];
        kdf::hkdf_expand(&self.bytes, None, labels::HMAC_KEY, &mut hmac_key)?;

        let mut dh_scalar = [0u8; 32];
        kdf::hkdf_expand(&self.bytes, None, labels::IDENTITY_DH, &mut dh_scalar)?;
        // StaticSecret clamps the scalar per RFC 7748 on construction.
        let dh_secret = StaticSecret::from(dh_scalar);
        dh_scalar.zeroize();

        let ppk = *X25519Public::from(&dh_secret).as_bytes();

        Ok(Identity { public_id, ppk, hmac_key, dh_secret })
    }
}

// ── Identity ─────────────────────────────────────────────────────────────────

/// A party's derived identity: stable public values plus sealed signing and
/// DH secrets.
pub struct Identity {
    public_id: [u8; PUBLIC_ID_LEN],
    ppk: [u8; PPK_LEN],
    hmac_key: [u8; 32],
    dh_secret: StaticSecret,
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.hmac_key.zeroize();
        // dh_secret zeroizes itself on drop
    }
}

impl Identity {
    pub fn public_id(&self) -> &[u8; PUBLIC_ID_LEN] {
        &self.public_id
    }

    /// Identity DH public key, published as `a_ppk`/`b_ppk` in pairing keys.
    pub fn ppk(&self) -> &[u8; PPK_LEN] {
        &self.ppk
    }

    /// 16-hex-char uppercase fingerprint of the public id.
    pub fn fingerprint(&self) -> String {
        fingerprint_hex(&self.public_id)
    }

    // ── HMAC operations ──────────────────────────────────────────────────

    /// HMAC-SHA-256 over `msg` with this identity's signing key.
    pub fn hmac_sign(&self, msg: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .expect("HMAC accepts any key length");
        mac.update(msg);
        mac.finalize().into_bytes().into()
    }

    /// Verification secret bound to a peer's `ppk`:
    /// HMAC(hmac_key, "verification-secret" ‖ peer_ppk).
    ///
    /// Recomputed fresh at handshake time; control of the passkey that
    /// produced the HMAC key is exactly what the resulting proof attests.
    pub fn verification_secret(&self, peer_ppk: &[u8; PPK_LEN]) -> Zeroizing<[u8; 32]> {
        let mut msg = Vec::with_capacity(19 + PPK_LEN);
        msg.extend_from_slice(b"verification-secret");
        msg.extend_from_slice(peer_ppk);
        Zeroizing::new(self.hmac_sign(&msg))
    }

    /// Handshake proof for this identity's own ephemeral key:
    /// HMAC(verification_secret, epk ‖ nonce ‖ peer_fingerprint).
    pub fn handshake_proof(
        &self,
        peer_ppk: &[u8; PPK_LEN],
        own_epk: &[u8],
        nonce: &[u8],
        peer_fingerprint: &str,
    ) -> [u8; 32] {
        let vs = self.verification_secret(peer_ppk);
        proof_with_secret(&vs, own_epk, nonce, peer_fingerprint)
    }

    // ── Identity DH derivations ──────────────────────────────────────────

    fn shared_secret(&self, peer_ppk: &[u8; PPK_LEN]) -> Zeroizing<[u8; 32]> {
        let peer = X25519Public::from(*peer_ppk);
        Zeroizing::new(*self.dh_secret.diffie_hellman(&peer).as_bytes())
    }

    /// Payload key protecting handshake event content in passkey modes.
    pub fn payload_key(
        &self,
        peer_ppk: &[u8; PPK_LEN],
        salt: &[u8; kdf::SALT_LEN],
    ) -> Result<SessionKey, CryptoError> {
        let shared = self.shared_secret(peer_ppk);
        let mut key = [0u8; 32];
        kdf::hkdf_expand(&shared[..], Some(salt), labels::PAYLOAD_KEY, &mut key)?;
        Ok(SessionKey::from_kdf(key))
    }

    /// Session binding for an ephemeral key:
    /// HKDF(identity_shared_secret, salt = epk, "secure-send-session-bind-v1").
    ///
    /// Proves the ephemeral key was produced by a holder of the identity
    /// shared secret (`esb` tag).
    pub fn session_binding(
        &self,
        peer_ppk: &[u8; PPK_LEN],
        epk: &[u8],
    ) -> Result<[u8; 32], CryptoError> {
        let shared = self.shared_secret(peer_ppk);
        let mut out = [0u8; 32];
        kdf::hkdf_expand(&shared[..], Some(epk), labels::SESSION_BIND, &mut out)?;
        Ok(out)
    }

    /// Key-confirmation hash (`kc` tag):
    /// SHA-256(HKDF(identity_shared_secret, salt, "secure-send-key-confirm-v1")).
    pub fn key_confirmation(
        &self,
        peer_ppk: &[u8; PPK_LEN],
        salt: &[u8; kdf::SALT_LEN],
    ) -> Result<[u8; 32], CryptoError> {
        let shared = self.shared_secret(peer_ppk);
        let mut confirm = Zeroizing::new([0u8; 32]);
        kdf::hkdf_expand(&shared[..], Some(salt), labels::KEY_CONFIRM, &mut confirm[..])?;
        Ok(Sha256::digest(&confirm[..]).into())
    }
}

// ── Free helpers ─────────────────────────────────────────────────────────────

/// Fingerprint of a public id: first 8 bytes of SHA-256, uppercase hex.
pub fn fingerprint_hex(public_id: &[u8]) -> String {
    let digest = Sha256::digest(public_id);
    hex::encode_upper(&digest[..8])
}

/// Render a 16-hex fingerprint in groups of four for display:
/// `"A1B2C3D4E5F67890"` → `"A1B2 C3D4 E5F6 7890"`.
pub fn display_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Receiver public-ID commitment (`rpkc` tag): SHA-256(public_id) truncated
/// to 16 bytes, lowercase hex. Binds a handshake event to one receiver.
pub fn receiver_commitment(public_id: &[u8]) -> String {
    let digest = Sha256::digest(public_id);
    hex::encode(&digest[..16])
}

/// Compute a handshake proof from an already-known verification secret
/// (the verifier side reads the peer's secret from the pairing record).
pub fn proof_with_secret(
    vs: &[u8; 32],
    epk: &[u8],
    nonce: &[u8],
    fingerprint: &str,
) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(vs).expect("HMAC accepts any key length");
    mac.update(epk);
    mac.update(nonce);
    mac.update(fingerprint.as_bytes());
    mac.finalize().into_bytes().into()
}
