//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce, 128-bit tag).
//! Key size: 32 bytes.  Nonce: 12 bytes.  Tag: 16 bytes.
//!
//! Ciphertext wire format:
//!   [ nonce (12 bytes) | ciphertext + tag ]
//!
//! The chunk transport carries its nonce in a separate wire field, so the
//! detached `*_with_nonce` variants exist alongside the prefix form.
//!
//! These functions take raw key bytes and are `pub(crate)`; everything
//! outside this crate encrypts through a [`crate::keystore::SessionKey`]
//! handle so raw key material never crosses the crate boundary.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// AEAD nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;
/// AEAD authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` with a 32-byte key, prepending a random 12-byte nonce.
/// `aad` — additional associated data (authenticated but not encrypted).
pub(crate) fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    // Prepend nonce
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Encrypt with a caller-supplied nonce; returns ciphertext+tag only.
/// The caller is responsible for nonce uniqueness per key.
pub(crate) fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub(crate) fn decrypt(
    key: &[u8; 32],
    data: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    decrypt_detached(
        key,
        nonce_bytes.try_into().map_err(|_| CryptoError::AeadDecrypt)?,
        ct,
        aad,
    )
}

/// Decrypt ciphertext+tag with a detached nonce.
pub(crate) fn decrypt_detached(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_prefix_nonce() {
        let key = [7u8; 32];
        let ct = encrypt(&key, b"hello transfer", b"aad").unwrap();
        assert_eq!(ct.len(), NONCE_LEN + 14 + TAG_LEN);
        let pt = decrypt(&key, &ct, b"aad").unwrap();
        assert_eq!(&pt[..], b"hello transfer");
    }

    #[test]
    fn roundtrip_detached_nonce() {
        let key = [9u8; 32];
        let nonce = [3u8; NONCE_LEN];
        let ct = encrypt_with_nonce(&key, &nonce, b"chunk data", b"\x00\x00\x00\x07").unwrap();
        let pt = decrypt_detached(&key, &nonce, &ct, b"\x00\x00\x00\x07").unwrap();
        assert_eq!(&pt[..], b"chunk data");
    }

    #[test]
    fn tamper_rejected() {
        let key = [1u8; 32];
        let mut ct = encrypt(&key, b"payload", b"").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(decrypt(&key, &ct, b""), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn wrong_aad_rejected() {
        let key = [1u8; 32];
        let ct = encrypt(&key, b"payload", b"seq=1").unwrap();
        assert!(decrypt(&key, &ct, b"seq=2").is_err());
    }

    #[test]
    fn truncated_input_rejected() {
        let key = [1u8; 32];
        assert!(decrypt(&key, &[0u8; 8], b"").is_err());
    }
}
