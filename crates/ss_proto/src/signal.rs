//! NAT-traversal signaling payloads.
//!
//! A signaling message carries an SDP offer or answer plus gathered ICE
//! candidates; the handshake metadata fields ride along in manual mode
//! where there is no separate handshake event.
//!
//! Relay path: the JSON is AEAD-wrapped by the engine with the *session*
//! key (never the PIN key) and carried as `type=signal` data events — the
//! substrate never sees plaintext SDP.
//!
//! Manual path (QR / copy-paste, no substrate):
//!   [ magic "SS01" (4) | salt (16) | AEAD( gzip(json) ) ]
//! keyed from the PIN via PBKDF2 with the embedded salt. Gzip keeps QR
//! payloads small enough to scan; the magic identifies the envelope
//! version.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use ss_crypto::kdf::{self, SALT_LEN};
use ss_crypto::keystore::{PinMaterial, SessionKey};

use crate::error::ProtoError;

/// Manual-envelope magic prefix.
pub const MANUAL_MAGIC: &[u8; 4] = b"SS01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

/// Offer/answer signaling payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub sdp: String,
    pub candidates: Vec<String>,
    /// Metadata fields, present only on manual-mode offers.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_bytes: Option<u64>,
}

impl SignalingMessage {
    pub fn offer(sdp: impl Into<String>, candidates: Vec<String>) -> Self {
        Self {
            kind: SignalKind::Offer,
            sdp: sdp.into(),
            candidates,
            content_type: None,
            file_name: None,
            file_size: None,
            mime_type: None,
            total_bytes: None,
        }
    }

    pub fn answer(sdp: impl Into<String>, candidates: Vec<String>) -> Self {
        Self { kind: SignalKind::Answer, ..Self::offer(sdp, candidates) }
    }

    /// Serialize and AEAD-wrap for the relay path (session key).
    pub fn seal(&self, key: &SessionKey) -> Result<Vec<u8>, ProtoError> {
        let json = serde_json::to_vec(self)?;
        Ok(key.encrypt(&json, b"signal")?)
    }

    /// Unwrap and parse a relay-path payload.
    pub fn open(key: &SessionKey, data: &[u8]) -> Result<SignalingMessage, ProtoError> {
        let plaintext = key.decrypt(data, b"signal")?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

// ── Manual envelope ──────────────────────────────────────────────────────────

/// Encode a manual-mode envelope keyed from the PIN with a fresh salt.
pub fn encode_manual(pin: &PinMaterial, msg: &SignalingMessage) -> Result<Vec<u8>, ProtoError> {
    encode_manual_with_salt(pin, msg, &kdf::generate_salt())
}

/// Encode with a caller-chosen salt (the engine reuses the offer's salt to
/// key the subsequent transfer in manual mode).
pub fn encode_manual_with_salt(
    pin: &PinMaterial,
    msg: &SignalingMessage,
    salt: &[u8; SALT_LEN],
) -> Result<Vec<u8>, ProtoError> {
    let json = serde_json::to_vec(msg)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let key = kdf::derive_pin_key(pin, salt);
    let ciphertext = key.encrypt(&compressed, MANUAL_MAGIC)?;

    let mut out = Vec::with_capacity(4 + SALT_LEN + ciphertext.len());
    out.extend_from_slice(MANUAL_MAGIC);
    out.extend_from_slice(salt);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decode a manual-mode envelope.
pub fn decode_manual(pin: &PinMaterial, data: &[u8]) -> Result<SignalingMessage, ProtoError> {
    Ok(decode_manual_detailed(pin, data)?.0)
}

/// Decode, also returning the embedded salt.
pub fn decode_manual_detailed(
    pin: &PinMaterial,
    data: &[u8],
) -> Result<(SignalingMessage, [u8; SALT_LEN]), ProtoError> {
    if data.len() < 4 + SALT_LEN {
        return Err(ProtoError::Malformed("manual payload too short".into()));
    }
    if &data[..4] != MANUAL_MAGIC {
        return Err(ProtoError::BadMagic);
    }
    let salt: [u8; SALT_LEN] = data[4..4 + SALT_LEN].try_into().expect("length checked");
    let key = kdf::derive_pin_key(pin, &salt);
    let compressed = key.decrypt(&data[4 + SALT_LEN..], MANUAL_MAGIC)?;

    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok((serde_json::from_slice(&json)?, salt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_offer() -> SignalingMessage {
        let mut msg = SignalingMessage::offer(
            "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n...",
            vec!["candidate:1 1 UDP 2122252543 192.0.2.1 54321 typ host".into()],
        );
        msg.file_name = Some("x.bin".into());
        msg.file_size = Some(1_000_000);
        msg
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_string(&sample_offer()).unwrap();
        assert!(json.contains("\"type\":\"offer\""));
        assert!(json.contains("\"fileName\""));
        assert!(json.contains("\"fileSize\""));
        assert!(!json.contains("\"mimeType\"")); // None fields omitted
    }

    #[test]
    fn seal_open_roundtrip() {
        let a = ss_crypto::keystore::EphemeralKeyPair::generate();
        let b = ss_crypto::keystore::EphemeralKeyPair::generate();
        let salt = kdf::generate_salt();
        let key_a = a.derive_session_key(b.public_bytes(), &salt).unwrap();
        let key_b = b.derive_session_key(a.public_bytes(), &salt).unwrap();

        let msg = sample_offer();
        let sealed = msg.seal(&key_a).unwrap();
        assert_eq!(SignalingMessage::open(&key_b, &sealed).unwrap(), msg);
    }

    #[test]
    fn manual_envelope_roundtrip() {
        let pin = PinMaterial::new(b"correct-pin!".to_vec());
        let msg = sample_offer();
        let envelope = encode_manual(&pin, &msg).unwrap();
        assert_eq!(&envelope[..4], MANUAL_MAGIC);
        let back = decode_manual(&PinMaterial::new(b"correct-pin!".to_vec()), &envelope).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn manual_envelope_wrong_pin_fails() {
        let pin = PinMaterial::new(b"correct-pin!".to_vec());
        let envelope = encode_manual(&pin, &sample_offer()).unwrap();
        let wrong = PinMaterial::new(b"wrong-pin!!!".to_vec());
        assert!(decode_manual(&wrong, &envelope).is_err());
    }

    #[test]
    fn manual_envelope_bad_magic() {
        let pin = PinMaterial::new(b"correct-pin!".to_vec());
        let mut envelope = encode_manual(&pin, &sample_offer()).unwrap();
        envelope[0] = b'X';
        assert!(matches!(
            decode_manual(&pin, &envelope),
            Err(ProtoError::BadMagic)
        ));
    }
}
