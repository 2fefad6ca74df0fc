//! Handshake engine.
//!
//! Three modes share one state machine shape:
//!   - **PIN** — the PBKDF2-derived key protects the handshake payload;
//!     the ephemeral key and replay nonce travel inside the ciphertext.
//!   - **Self-transfer passkey** — same passkey on both ends; public
//!     parameters ride in tags, authenticated by the session binding and
//!     key-confirmation values only that passkey can produce.
//!   - **Cross-user pairing key** — identities are bound by a countersigned
//!     pairing record; each side additionally proves current control of
//!     its passkey with a handshake proof MAC.
//!
//! Whatever the mode, the session key is fresh P-256 ECDH output (PFS):
//! compromise of the PIN or of an identity key after the fact does not
//! decrypt a recorded transfer.

use serde::{Deserialize, Serialize};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ss_crypto::pairing::{PairingKey, Party};
use ss_proto::tags::EventType;
use ss_proto::TransferMeta;

use crate::error::TransferError;

mod receiver;
mod sender;

pub use receiver::{
    exhausted_error, select_candidate, AcceptedHandshake, CandidateOutcome, ReceiverHandshake,
};
pub use sender::SenderHandshake;

/// Replay nonce length in bytes (`n` tag).
pub const NONCE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    Pin,
    SelfTransfer,
    CrossUser,
}

impl HandshakeMode {
    pub fn handshake_event_type(self) -> EventType {
        match self {
            HandshakeMode::Pin => EventType::PinExchange,
            HandshakeMode::SelfTransfer => EventType::MutualTrust,
            HandshakeMode::CrossUser => EventType::MutualTrustHandshake,
        }
    }

    pub fn ready_ack_type(self) -> EventType {
        match self {
            HandshakeMode::CrossUser => EventType::MutualTrustPayload,
            _ => EventType::Ack,
        }
    }
}

/// Encrypted content of a handshake event.
#[derive(Debug, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub meta: TransferMeta,
    /// Sender ephemeral key, base64 — PIN mode only (passkey modes carry
    /// it in the `epk` tag).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub epk: Option<String>,
    /// Replay nonce, base64 — PIN mode only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nonce: Option<String>,
    /// Sender's copy of the pairing key — cross-user mode only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pairing_key: Option<PairingKey>,
}

/// Encrypted content of a PIN-mode ready ACK.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyAckPayload {
    /// Receiver ephemeral key, base64.
    pub epk: String,
    /// Echo of the sender's replay nonce, base64.
    pub nonce: String,
}

pub(crate) fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub(crate) fn b64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub(crate) fn b64_decode(s: &str, what: &str) -> Result<Vec<u8>, TransferError> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| TransferError::Protocol(format!("{what} is not valid base64")))
}

pub(crate) fn b64_array<const LEN: usize>(s: &str, what: &str) -> Result<[u8; LEN], TransferError> {
    b64_decode(s, what)?
        .try_into()
        .map_err(|_| TransferError::Protocol(format!("{what} must be {LEN} bytes")))
}

/// Pairing-record context shared by both handshake sides in cross-user
/// mode: the local party's slot plus the peer's public values.
pub(crate) struct PairingContext {
    pub record: PairingKey,
    pub peer_slot: Party,
    pub peer_id: [u8; 32],
    pub peer_ppk: [u8; 32],
    pub peer_fingerprint: String,
}

impl PairingContext {
    /// Verify our own signature on the record and resolve the peer slot.
    pub fn resolve(
        record: PairingKey,
        identity: &ss_crypto::identity::Identity,
    ) -> Result<Self, TransferError> {
        if !record.is_complete() {
            return Err(TransferError::PairingKeyInvalid(
                "record is not countersigned".into(),
            ));
        }
        let own_slot = record.verify_own_signature(identity)?;
        let peer_slot = own_slot.other();
        let peer_id = record.id_bytes(peer_slot)?;
        let peer_ppk = record.ppk_bytes(peer_slot)?;
        let peer_fingerprint = record.fingerprint_of(peer_slot)?;
        Ok(Self { record, peer_slot, peer_id, peer_ppk, peer_fingerprint })
    }
}
