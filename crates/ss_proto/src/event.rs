//! Rendezvous event envelope — what the substrate sees.
//!
//! The substrate is a DUMB RELAY: it only sees:
//!   - id         (hash of the serialized event, no semantic meaning)
//!   - pubkey     (random per-transfer signing key — no identity)
//!   - kind       (handshake 24243 / data 24242)
//!   - created_at (needed for retention TTL)
//!   - tags       (filter hints; hints are one-way, ids are random)
//!   - content    (base64 of AEAD ciphertext — always opaque)
//!   - sig        (Ed25519 over the id, so relays can reject garbage)
//!
//! The substrate CANNOT see: file metadata, plaintext, party identities.
//!
//! The id covers the canonical JSON array
//! `[0, pubkey, created_at, kind, tags, content]`; the signature covers the
//! id bytes. Signing keys are generated per transfer and discarded with it.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProtoError;
use crate::tags::Tags;

/// Data events: acks, chunk notifications, signaling.
pub const KIND_DATA: u32 = 24242;
/// Handshake events.
pub const KIND_HANDSHAKE: u32 = 24243;

/// Default event time-to-live in seconds (1 hour).
pub const EVENT_TTL_SECS: u64 = 60 * 60;

/// Random per-transfer event signing key.
pub struct EventKeypair {
    signing: SigningKey,
}

impl EventKeypair {
    pub fn generate() -> Self {
        Self { signing: SigningKey::generate(&mut OsRng) }
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }
}

/// On-wire rendezvous event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// SHA-256 of the canonical serialization, lowercase hex.
    pub id: String,
    /// Ed25519 verifying key, lowercase hex.
    pub pubkey: String,
    pub kind: u32,
    /// Unix seconds at creation.
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    /// Base64 (url-safe, no pad) of AEAD ciphertext; empty for tag-only
    /// events such as acks.
    pub content: String,
    /// Ed25519 signature over the id bytes, lowercase hex.
    pub sig: String,
}

fn canonical_id(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32], ProtoError> {
    let canonical = serde_json::to_string(&serde_json::json!([
        0, pubkey, created_at, kind, tags, content
    ]))?;
    Ok(Sha256::digest(canonical.as_bytes()).into())
}

impl Event {
    /// Build and sign an event.
    pub fn build(
        keys: &EventKeypair,
        kind: u32,
        created_at: u64,
        tags: Tags,
        content: String,
    ) -> Result<Event, ProtoError> {
        let pubkey = keys.pubkey_hex();
        let tags = tags.into_vec();
        let id = canonical_id(&pubkey, created_at, kind, &tags, &content)?;
        let sig = keys.signing.sign(&id);
        Ok(Event {
            id: hex::encode(id),
            pubkey,
            kind,
            created_at,
            tags,
            content,
            sig: hex::encode(sig.to_bytes()),
        })
    }

    /// Verify id integrity and signature.
    pub fn verify(&self) -> Result<(), ProtoError> {
        let id = canonical_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)?;
        if hex::encode(id) != self.id {
            return Err(ProtoError::EventInvalid("id does not match content".into()));
        }

        let pk_bytes: [u8; 32] = hex::decode(&self.pubkey)
            .map_err(|_| ProtoError::EventInvalid("pubkey is not hex".into()))?
            .try_into()
            .map_err(|_| ProtoError::EventInvalid("pubkey must be 32 bytes".into()))?;
        let vk = VerifyingKey::from_bytes(&pk_bytes)
            .map_err(|_| ProtoError::EventInvalid("invalid pubkey".into()))?;

        let sig_bytes: [u8; 64] = hex::decode(&self.sig)
            .map_err(|_| ProtoError::EventInvalid("sig is not hex".into()))?
            .try_into()
            .map_err(|_| ProtoError::EventInvalid("sig must be 64 bytes".into()))?;
        let sig = Signature::from_bytes(&sig_bytes);

        vk.verify(&id, &sig)
            .map_err(|_| ProtoError::EventSignatureInvalid)
    }

    /// Tag view over this event.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == key)
            .map(|t| t[1].as_str())
    }

    pub fn tags_view(&self) -> Tags {
        Tags::from_vec(self.tags.clone())
    }

    /// Whether the event is past its `expiration` tag or older than the
    /// retention TTL.
    pub fn is_expired(&self, now: u64, ttl_secs: u64) -> bool {
        if let Some(exp) = self.tags_view().expiration() {
            if exp <= now {
                return true;
            }
        }
        self.created_at.saturating_add(ttl_secs) <= now
    }
}
