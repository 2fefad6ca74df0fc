//! Event tags.
//!
//! Tags are `[key, value]` string pairs on a rendezvous event. The relay
//! indexes single-letter keys for filtering; everything else is opaque to
//! it. Values are hex, base64 or decimal strings depending on the key —
//! the typed accessors live on [`Tags`].

use serde::{Deserialize, Serialize};

/// Receiver-side filter hint: 8 hex (PIN hint) or 16 hex (fingerprint).
pub const H: &str = "h";
/// Transfer id, 16 hex.
pub const T: &str = "t";
/// Per-transfer salt, base64 (16 bytes).
pub const S: &str = "s";
/// Event type discriminator (see [`EventType`]).
pub const TYPE: &str = "type";
/// Expiration, unix seconds.
pub const EXPIRATION: &str = "expiration";
/// ACK ordering: 0 ready, >0 per-chunk, -1 completion.
pub const SEQ: &str = "seq";
/// Sender fingerprint, 16 hex (passkey modes).
pub const SPK: &str = "spk";
/// Key-confirmation hash, base64 (32 bytes).
pub const KC: &str = "kc";
/// Receiver public-ID commitment, 32 hex chars.
pub const RPKC: &str = "rpkc";
/// Replay nonce, base64 (16 bytes).
pub const N: &str = "n";
/// Ephemeral public key, base64 (65 bytes, uncompressed P-256).
pub const EPK: &str = "epk";
/// Session binding, base64 (32 bytes).
pub const ESB: &str = "esb";
/// Handshake proof, base64 (32 bytes, cross-user mode).
pub const HP: &str = "hp";

/// Event `type` tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// PIN-mode handshake.
    PinExchange,
    /// Self-transfer passkey handshake.
    MutualTrust,
    /// Cross-user pairing-key handshake.
    MutualTrustHandshake,
    /// Cross-user ready ACK.
    MutualTrustPayload,
    /// Cloud-fallback chunk notification.
    ChunkNotify,
    /// Ready / per-chunk / completion acknowledgment.
    Ack,
    /// Encrypted NAT-traversal signaling.
    Signal,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PinExchange => "pin_exchange",
            EventType::MutualTrust => "mutual_trust",
            EventType::MutualTrustHandshake => "mutual_trust_handshake",
            EventType::MutualTrustPayload => "mutual_trust_payload",
            EventType::ChunkNotify => "chunk_notify",
            EventType::Ack => "ack",
            EventType::Signal => "signal",
        }
    }

    pub fn parse(s: &str) -> Option<EventType> {
        Some(match s {
            "pin_exchange" => EventType::PinExchange,
            "mutual_trust" => EventType::MutualTrust,
            "mutual_trust_handshake" => EventType::MutualTrustHandshake,
            "mutual_trust_payload" => EventType::MutualTrustPayload,
            "chunk_notify" => EventType::ChunkNotify,
            "ack" => EventType::Ack,
            "signal" => EventType::Signal,
            _ => return None,
        })
    }

    /// Whether this type is a handshake opener (as opposed to in-transfer
    /// data).
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            EventType::PinExchange | EventType::MutualTrust | EventType::MutualTrustHandshake
        )
    }
}

/// Tag list builder / reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<Vec<String>>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_vec(tags: Vec<Vec<String>>) -> Self {
        Self(tags)
    }

    pub fn push(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.push(vec![key.to_string(), value.into()]);
        self
    }

    pub fn push_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.push(key, v),
            None => self,
        }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|t| t.len() >= 2 && t[0] == key)
            .map(|t| t[1].as_str())
    }

    pub fn event_type(&self) -> Option<EventType> {
        self.get(TYPE).and_then(EventType::parse)
    }

    pub fn seq(&self) -> Option<i64> {
        self.get(SEQ).and_then(|v| v.parse().ok())
    }

    pub fn expiration(&self) -> Option<u64> {
        self.get(EXPIRATION).and_then(|v| v.parse().ok())
    }

    pub fn into_vec(self) -> Vec<Vec<String>> {
        self.0
    }

    pub fn as_slice(&self) -> &[Vec<String>] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_lookup() {
        let tags = Tags::new()
            .push(T, "00ff00ff00ff00ff")
            .push(TYPE, EventType::Ack.as_str())
            .push(SEQ, "-1")
            .push_opt(KC, None::<String>);
        assert_eq!(tags.get(T), Some("00ff00ff00ff00ff"));
        assert_eq!(tags.event_type(), Some(EventType::Ack));
        assert_eq!(tags.seq(), Some(-1));
        assert_eq!(tags.get(KC), None);
    }

    #[test]
    fn event_type_strings_roundtrip() {
        for ty in [
            EventType::PinExchange,
            EventType::MutualTrust,
            EventType::MutualTrustHandshake,
            EventType::MutualTrustPayload,
            EventType::ChunkNotify,
            EventType::Ack,
            EventType::Signal,
        ] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::parse("bogus"), None);
    }
}
