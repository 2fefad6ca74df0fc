//! Established transfer session.
//!
//! Created after key confirmation, destroyed on completion, cancellation
//! or TTL expiry. The AEAD key inside is the non-extractable handle from
//! `ss_crypto`; dropping the session is the only way to dispose of it.

use ss_crypto::keystore::SessionKey;
use ss_proto::{TransferId, TransferMeta};

pub struct Session {
    pub key: SessionKey,
    pub transfer_id: TransferId,
    pub meta: TransferMeta,
    /// Peer fingerprint (passkey modes; `None` in PIN mode).
    pub peer_fingerprint: Option<String>,
    /// Monotone ACK cursor: 0 ready, 1..=n per chunk, -1 completion.
    ack_cursor: i64,
}

impl Session {
    pub fn new(
        key: SessionKey,
        transfer_id: TransferId,
        meta: TransferMeta,
        peer_fingerprint: Option<String>,
    ) -> Self {
        Self { key, transfer_id, meta, peer_fingerprint, ack_cursor: 0 }
    }

    /// Record an ACK. Per-chunk acks must advance by one; `-1` terminates.
    /// Returns `false` for out-of-order or replayed acks, which callers
    /// discard.
    pub fn advance_ack(&mut self, seq: i64) -> bool {
        if seq == -1 {
            self.ack_cursor = -1;
            return true;
        }
        if self.ack_cursor == -1 || seq != self.ack_cursor + 1 {
            return false;
        }
        self.ack_cursor = seq;
        true
    }

    pub fn ack_cursor(&self) -> i64 {
        self.ack_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ss_crypto::keystore::EphemeralKeyPair;
    use ss_proto::transfer::DIRECT_CHUNK_SIZE;

    fn session() -> Session {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let key = a.derive_session_key(b.public_bytes(), &[0u8; 16]).unwrap();
        let meta = TransferMeta::for_payload(
            "x.bin",
            "application/octet-stream",
            1000,
            DIRECT_CHUNK_SIZE,
            u64::MAX,
        )
        .unwrap();
        Session::new(key, TransferId::generate(), meta, None)
    }

    #[test]
    fn ack_cursor_is_monotone() {
        let mut s = session();
        assert!(s.advance_ack(1));
        assert!(!s.advance_ack(1)); // replay
        assert!(!s.advance_ack(3)); // gap
        assert!(s.advance_ack(2));
        assert!(s.advance_ack(-1));
        assert!(!s.advance_ack(3)); // after completion
    }
}
