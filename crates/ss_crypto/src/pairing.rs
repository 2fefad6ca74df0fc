//! Pairing keys — dual-HMAC countersigned records.
//!
//! A pairing key binds two party identities (`public_id` + identity DH key
//! `ppk`) together so that later transfers can skip the PIN. HMAC is a
//! shared-secret primitive, so each party can only ever verify the half it
//! signed itself; trust that the peer signed the other half is established
//! out-of-band when the record is exchanged.
//!
//! Both signatures cover the same challenge:
//!   H = SHA-256(a_id ‖ a_ppk ‖ b_id ‖ b_ppk ‖ iat_be64 ‖ comment_utf8?)
//!
//! Each party also contributes a verification secret bound to the *peer's*
//! ppk. During a handshake the prover recomputes its own secret from its
//! passkey-derived HMAC key and MACs the session parameters with it; the
//! verifier compares against the secret stored in the record. A stolen
//! record alone cannot produce the prover side of that exchange.
//!
//! The record travels as canonical JSON (field order is fixed by struct
//! declaration order; `parse(serialize(r)) == r`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ct::ct_eq;
use crate::error::CryptoError;
use crate::identity::{fingerprint_hex, Identity, PPK_LEN, PUBLIC_ID_LEN};

/// Maximum age of `iat` at create and countersign time.
pub const MAX_AGE_SECS: u64 = 24 * 60 * 60;
/// Maximum comment length in bytes.
pub const MAX_COMMENT_BYTES: usize = 256;

/// Which record slot a party occupies (`a_id < b_id` lexicographically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Party {
    #[serde(rename = "a")]
    A,
    #[serde(rename = "b")]
    B,
}

impl Party {
    pub fn other(self) -> Party {
        match self {
            Party::A => Party::B,
            Party::B => Party::A,
        }
    }
}

/// A pairing-key record. Pending until `counter_sig`/`counter_vs` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingKey {
    /// Party A public id, base64 (32 bytes). Always the lexicographically
    /// smaller of the two ids.
    pub a_id: String,
    /// Party A identity DH public key, base64 (32 bytes).
    pub a_ppk: String,
    pub b_id: String,
    pub b_ppk: String,
    /// Unix seconds at request creation.
    pub iat: u64,
    /// Which party authored the request.
    pub init_party: Party,
    /// Initiator's HMAC-SHA-256 over the challenge, base64.
    pub init_sig: String,
    /// Initiator's verification secret, bound to the counterparty's ppk.
    pub init_vs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_sig: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_vs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn b64_32(s: &str, field: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| CryptoError::PairingMalformed(format!("{field} is not valid base64")))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::PairingMalformed(format!("{field} must be 32 bytes")))
}

impl PairingKey {
    // ── Construction ─────────────────────────────────────────────────────

    /// Build a pending pairing request from `identity` towards a peer.
    pub fn create_request(
        identity: &Identity,
        peer_id: &[u8; PUBLIC_ID_LEN],
        peer_ppk: &[u8; PPK_LEN],
        iat: u64,
        now: u64,
        comment: Option<String>,
    ) -> Result<PairingKey, CryptoError> {
        if peer_id == identity.public_id() {
            return Err(CryptoError::PairingMalformed(
                "cannot pair an identity with itself".into(),
            ));
        }
        if let Some(ref c) = comment {
            if c.len() > MAX_COMMENT_BYTES {
                return Err(CryptoError::PairingMalformed("comment too long".into()));
            }
        }
        if now.saturating_sub(iat) > MAX_AGE_SECS {
            return Err(CryptoError::PairingExpired);
        }

        let own_id = identity.public_id();
        let own_ppk = identity.ppk();

        // Slot assignment: smaller id takes the `a` slot.
        let (init_party, a_id, a_ppk, b_id, b_ppk) = if own_id < peer_id {
            (Party::A, own_id, own_ppk, peer_id, peer_ppk)
        } else {
            (Party::B, peer_id, peer_ppk, own_id, own_ppk)
        };

        let mut record = PairingKey {
            a_id: URL_SAFE_NO_PAD.encode(a_id),
            a_ppk: URL_SAFE_NO_PAD.encode(a_ppk),
            b_id: URL_SAFE_NO_PAD.encode(b_id),
            b_ppk: URL_SAFE_NO_PAD.encode(b_ppk),
            iat,
            init_party,
            init_sig: String::new(),
            init_vs: String::new(),
            counter_sig: None,
            counter_vs: None,
            comment,
        };
        let challenge = record.challenge()?;
        record.init_sig = URL_SAFE_NO_PAD.encode(identity.hmac_sign(&challenge));
        record.init_vs = URL_SAFE_NO_PAD.encode(&identity.verification_secret(peer_ppk)[..]);
        Ok(record)
    }

    /// Countersign a pending request, completing the record.
    pub fn countersign(
        request: &PairingKey,
        identity: &Identity,
        now: u64,
    ) -> Result<PairingKey, CryptoError> {
        request.validate()?;
        if request.counter_sig.is_some() || request.counter_vs.is_some() {
            return Err(CryptoError::PairingMalformed(
                "request is already countersigned".into(),
            ));
        }
        if now.saturating_sub(request.iat) > MAX_AGE_SECS {
            return Err(CryptoError::PairingExpired);
        }

        let own_slot = request
            .slot_of(identity.public_id())?
            .ok_or(CryptoError::NotAParty)?;
        if own_slot == request.init_party {
            // The initiator cannot countersign its own request.
            return Err(CryptoError::SlotMismatch);
        }
        if !ct_eq(&request.ppk_bytes(own_slot)?, identity.ppk()) {
            return Err(CryptoError::SlotMismatch);
        }

        let initiator_ppk = request.ppk_bytes(request.init_party)?;
        let challenge = request.challenge()?;

        let mut completed = request.clone();
        completed.counter_sig = Some(URL_SAFE_NO_PAD.encode(identity.hmac_sign(&challenge)));
        completed.counter_vs = Some(
            URL_SAFE_NO_PAD.encode(&identity.verification_secret(&initiator_ppk)[..]),
        );
        Ok(completed)
    }

    // ── Parsing and validation ───────────────────────────────────────────

    /// Parse a record from canonical JSON. With `own_id`, additionally
    /// require that identity to occupy one of the slots.
    pub fn parse(json: &str, own_id: Option<&[u8; PUBLIC_ID_LEN]>) -> Result<PairingKey, CryptoError> {
        let record: PairingKey = serde_json::from_str(json)
            .map_err(|e| CryptoError::PairingMalformed(e.to_string()))?;
        record.validate()?;
        if let Some(id) = own_id {
            record.slot_of(id)?.ok_or(CryptoError::NotAParty)?;
        }
        Ok(record)
    }

    /// Serialize to canonical JSON.
    pub fn to_json(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<(), CryptoError> {
        let a_id = b64_32(&self.a_id, "a_id")?;
        let b_id = b64_32(&self.b_id, "b_id")?;
        b64_32(&self.a_ppk, "a_ppk")?;
        b64_32(&self.b_ppk, "b_ppk")?;
        b64_32(&self.init_sig, "init_sig")?;
        b64_32(&self.init_vs, "init_vs")?;
        if let Some(ref s) = self.counter_sig {
            b64_32(s, "counter_sig")?;
        }
        if let Some(ref s) = self.counter_vs {
            b64_32(s, "counter_vs")?;
        }
        if self.counter_sig.is_some() != self.counter_vs.is_some() {
            return Err(CryptoError::PairingMalformed(
                "counter_sig and counter_vs must be set together".into(),
            ));
        }
        if a_id >= b_id {
            return Err(CryptoError::PairingMalformed(
                "a_id must be lexicographically smaller than b_id".into(),
            ));
        }
        if let Some(ref c) = self.comment {
            if c.len() > MAX_COMMENT_BYTES {
                return Err(CryptoError::PairingMalformed("comment too long".into()));
            }
        }
        Ok(())
    }

    /// Whether the record carries both signatures.
    pub fn is_complete(&self) -> bool {
        self.counter_sig.is_some()
    }

    // ── Signature verification ───────────────────────────────────────────

    /// Verify the signature this identity produced (only one's own HMAC is
    /// verifiable). Returns the slot the identity occupies.
    pub fn verify_own_signature(&self, identity: &Identity) -> Result<Party, CryptoError> {
        self.validate()?;
        let slot = self
            .slot_of(identity.public_id())?
            .ok_or(CryptoError::NotAParty)?;

        let challenge = self.challenge()?;
        let expected = identity.hmac_sign(&challenge);

        let own_sig = if slot == self.init_party {
            b64_32(&self.init_sig, "init_sig")?
        } else {
            let sig = self
                .counter_sig
                .as_deref()
                .ok_or(CryptoError::SignatureInvalid)?;
            b64_32(sig, "counter_sig")?
        };
        if !ct_eq(&expected, &own_sig) {
            return Err(CryptoError::SignatureInvalid);
        }
        Ok(slot)
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// Challenge hash both signatures cover.
    pub fn challenge(&self) -> Result<[u8; 32], CryptoError> {
        let mut hasher = Sha256::new();
        hasher.update(b64_32(&self.a_id, "a_id")?);
        hasher.update(b64_32(&self.a_ppk, "a_ppk")?);
        hasher.update(b64_32(&self.b_id, "b_id")?);
        hasher.update(b64_32(&self.b_ppk, "b_ppk")?);
        hasher.update(self.iat.to_be_bytes());
        if let Some(ref c) = self.comment {
            hasher.update(c.as_bytes());
        }
        Ok(hasher.finalize().into())
    }

    /// Which slot a public id occupies, if any.
    pub fn slot_of(&self, public_id: &[u8; PUBLIC_ID_LEN]) -> Result<Option<Party>, CryptoError> {
        if ct_eq(&b64_32(&self.a_id, "a_id")?, public_id) {
            Ok(Some(Party::A))
        } else if ct_eq(&b64_32(&self.b_id, "b_id")?, public_id) {
            Ok(Some(Party::B))
        } else {
            Ok(None)
        }
    }

    pub fn id_bytes(&self, party: Party) -> Result<[u8; 32], CryptoError> {
        match party {
            Party::A => b64_32(&self.a_id, "a_id"),
            Party::B => b64_32(&self.b_id, "b_id"),
        }
    }

    pub fn ppk_bytes(&self, party: Party) -> Result<[u8; 32], CryptoError> {
        match party {
            Party::A => b64_32(&self.a_ppk, "a_ppk"),
            Party::B => b64_32(&self.b_ppk, "b_ppk"),
        }
    }

    /// The verification secret a party contributed (initiator contributed
    /// `init_vs`, the counterparty `counter_vs`).
    pub fn verification_secret_of(&self, party: Party) -> Result<[u8; 32], CryptoError> {
        if party == self.init_party {
            b64_32(&self.init_vs, "init_vs")
        } else {
            let vs = self
                .counter_vs
                .as_deref()
                .ok_or_else(|| CryptoError::PairingMalformed("record is not countersigned".into()))?;
            b64_32(vs, "counter_vs")
        }
    }

    /// Fingerprint of a slot's public id.
    pub fn fingerprint_of(&self, party: Party) -> Result<String, CryptoError> {
        Ok(fingerprint_hex(&self.id_bytes(party)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MasterKey;

    const NOW: u64 = 1_700_000_000;

    fn identity(seed: u8) -> Identity {
        MasterKey::from_prf_output([seed; 32]).derive_identity().unwrap()
    }

    fn paired() -> (Identity, Identity, PairingKey) {
        let alice = identity(1);
        let bob = identity(2);
        let request = PairingKey::create_request(
            &alice,
            bob.public_id(),
            bob.ppk(),
            NOW,
            NOW,
            Some("laptop ↔ phone".into()),
        )
        .unwrap();
        let complete = PairingKey::countersign(&request, &bob, NOW + 60).unwrap();
        (alice, bob, complete)
    }

    #[test]
    fn create_countersign_verify_roles() {
        let (alice, bob, record) = paired();
        assert!(record.is_complete());

        let alice_slot = record.verify_own_signature(&alice).unwrap();
        let bob_slot = record.verify_own_signature(&bob).unwrap();
        assert_ne!(alice_slot, bob_slot);
    }

    #[test]
    fn third_party_is_not_a_party() {
        let (_, _, record) = paired();
        let eve = identity(9);
        assert!(matches!(
            record.verify_own_signature(&eve),
            Err(CryptoError::NotAParty)
        ));
    }

    #[test]
    fn json_roundtrip_preserves_record() {
        let (alice, _, record) = paired();
        let json = record.to_json().unwrap();
        let parsed = PairingKey::parse(&json, Some(alice.public_id())).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn tampered_comment_breaks_signature() {
        let (alice, _, record) = paired();
        let mut tampered = record.clone();
        tampered.comment = Some("desktop ↔ phone".into());
        assert!(matches!(
            tampered.verify_own_signature(&alice),
            Err(CryptoError::SignatureInvalid)
        ));
    }

    #[test]
    fn stale_request_is_rejected() {
        let alice = identity(1);
        let bob = identity(2);
        let request = PairingKey::create_request(
            &alice,
            bob.public_id(),
            bob.ppk(),
            NOW,
            NOW,
            None,
        )
        .unwrap();
        let err = PairingKey::countersign(&request, &bob, NOW + MAX_AGE_SECS + 1);
        assert!(matches!(err, Err(CryptoError::PairingExpired)));
    }

    #[test]
    fn initiator_cannot_countersign_own_request() {
        let alice = identity(1);
        let bob = identity(2);
        let request =
            PairingKey::create_request(&alice, bob.public_id(), bob.ppk(), NOW, NOW, None)
                .unwrap();
        assert!(matches!(
            PairingKey::countersign(&request, &alice, NOW),
            Err(CryptoError::SlotMismatch)
        ));
    }

    #[test]
    fn countersign_requires_matching_ppk() {
        let alice = identity(1);
        let bob = identity(2);
        // Alice claims a bogus ppk for Bob's slot
        let request = PairingKey::create_request(
            &alice,
            bob.public_id(),
            identity(3).ppk(),
            NOW,
            NOW,
            None,
        )
        .unwrap();
        assert!(matches!(
            PairingKey::countersign(&request, &bob, NOW),
            Err(CryptoError::SlotMismatch)
        ));
    }

    #[test]
    fn slot_order_is_independent_of_initiator() {
        let alice = identity(1);
        let bob = identity(2);
        let from_alice =
            PairingKey::create_request(&alice, bob.public_id(), bob.ppk(), NOW, NOW, None)
                .unwrap();
        let from_bob =
            PairingKey::create_request(&bob, alice.public_id(), alice.ppk(), NOW, NOW, None)
                .unwrap();
        assert_eq!(from_alice.a_id, from_bob.a_id);
        assert_eq!(from_alice.b_id, from_bob.b_id);
        assert_ne!(from_alice.init_party, from_bob.init_party);
    }

    #[test]
    fn verification_secrets_cross_bind() {
        let (alice, bob, record) = paired();
        let alice_slot = record.slot_of(alice.public_id()).unwrap().unwrap();

        // The secret stored for Alice's slot equals what Alice recomputes
        // against Bob's ppk, and vice versa.
        let stored_alice = record.verification_secret_of(alice_slot).unwrap();
        assert_eq!(stored_alice, *alice.verification_secret(bob.ppk()));

        let stored_bob = record.verification_secret_of(alice_slot.other()).unwrap();
        assert_eq!(stored_bob, *bob.verification_secret(alice.ppk()));
    }
}
