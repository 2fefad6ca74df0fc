//! Sender half of the handshake.
//!
//! Builds the handshake event for the chosen mode and verifies the
//! receiver's ready ACK before releasing the session key. Every comparison
//! of a nonce, binding or proof is constant time; a failed ACK never
//! reveals which check failed beyond the error string.

use ss_crypto::ct::{ct_eq, ct_eq_str};
use ss_crypto::identity::{self, Identity};
use ss_crypto::kdf::{self, SALT_LEN};
use ss_crypto::keystore::{EphemeralKeyPair, SessionKey};
use ss_crypto::pairing::PairingKey;
use ss_crypto::pin::Pin;
use ss_proto::event::{Event, EventKeypair, KIND_HANDSHAKE};
use ss_proto::tags::{self, Tags};
use ss_proto::{TransferId, TransferMeta};

use crate::config::unix_now;
use crate::error::TransferError;
use crate::handshake::{
    b64, b64_array, generate_nonce, HandshakeMode, HandshakePayload, PairingContext,
    ReadyAckPayload, NONCE_LEN,
};

pub struct SenderHandshake {
    pub mode: HandshakeMode,
    pub salt: [u8; SALT_LEN],
    pub ephemeral: EphemeralKeyPair,
    nonce: [u8; NONCE_LEN],
    /// Receiver-side filter hint (`h` tag value).
    hint: String,
    content_key: SessionKey,
    identity: Option<Identity>,
    pairing: Option<PairingContext>,
}

impl SenderHandshake {
    pub fn for_pin(pin: &Pin) -> Result<Self, TransferError> {
        let salt = kdf::generate_salt();
        let content_key = kdf::derive_pin_key(&pin.material(), &salt);
        Ok(Self {
            mode: HandshakeMode::Pin,
            salt,
            ephemeral: EphemeralKeyPair::generate(),
            nonce: generate_nonce(),
            hint: pin.hint(),
            content_key,
            identity: None,
            pairing: None,
        })
    }

    pub fn for_self_transfer(identity: Identity) -> Result<Self, TransferError> {
        let salt = kdf::generate_salt();
        let content_key = identity.payload_key(&identity.ppk().to_owned(), &salt)?;
        Ok(Self {
            mode: HandshakeMode::SelfTransfer,
            salt,
            ephemeral: EphemeralKeyPair::generate(),
            nonce: generate_nonce(),
            hint: identity.fingerprint(),
            content_key,
            identity: Some(identity),
            pairing: None,
        })
    }

    pub fn for_cross_user(identity: Identity, record: PairingKey) -> Result<Self, TransferError> {
        let pairing = PairingContext::resolve(record, &identity)?;
        let salt = kdf::generate_salt();
        let content_key = identity.payload_key(&pairing.peer_ppk, &salt)?;
        Ok(Self {
            mode: HandshakeMode::CrossUser,
            salt,
            ephemeral: EphemeralKeyPair::generate(),
            nonce: generate_nonce(),
            hint: pairing.peer_fingerprint.clone(),
            content_key,
            identity: Some(identity),
            pairing: Some(pairing),
        })
    }

    /// The fingerprint shown to the user while waiting (passkey modes).
    pub fn own_fingerprint(&self) -> Option<String> {
        self.identity.as_ref().map(|id| id.fingerprint())
    }

    /// Peer fingerprint recorded on the session.
    pub fn peer_fingerprint(&self) -> Option<String> {
        match self.mode {
            HandshakeMode::Pin => None,
            HandshakeMode::SelfTransfer => self.own_fingerprint(),
            HandshakeMode::CrossUser => {
                self.pairing.as_ref().map(|p| p.peer_fingerprint.clone())
            }
        }
    }

    /// Build the signed handshake event.
    pub fn build_event(
        &self,
        keys: &EventKeypair,
        transfer_id: &TransferId,
        meta: &TransferMeta,
        ttl_secs: u64,
    ) -> Result<Event, TransferError> {
        let now = unix_now();
        let mut tag_list = Tags::new()
            .push(tags::H, self.hint.clone())
            .push(tags::S, b64(&self.salt))
            .push(tags::T, transfer_id.as_str())
            .push(tags::TYPE, self.mode.handshake_event_type().as_str())
            .push(tags::EXPIRATION, (now + ttl_secs).to_string());

        let mut payload = HandshakePayload {
            meta: meta.clone(),
            epk: None,
            nonce: None,
            pairing_key: None,
        };

        match self.mode {
            HandshakeMode::Pin => {
                payload.epk = Some(b64(self.ephemeral.public_bytes()));
                payload.nonce = Some(b64(&self.nonce));
            }
            HandshakeMode::SelfTransfer => {
                let id = self.identity.as_ref().expect("self-transfer has identity");
                let epk = self.ephemeral.public_bytes();
                tag_list = tag_list
                    .push(tags::SPK, id.fingerprint())
                    .push(tags::KC, b64(&id.key_confirmation(id.ppk(), &self.salt)?))
                    .push(tags::RPKC, identity::receiver_commitment(id.public_id()))
                    .push(tags::N, b64(&self.nonce))
                    .push(tags::EPK, b64(epk))
                    .push(tags::ESB, b64(&id.session_binding(id.ppk(), epk)?));
            }
            HandshakeMode::CrossUser => {
                let id = self.identity.as_ref().expect("cross-user has identity");
                let pairing = self.pairing.as_ref().expect("cross-user has pairing");
                let epk = self.ephemeral.public_bytes();
                tag_list = tag_list
                    .push(tags::SPK, id.fingerprint())
                    .push(tags::RPKC, identity::receiver_commitment(&pairing.peer_id))
                    .push(tags::N, b64(&self.nonce))
                    .push(tags::EPK, b64(epk))
                    .push(
                        tags::HP,
                        b64(&id.handshake_proof(
                            &pairing.peer_ppk,
                            epk,
                            &self.nonce,
                            &pairing.peer_fingerprint,
                        )),
                    );
                payload.pairing_key = Some(pairing.record.clone());
            }
        }

        let plaintext = serde_json::to_vec(&payload)
            .map_err(|e| TransferError::Protocol(e.to_string()))?;
        let content = b64(&self.content_key.encrypt(&plaintext, b"handshake")?);
        Ok(Event::build(keys, KIND_HANDSHAKE, now, tag_list, content)?)
    }

    /// Verify a candidate ready ACK. Returns the receiver's ephemeral key
    /// on success; callers skip candidates that fail.
    pub fn verify_ready_ack(&self, event: &Event) -> Result<Vec<u8>, TransferError> {
        let view = event.tags_view();
        if view.event_type() != Some(self.mode.ready_ack_type()) || view.seq() != Some(0) {
            return Err(TransferError::Protocol("not a ready ACK".into()));
        }

        match self.mode {
            HandshakeMode::Pin => {
                let content = b64_decode_content(event)?;
                let plaintext = self.content_key.decrypt(&content, b"ready-ack")?;
                let ack: ReadyAckPayload = serde_json::from_slice(&plaintext)
                    .map_err(|e| TransferError::Protocol(e.to_string()))?;
                let nonce: [u8; NONCE_LEN] = b64_array(&ack.nonce, "ack nonce")?;
                if !ct_eq(&nonce, &self.nonce) {
                    return Err(TransferError::HandshakeRejected("nonce mismatch".into()));
                }
                b64_decode(&ack.epk)
            }
            HandshakeMode::SelfTransfer => {
                let id = self.identity.as_ref().expect("self-transfer has identity");
                self.check_nonce_echo(&view)?;
                let peer_epk = tag_bytes(&view, tags::EPK)?;
                let esb = b64_array::<32>(
                    view.get(tags::ESB)
                        .ok_or_else(|| missing(tags::ESB))?,
                    "esb",
                )?;
                let expected = id.session_binding(id.ppk(), &peer_epk)?;
                if !ct_eq(&expected, &esb) {
                    return Err(TransferError::HandshakeRejected(
                        "receiver session binding failed".into(),
                    ));
                }
                Ok(peer_epk)
            }
            HandshakeMode::CrossUser => {
                let pairing = self.pairing.as_ref().expect("cross-user has pairing");
                let id = self.identity.as_ref().expect("cross-user has identity");
                self.check_nonce_echo(&view)?;
                let peer_epk = tag_bytes(&view, tags::EPK)?;
                let proof = b64_array::<32>(
                    view.get(tags::HP).ok_or_else(|| missing(tags::HP))?,
                    "handshake proof",
                )?;
                let peer_vs = pairing.record.verification_secret_of(pairing.peer_slot)?;
                let expected = identity::proof_with_secret(
                    &peer_vs,
                    &peer_epk,
                    &self.nonce,
                    &id.fingerprint(),
                );
                if !ct_eq(&expected, &proof) {
                    return Err(TransferError::HandshakeRejected(
                        "receiver handshake proof failed".into(),
                    ));
                }
                Ok(peer_epk)
            }
        }
    }

    fn check_nonce_echo(&self, view: &Tags) -> Result<(), TransferError> {
        let echoed = view.get(tags::N).ok_or_else(|| missing(tags::N))?;
        if !ct_eq_str(echoed, &b64(&self.nonce)) {
            return Err(TransferError::HandshakeRejected("nonce mismatch".into()));
        }
        Ok(())
    }

    /// Derive the PFS session key from the receiver's ephemeral key.
    pub fn session_key(&self, peer_epk: &[u8]) -> Result<SessionKey, TransferError> {
        Ok(self.ephemeral.derive_session_key(peer_epk, &self.salt)?)
    }
}

fn missing(tag: &str) -> TransferError {
    TransferError::HandshakeRejected(format!("missing {tag} tag"))
}

fn tag_bytes(view: &Tags, key: &str) -> Result<Vec<u8>, TransferError> {
    b64_decode(view.get(key).ok_or_else(|| missing(key))?)
}

fn b64_decode(s: &str) -> Result<Vec<u8>, TransferError> {
    crate::handshake::b64_decode(s, "tag value")
}

fn b64_decode_content(event: &Event) -> Result<Vec<u8>, TransferError> {
    crate::handshake::b64_decode(&event.content, "event content")
}
