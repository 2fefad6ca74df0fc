//! Receiver half of the handshake.
//!
//! Candidate events are inspected newest-first. A candidate that fails
//! decryption or any verification duty does NOT terminate the search — the
//! next candidate is tried, and only an exhausted list produces an error.
//! Verification duties run in a fixed order; all value comparisons are
//! constant time.

use ss_crypto::ct::{ct_eq, ct_eq_str};
use ss_crypto::identity::{self, Identity};
use ss_crypto::kdf::{self, SALT_LEN};
use ss_crypto::keystore::{EphemeralKeyPair, SessionKey};
use ss_crypto::pairing::PairingKey;
use ss_crypto::pin::Pin;
use ss_proto::event::{Event, EventKeypair, KIND_DATA};
use ss_proto::tags::{self, Tags};
use ss_proto::{TransferId, TransferMeta};

use crate::config::unix_now;
use crate::error::TransferError;
use crate::handshake::{
    b64, b64_array, b64_decode, HandshakeMode, HandshakePayload, PairingContext, ReadyAckPayload,
    NONCE_LEN,
};

pub struct ReceiverHandshake {
    pub mode: HandshakeMode,
    pin: Option<Pin>,
    identity: Option<Identity>,
    pairing: Option<PairingContext>,
}

/// A handshake event that passed every verification duty.
pub struct AcceptedHandshake {
    pub meta: TransferMeta,
    pub transfer_id: TransferId,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub sender_epk: Vec<u8>,
    pub content_key: SessionKey,
    pub peer_fingerprint: Option<String>,
}

impl ReceiverHandshake {
    pub fn for_pin(pin: Pin) -> Self {
        Self { mode: HandshakeMode::Pin, pin: Some(pin), identity: None, pairing: None }
    }

    pub fn for_self_transfer(identity: Identity) -> Self {
        Self {
            mode: HandshakeMode::SelfTransfer,
            pin: None,
            identity: Some(identity),
            pairing: None,
        }
    }

    pub fn for_cross_user(identity: Identity, record: PairingKey) -> Result<Self, TransferError> {
        let pairing = PairingContext::resolve(record, &identity)?;
        Ok(Self {
            mode: HandshakeMode::CrossUser,
            pin: None,
            identity: Some(identity),
            pairing: Some(pairing),
        })
    }

    /// Filter hint this receiver subscribes with: the 8-hex PIN hint in PIN
    /// mode, the 16-hex own fingerprint in passkey modes.
    pub fn hint(&self) -> String {
        match self.mode {
            HandshakeMode::Pin => self.pin.as_ref().expect("pin mode has pin").hint(),
            _ => self.identity.as_ref().expect("passkey mode has identity").fingerprint(),
        }
    }

    /// Run the verification duties against one candidate event.
    pub fn inspect(&self, event: &Event) -> Result<AcceptedHandshake, TransferError> {
        let view = event.tags_view();
        if view.event_type() != Some(self.mode.handshake_event_type()) {
            return Err(TransferError::Protocol("wrong handshake type".into()));
        }
        let salt: [u8; SALT_LEN] =
            b64_array(view.get(tags::S).ok_or_else(|| missing(tags::S))?, "salt")?;
        let transfer_id =
            TransferId::parse(view.get(tags::T).ok_or_else(|| missing(tags::T))?)?;

        match self.mode {
            HandshakeMode::Pin => self.inspect_pin(event, salt, transfer_id),
            HandshakeMode::SelfTransfer => self.inspect_self(event, &view, salt, transfer_id),
            HandshakeMode::CrossUser => self.inspect_cross(event, &view, salt, transfer_id),
        }
    }

    fn inspect_pin(
        &self,
        event: &Event,
        salt: [u8; SALT_LEN],
        transfer_id: TransferId,
    ) -> Result<AcceptedHandshake, TransferError> {
        let pin = self.pin.as_ref().expect("pin mode has pin");
        let content_key = kdf::derive_pin_key(&pin.material(), &salt);
        let payload = decrypt_payload(&content_key, event)?;

        let epk = payload.epk.as_deref().ok_or_else(|| {
            TransferError::Protocol("PIN handshake payload lacks ephemeral key".into())
        })?;
        let nonce = payload.nonce.as_deref().ok_or_else(|| {
            TransferError::Protocol("PIN handshake payload lacks nonce".into())
        })?;

        Ok(AcceptedHandshake {
            meta: payload.meta,
            transfer_id,
            salt,
            nonce: b64_array(nonce, "nonce")?,
            sender_epk: b64_decode(epk, "epk")?,
            content_key,
            peer_fingerprint: None,
        })
    }

    fn inspect_self(
        &self,
        event: &Event,
        view: &Tags,
        salt: [u8; SALT_LEN],
        transfer_id: TransferId,
    ) -> Result<AcceptedHandshake, TransferError> {
        let id = self.identity.as_ref().expect("self mode has identity");

        // 1. Fingerprint: same passkey on both ends.
        let spk = view.get(tags::SPK).ok_or_else(|| missing(tags::SPK))?;
        if !ct_eq_str(spk, &id.fingerprint()) {
            return Err(TransferError::HandshakeRejected("sender fingerprint mismatch".into()));
        }

        // 2. Receiver commitment: this event is addressed to us.
        check_commitment(view, id)?;

        let epk = tag_bytes(view, tags::EPK)?;
        let nonce: [u8; NONCE_LEN] =
            b64_array(view.get(tags::N).ok_or_else(|| missing(tags::N))?, "nonce")?;

        // 5. Session binding: the ephemeral key came from the passkey holder.
        let esb = b64_array::<32>(
            view.get(tags::ESB).ok_or_else(|| missing(tags::ESB))?,
            "esb",
        )?;
        if !ct_eq(&id.session_binding(id.ppk(), &epk)?, &esb) {
            return Err(TransferError::HandshakeRejected("session binding failed".into()));
        }

        // 6. Key confirmation.
        let kc = b64_array::<32>(
            view.get(tags::KC).ok_or_else(|| missing(tags::KC))?,
            "kc",
        )?;
        if !ct_eq(&id.key_confirmation(id.ppk(), &salt)?, &kc) {
            return Err(TransferError::HandshakeRejected("key confirmation failed".into()));
        }

        let content_key = id.payload_key(&id.ppk().to_owned(), &salt)?;
        let payload = decrypt_payload(&content_key, event)?;

        Ok(AcceptedHandshake {
            meta: payload.meta,
            transfer_id,
            salt,
            nonce,
            sender_epk: epk,
            content_key,
            peer_fingerprint: Some(id.fingerprint()),
        })
    }

    fn inspect_cross(
        &self,
        event: &Event,
        view: &Tags,
        salt: [u8; SALT_LEN],
        transfer_id: TransferId,
    ) -> Result<AcceptedHandshake, TransferError> {
        let id = self.identity.as_ref().expect("cross mode has identity");
        let pairing = self.pairing.as_ref().expect("cross mode has pairing");

        // 1. Fingerprint: sender must be the other party of our record.
        let spk = view.get(tags::SPK).ok_or_else(|| missing(tags::SPK))?;
        if !ct_eq_str(spk, &pairing.peer_fingerprint) {
            return Err(TransferError::HandshakeRejected("sender fingerprint mismatch".into()));
        }

        // 2. Receiver commitment.
        check_commitment(view, id)?;

        let epk = tag_bytes(view, tags::EPK)?;
        let nonce: [u8; NONCE_LEN] =
            b64_array(view.get(tags::N).ok_or_else(|| missing(tags::N))?, "nonce")?;

        let content_key = id.payload_key(&pairing.peer_ppk, &salt)?;
        let payload = decrypt_payload(&content_key, event)?;

        // 3. Sender's pairing key: we must be a party, and the other slot
        //    must be the fingerprint the event claims.
        let sender_record = payload.pairing_key.as_ref().ok_or_else(|| {
            TransferError::HandshakeRejected("handshake lacks sender pairing key".into())
        })?;
        let own_slot = sender_record
            .slot_of(id.public_id())
            .map_err(|e| TransferError::PairingKeyInvalid(e.to_string()))?
            .ok_or_else(|| {
                TransferError::HandshakeRejected(
                    "not a party to the sender's pairing key".into(),
                )
            })?;
        let other_fp = sender_record
            .fingerprint_of(own_slot.other())
            .map_err(|e| TransferError::PairingKeyInvalid(e.to_string()))?;
        if !ct_eq_str(&other_fp, spk) {
            return Err(TransferError::HandshakeRejected(
                "sender pairing key does not match sender fingerprint".into(),
            ));
        }

        // 4. Handshake proof: current control of the sender's passkey.
        //    The verification secret comes from OUR stored record, never
        //    from the event.
        let proof = b64_array::<32>(
            view.get(tags::HP).ok_or_else(|| missing(tags::HP))?,
            "handshake proof",
        )?;
        let peer_vs = pairing.record.verification_secret_of(pairing.peer_slot)?;
        let expected = identity::proof_with_secret(&peer_vs, &epk, &nonce, &id.fingerprint());
        if !ct_eq(&expected, &proof) {
            return Err(TransferError::HandshakeRejected("handshake proof failed".into()));
        }

        Ok(AcceptedHandshake {
            meta: payload.meta,
            transfer_id,
            salt,
            nonce,
            sender_epk: epk,
            content_key,
            peer_fingerprint: Some(pairing.peer_fingerprint.clone()),
        })
    }

    /// Build the ready ACK (`seq = 0`) for an accepted handshake.
    pub fn build_ready_ack(
        &self,
        accepted: &AcceptedHandshake,
        ephemeral: &EphemeralKeyPair,
        keys: &EventKeypair,
        ttl_secs: u64,
    ) -> Result<Event, TransferError> {
        let now = unix_now();
        let mut tag_list = Tags::new()
            .push(tags::T, accepted.transfer_id.as_str())
            .push(tags::TYPE, self.mode.ready_ack_type().as_str())
            .push(tags::SEQ, "0")
            .push(tags::EXPIRATION, (now + ttl_secs).to_string());
        let mut content = String::new();

        match self.mode {
            HandshakeMode::Pin => {
                let ack = ReadyAckPayload {
                    epk: b64(ephemeral.public_bytes()),
                    nonce: b64(&accepted.nonce),
                };
                let plaintext = serde_json::to_vec(&ack)
                    .map_err(|e| TransferError::Protocol(e.to_string()))?;
                content = b64(&accepted.content_key.encrypt(&plaintext, b"ready-ack")?);
            }
            HandshakeMode::SelfTransfer => {
                let id = self.identity.as_ref().expect("self mode has identity");
                let epk = ephemeral.public_bytes();
                tag_list = tag_list
                    .push(tags::N, b64(&accepted.nonce))
                    .push(tags::EPK, b64(epk))
                    .push(tags::ESB, b64(&id.session_binding(id.ppk(), epk)?));
            }
            HandshakeMode::CrossUser => {
                let id = self.identity.as_ref().expect("cross mode has identity");
                let pairing = self.pairing.as_ref().expect("cross mode has pairing");
                let epk = ephemeral.public_bytes();
                tag_list = tag_list
                    .push(tags::N, b64(&accepted.nonce))
                    .push(tags::EPK, b64(epk))
                    .push(
                        tags::HP,
                        b64(&id.handshake_proof(
                            &pairing.peer_ppk,
                            epk,
                            &accepted.nonce,
                            &pairing.peer_fingerprint,
                        )),
                    );
            }
        }

        Ok(Event::build(keys, KIND_DATA, now, tag_list, content)?)
    }
}

// ── Candidate selection ──────────────────────────────────────────────────────

/// Outcome of scanning a candidate list.
pub enum CandidateOutcome {
    Accepted(Box<AcceptedHandshake>),
    /// Nothing usable. `expired` counts events past their TTL; `rejected`
    /// counts events that failed decryption or verification.
    Exhausted { expired: usize, rejected: usize, last_error: Option<TransferError> },
}

/// Scan candidates newest-first and return the first that verifies.
pub fn select_candidate(
    handshake: &ReceiverHandshake,
    mut candidates: Vec<Event>,
    now: u64,
    ttl_secs: u64,
) -> CandidateOutcome {
    candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    candidates.dedup_by(|a, b| a.id == b.id);

    let mut expired = 0;
    let mut rejected = 0;
    let mut last_error = None;

    for event in &candidates {
        if event.is_expired(now, ttl_secs) {
            expired += 1;
            continue;
        }
        if event.verify().is_err() {
            rejected += 1;
            continue;
        }
        match handshake.inspect(event) {
            Ok(accepted) => return CandidateOutcome::Accepted(Box::new(accepted)),
            Err(e) => {
                tracing::debug!(event = %event.id, error = %e, "candidate rejected");
                rejected += 1;
                last_error = Some(e);
            }
        }
    }
    CandidateOutcome::Exhausted { expired, rejected, last_error }
}

/// Translate an exhausted candidate scan into the terminal error surface.
pub fn exhausted_error(
    mode: HandshakeMode,
    expired: usize,
    rejected: usize,
    last_error: Option<TransferError>,
) -> TransferError {
    if rejected == 0 && expired > 0 {
        return TransferError::Expired(
            "Transfer expired. Ask sender to start a new transfer.".into(),
        );
    }
    if rejected == 0 && expired == 0 {
        return TransferError::SubstrateUnavailable("no matching handshake events".into());
    }
    match mode {
        HandshakeMode::Pin => {
            TransferError::CredentialInvalid("Could not decrypt transfer. Wrong PIN?".into())
        }
        _ => last_error.unwrap_or_else(|| {
            TransferError::HandshakeRejected("no candidate event verified".into())
        }),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn missing(tag: &str) -> TransferError {
    TransferError::HandshakeRejected(format!("missing {tag} tag"))
}

fn tag_bytes(view: &Tags, key: &str) -> Result<Vec<u8>, TransferError> {
    b64_decode(view.get(key).ok_or_else(|| missing(key))?, key)
}

fn check_commitment(view: &Tags, id: &Identity) -> Result<(), TransferError> {
    let rpkc = view.get(tags::RPKC).ok_or_else(|| missing(tags::RPKC))?;
    if !ct_eq_str(rpkc, &identity::receiver_commitment(id.public_id())) {
        return Err(TransferError::HandshakeRejected(
            "event is addressed to a different receiver".into(),
        ));
    }
    Ok(())
}

fn decrypt_payload(key: &SessionKey, event: &Event) -> Result<HandshakePayload, TransferError> {
    let content = b64_decode(&event.content, "event content")?;
    let plaintext = key.decrypt(&content, b"handshake")?;
    serde_json::from_slice(&plaintext).map_err(|e| TransferError::Protocol(e.to_string()))
}
