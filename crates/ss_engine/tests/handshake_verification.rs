//! Handshake verification duties under tampering.
//!
//! The substrate cannot be trusted: anyone can observe a handshake event,
//! alter a tag, and re-sign it with a fresh key (event signing keys are
//! random and unauthenticated by design). Every altered value must trip
//! the corresponding verification duty on the receiver.

use ss_crypto::identity::{Identity, MasterKey};
use ss_crypto::pairing::PairingKey;
use ss_crypto::pin::Pin;
use ss_engine::config::unix_now;
use ss_engine::handshake::{ReceiverHandshake, SenderHandshake};
use ss_engine::ErrorKind;
use ss_proto::event::{Event, EventKeypair};
use ss_proto::tags::Tags;
use ss_proto::transfer::TransferMeta;
use ss_proto::{tags, TransferId};

const TTL: u64 = 3600;

fn identity(seed: u8) -> Identity {
    MasterKey::from_prf_output([seed; 32]).derive_identity().unwrap()
}

fn meta() -> TransferMeta {
    TransferMeta::for_payload("x.bin", "application/octet-stream", 4096, 128 * 1024, u64::MAX)
        .unwrap()
}

fn paired(a: &Identity, b: &Identity) -> PairingKey {
    let now = unix_now();
    let request = PairingKey::create_request(a, b.public_id(), b.ppk(), now, now, None).unwrap();
    PairingKey::countersign(&request, b, now).unwrap()
}

/// Re-sign an event after mutating one tag value — what a substrate-level
/// attacker can always do.
fn tamper_tag(event: &Event, key: &str, value: &str) -> Event {
    let mut tags_vec = event.tags.clone();
    for tag in &mut tags_vec {
        if tag[0] == key {
            tag[1] = value.to_string();
        }
    }
    Event::build(
        &EventKeypair::generate(),
        event.kind,
        event.created_at,
        Tags::from_vec(tags_vec),
        event.content.clone(),
    )
    .unwrap()
}

fn build(sender: &SenderHandshake) -> Event {
    sender
        .build_event(&EventKeypair::generate(), &TransferId::generate(), &meta(), TTL)
        .unwrap()
}

// ── Self-transfer mode ───────────────────────────────────────────────────────

#[test]
fn self_transfer_accepts_own_event() {
    let sender = SenderHandshake::for_self_transfer(identity(1)).unwrap();
    let event = build(&sender);

    let receiver = ReceiverHandshake::for_self_transfer(identity(1));
    let accepted = receiver.inspect(&event).unwrap();
    assert_eq!(accepted.meta, meta());
    assert_eq!(accepted.sender_epk, sender.ephemeral.public_bytes().to_vec());
}

#[test]
fn self_transfer_rejects_foreign_event() {
    // Same structure, different passkey: fingerprint check must fail.
    let sender = SenderHandshake::for_self_transfer(identity(2)).unwrap();
    let event = build(&sender);

    let receiver = ReceiverHandshake::for_self_transfer(identity(1));
    let err = receiver.inspect(&event).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeRejected);
}

#[test]
fn self_transfer_rejects_tampered_kc() {
    let sender = SenderHandshake::for_self_transfer(identity(1)).unwrap();
    let event = build(&sender);
    // Flip one bit's worth of the key-confirmation hash.
    let tampered = tamper_tag(&event, tags::KC, &flip_first_char(event.tag(tags::KC).unwrap()));

    let receiver = ReceiverHandshake::for_self_transfer(identity(1));
    let err = receiver.inspect(&tampered).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeRejected);
}

#[test]
fn self_transfer_rejects_tampered_esb() {
    let sender = SenderHandshake::for_self_transfer(identity(1)).unwrap();
    let event = build(&sender);
    let tampered = tamper_tag(&event, tags::ESB, &flip_first_char(event.tag(tags::ESB).unwrap()));

    let receiver = ReceiverHandshake::for_self_transfer(identity(1));
    assert_eq!(
        receiver.inspect(&tampered).unwrap_err().kind(),
        ErrorKind::HandshakeRejected
    );
}

#[test]
fn self_transfer_rejects_redirected_commitment() {
    let sender = SenderHandshake::for_self_transfer(identity(1)).unwrap();
    let event = build(&sender);
    let other_commitment = ss_crypto::identity::receiver_commitment(identity(3).public_id());
    let tampered = tamper_tag(&event, tags::RPKC, &other_commitment);

    let receiver = ReceiverHandshake::for_self_transfer(identity(1));
    assert_eq!(
        receiver.inspect(&tampered).unwrap_err().kind(),
        ErrorKind::HandshakeRejected
    );
}

// ── Cross-user mode ──────────────────────────────────────────────────────────

#[test]
fn cross_user_roundtrip_with_ready_ack() {
    let alice = identity(1);
    let bob = identity(2);
    let record = paired(&alice, &bob);

    let sender = SenderHandshake::for_cross_user(identity(1), record.clone()).unwrap();
    let event = build(&sender);

    let receiver = ReceiverHandshake::for_cross_user(identity(2), record).unwrap();
    let accepted = receiver.inspect(&event).unwrap();

    // Receiver answers; sender verifies the proof and nonce echo.
    let ephemeral = ss_crypto::keystore::EphemeralKeyPair::generate();
    let ack = receiver
        .build_ready_ack(&accepted, &ephemeral, &EventKeypair::generate(), TTL)
        .unwrap();
    let peer_epk = sender.verify_ready_ack(&ack).unwrap();
    assert_eq!(peer_epk, ephemeral.public_bytes().to_vec());

    // Both sides derive the same session key.
    let sender_key = sender.session_key(&peer_epk).unwrap();
    let receiver_key = ephemeral
        .derive_session_key(&accepted.sender_epk, &accepted.salt)
        .unwrap();
    let ct = sender_key.encrypt(b"key agreement check", b"").unwrap();
    assert_eq!(&receiver_key.decrypt(&ct, b"").unwrap()[..], b"key agreement check");
}

#[test]
fn cross_user_rejects_tampered_proof() {
    let alice = identity(1);
    let bob = identity(2);
    let record = paired(&alice, &bob);

    let sender = SenderHandshake::for_cross_user(identity(1), record.clone()).unwrap();
    let event = build(&sender);
    let tampered = tamper_tag(&event, tags::HP, &flip_first_char(event.tag(tags::HP).unwrap()));

    let receiver = ReceiverHandshake::for_cross_user(identity(2), record).unwrap();
    assert_eq!(
        receiver.inspect(&tampered).unwrap_err().kind(),
        ErrorKind::HandshakeRejected
    );
}

#[test]
fn cross_user_rejects_swapped_ephemeral() {
    // Replacing the ephemeral key invalidates the proof that covers it.
    let alice = identity(1);
    let bob = identity(2);
    let record = paired(&alice, &bob);

    let sender = SenderHandshake::for_cross_user(identity(1), record.clone()).unwrap();
    let event = build(&sender);
    let mallory_epk = ss_crypto::keystore::EphemeralKeyPair::generate();
    let tampered = tamper_tag(
        &event,
        tags::EPK,
        &base64_url(mallory_epk.public_bytes()),
    );

    let receiver = ReceiverHandshake::for_cross_user(identity(2), record).unwrap();
    assert_eq!(
        receiver.inspect(&tampered).unwrap_err().kind(),
        ErrorKind::HandshakeRejected
    );
}

#[test]
fn cross_user_third_party_cannot_receive() {
    let alice = identity(1);
    let bob = identity(2);
    let eve = identity(3);
    let record = paired(&alice, &bob);

    // Eve holds a copy of the record but is not a party to it.
    let err = ReceiverHandshake::for_cross_user(eve, record).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PairingKeyInvalid);
}

#[test]
fn sender_rejects_tampered_ack_nonce() {
    let pin = Pin::generate(ss_crypto::pin::SignalingMethod::Relay);
    let sender = SenderHandshake::for_pin(&pin).unwrap();
    let event = build(&sender);

    let receiver = ReceiverHandshake::for_pin(Pin::parse(pin.as_str()).unwrap());
    let mut accepted = receiver.inspect(&event).unwrap();
    // Receiver echoes a stale nonce (replayed ack).
    accepted.nonce = [0u8; 16];
    let ephemeral = ss_crypto::keystore::EphemeralKeyPair::generate();
    let ack = receiver
        .build_ready_ack(&accepted, &ephemeral, &EventKeypair::generate(), TTL)
        .unwrap();

    assert_eq!(
        sender.verify_ready_ack(&ack).unwrap_err().kind(),
        ErrorKind::HandshakeRejected
    );
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Flip the first character of a base64/hex token to a different value.
fn flip_first_char(token: &str) -> String {
    let mut chars: Vec<char> = token.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}

fn base64_url(data: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(data)
}
