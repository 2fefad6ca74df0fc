//! Receiving side of the orchestrator.

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ss_crypto::pairing::PairingKey;
use ss_crypto::passkey;
use ss_crypto::pin::SignalingMethod;
use ss_crypto::keystore::EphemeralKeyPair;
use ss_proto::event::{EventKeypair, KIND_DATA, KIND_HANDSHAKE};
use ss_proto::signal::SignalKind;
use ss_proto::tags::EventType;
use ss_proto::Filter;

use crate::config::{unix_now, EngineConfig};
use crate::error::TransferError;
use crate::handshake::{
    exhausted_error, select_candidate, AcceptedHandshake, CandidateOutcome, ReceiverHandshake,
};
use crate::session::Session;
use crate::transport::{run_cloud_receiver, run_direct_receiver};

use super::sender::{open_signal_event, signal_event};
use super::{
    spawn_transfer, EngineDeps, ReceiveCredential, ReceivedFile, StateTx, TransferHandle,
    TransferState,
};

/// Start a receive with the given credential. All outcomes, including the
/// decrypted payload, arrive through the state stream.
pub async fn receive(
    deps: EngineDeps,
    config: EngineConfig,
    credential: ReceiveCredential,
) -> Result<TransferHandle, TransferError> {
    let handshake = match credential {
        ReceiveCredential::Pin(pin) => {
            if pin.method() == Some(SignalingMethod::Manual) {
                return Err(TransferError::CredentialInvalid(
                    "manual-mode PIN: exchange signaling payloads out of band instead".into(),
                ));
            }
            ReceiverHandshake::for_pin(pin)
        }
        ReceiveCredential::Passkey { self_transfer, sender_pairing_key } => {
            let provider = deps.passkey.as_ref().ok_or_else(|| {
                TransferError::CredentialInvalid("no passkey provider available".into())
            })?;
            let master = passkey::authenticate(provider.as_ref()).await?;
            let identity = master.derive_identity()?;
            match sender_pairing_key {
                Some(json) => {
                    let record = PairingKey::parse(&json, Some(identity.public_id()))?;
                    ReceiverHandshake::for_cross_user(identity, record)?
                }
                None if self_transfer => ReceiverHandshake::for_self_transfer(identity),
                None => {
                    return Err(TransferError::CredentialInvalid(
                        "passkey receive requires self_transfer or a sender pairing key".into(),
                    ))
                }
            }
        }
    };

    deps.substrate.probe().await?;

    let cancel = CancellationToken::new();
    let (states_tx, states_rx) = mpsc::channel(32);
    let tx = StateTx(states_tx.clone());
    let ttl = config.handshake_ttl;
    let body = receiver_task(deps.clone(), config, handshake, tx, cancel.clone());
    Ok(spawn_transfer(deps, ttl, cancel, states_tx, states_rx, body))
}

async fn receiver_task(
    deps: EngineDeps,
    config: EngineConfig,
    handshake: ReceiverHandshake,
    tx: StateTx,
    cancel: CancellationToken,
) -> Result<Option<ReceivedFile>, TransferError> {
    tx.emit(TransferState::Idle).await;
    tx.emit(TransferState::Preparing).await;

    let ttl_secs = config.handshake_ttl.as_secs();
    let hint_filter = Filter::new().kind(KIND_HANDSHAKE).hint(handshake.hint());

    // Subscribe first so an event published between query and subscribe is
    // not lost, then scan the stored candidates.
    let mut hs_events = deps.substrate.subscribe(hint_filter.clone()).await?;
    let candidates = deps.substrate.query(hint_filter).await?;
    debug!(count = candidates.len(), "handshake candidates from query");

    let accepted: AcceptedHandshake =
        match select_candidate(&handshake, candidates, unix_now(), ttl_secs) {
            CandidateOutcome::Accepted(accepted) => *accepted,
            CandidateOutcome::Exhausted { expired, rejected, last_error } => {
                if expired + rejected > 0 {
                    // Stored candidates exist but none is usable — that is a
                    // terminal answer (wrong PIN, stale transfer, tampering).
                    return Err(exhausted_error(handshake.mode, expired, rejected, last_error));
                }
                // Nothing published yet: wait for the sender.
                wait_for_live_candidate(&handshake, &mut hs_events, &config, &cancel).await?
            }
        };
    drop(hs_events);

    accepted.meta.validate(config.max_file_size)?;
    info!(transfer_id = %accepted.transfer_id, "handshake accepted");

    // Subscribe to transfer data before the ACK so no signal event races us.
    let mut events = deps
        .substrate
        .subscribe(Filter::new().kind(KIND_DATA).transfer(accepted.transfer_id.as_str()))
        .await?;

    let keys = EventKeypair::generate();
    let ephemeral = EphemeralKeyPair::generate();
    let ready_ack = handshake.build_ready_ack(&accepted, &ephemeral, &keys, ttl_secs)?;
    deps.substrate.publish(ready_ack).await?;

    let session_key = ephemeral.derive_session_key(&accepted.sender_epk, &accepted.salt)?;
    let mut session = Session::new(
        session_key,
        accepted.transfer_id.clone(),
        accepted.meta.clone(),
        accepted.peer_fingerprint.clone(),
    );
    tx.emit(TransferState::Connecting).await;

    // ── Wait for the sender to pick a path ───────────────────────────────
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            ev = events.next() => ev.ok_or_else(|| {
                TransferError::SubstrateUnavailable("event stream ended".into())
            })?,
        };
        match event.tags_view().event_type() {
            Some(EventType::Signal) => {
                let Some(connector) = deps.connector.clone() else { continue };
                let Some(offer) = open_signal_event(&session, &event) else { continue };
                if offer.kind != SignalKind::Offer {
                    continue;
                }
                let answer = match connector.accept_offer(&offer).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!(error = %e, "accept_offer failed");
                        continue;
                    }
                };
                deps.substrate
                    .publish(signal_event(&keys, &session, &answer, ttl_secs)?)
                    .await?;

                let mut link =
                    match timeout(config.channel_open_timeout, connector.open_channel()).await {
                        Ok(Ok(link)) => link,
                        Ok(Err(e)) => {
                            warn!(error = %e, "channel failed; awaiting cloud fallback");
                            continue;
                        }
                        Err(_) => {
                            warn!("channel open timed out; awaiting cloud fallback");
                            continue;
                        }
                    };
                info!("direct channel open");

                // Committed: no fallback once the channel is open.
                let progress = |received: u64, total: u64| {
                    tx.emit_progress(TransferState::Receiving {
                        bytes_received: received,
                        total_bytes: total,
                    });
                };
                let bytes = run_direct_receiver(
                    link.as_mut(),
                    &session.key,
                    session.meta.total_bytes,
                    config.direct_chunk_size,
                    &cancel,
                    progress,
                )
                .await?;
                link.close().await;
                return Ok(Some(ReceivedFile {
                    file_name: session.meta.file_name.clone(),
                    mime_type: session.meta.mime_type.clone(),
                    bytes,
                }));
            }
            Some(EventType::ChunkNotify) => {
                let store = deps.blob_store.as_ref().ok_or_else(|| {
                    TransferError::Transport(
                        "sender staged chunks but no blob store is configured".into(),
                    )
                })?;
                let progress = |received: u64, total: u64| {
                    tx.emit_progress(TransferState::Receiving {
                        bytes_received: received,
                        total_bytes: total,
                    });
                };
                let bytes = run_cloud_receiver(
                    deps.substrate.as_ref(),
                    &mut events,
                    &keys,
                    store.as_ref(),
                    &mut session,
                    Some(event),
                    &config,
                    &cancel,
                    progress,
                )
                .await?;
                return Ok(Some(ReceivedFile {
                    file_name: session.meta.file_name.clone(),
                    mime_type: session.meta.mime_type.clone(),
                    bytes,
                }));
            }
            _ => continue,
        }
    }
}

/// Block until a live handshake event passes verification, bounded by the
/// receiver wait timeout.
async fn wait_for_live_candidate(
    handshake: &ReceiverHandshake,
    hs_events: &mut crate::substrate::Subscription,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<AcceptedHandshake, TransferError> {
    let ttl_secs = config.handshake_ttl.as_secs();
    let deadline = Instant::now() + config.receiver_wait_timeout;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                // A wrong PIN hashes to a different hint, so "nothing found"
                // and "wrong PIN" are indistinguishable here.
                return Err(match handshake.mode {
                    crate::handshake::HandshakeMode::Pin => TransferError::CredentialInvalid(
                        "Could not decrypt transfer. Wrong PIN?".into(),
                    ),
                    _ => TransferError::SubstrateUnavailable(
                        "no matching handshake events".into(),
                    ),
                });
            }
            ev = hs_events.next() => ev.ok_or_else(|| {
                TransferError::SubstrateUnavailable("event stream ended".into())
            })?,
        };
        if event.is_expired(unix_now(), ttl_secs) || event.verify().is_err() {
            continue;
        }
        match handshake.inspect(&event) {
            Ok(accepted) => return Ok(accepted),
            Err(e) => debug!(event = %event.id, error = %e, "live candidate rejected"),
        }
    }
}
