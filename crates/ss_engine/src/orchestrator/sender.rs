//! Sending side of the orchestrator.

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ss_crypto::pairing::PairingKey;
use ss_crypto::passkey;
use ss_crypto::pin::{Pin, SignalingMethod};
use ss_proto::event::{Event, EventKeypair, KIND_DATA};
use ss_proto::signal::{SignalKind, SignalingMessage};
use ss_proto::tags::{self, EventType, Tags};
use ss_proto::transfer::TransferMeta;
use ss_proto::{Filter, TransferId};

use crate::config::{unix_now, EngineConfig};
use crate::error::TransferError;
use crate::handshake::SenderHandshake;
use crate::session::Session;
use crate::substrate::Subscription;
use crate::transport::{run_cloud_sender, run_direct_sender, PeerConnector};

use super::{
    spawn_transfer, CredentialDisplay, EngineDeps, ReceivedFile, SendContent, SendOptions,
    StateTx, TransferHandle, TransferState,
};

/// Start a send. Returns the running handle plus the credential to show
/// the user (PIN or fingerprint). Publishing has not happened yet when
/// this returns; the task drives the rest and reports through the state
/// stream.
pub async fn send(
    deps: EngineDeps,
    config: EngineConfig,
    content: SendContent,
    options: SendOptions,
) -> Result<(TransferHandle, CredentialDisplay), TransferError> {
    if (options.self_transfer || options.receiver_pairing_key.is_some()) && !options.use_passkey {
        return Err(TransferError::CredentialInvalid(
            "passkey modes require use_passkey".into(),
        ));
    }

    let meta = TransferMeta::for_payload(
        &content.file_name,
        &content.mime_type,
        content.bytes.len() as u64,
        config.direct_chunk_size,
        config.max_file_size,
    )?;

    let (handshake, display) = if options.use_passkey {
        let provider = deps.passkey.as_ref().ok_or_else(|| {
            TransferError::CredentialInvalid("no passkey provider available".into())
        })?;
        let master = passkey::authenticate(provider.as_ref()).await?;
        let identity = master.derive_identity()?;
        let fingerprint = identity.fingerprint();
        let handshake = match &options.receiver_pairing_key {
            Some(json) => {
                let record = PairingKey::parse(json, Some(identity.public_id()))?;
                SenderHandshake::for_cross_user(identity, record)?
            }
            None if options.self_transfer => SenderHandshake::for_self_transfer(identity)?,
            None => {
                return Err(TransferError::CredentialInvalid(
                    "passkey send requires self_transfer or a receiver pairing key".into(),
                ))
            }
        };
        let display = CredentialDisplay::Fingerprint {
            display: ss_crypto::identity::display_fingerprint(&fingerprint),
            fingerprint,
        };
        (handshake, display)
    } else {
        let pin = Pin::generate(SignalingMethod::Relay);
        let display = CredentialDisplay::Pin {
            pin: pin.as_str().to_string(),
            words: pin.to_words().iter().map(|w| w.to_string()).collect(),
        };
        (SenderHandshake::for_pin(&pin)?, display)
    };

    // Fail fast if no relay endpoint answers, so the caller can retry or
    // switch to manual signaling.
    deps.substrate.probe().await?;

    let cancel = CancellationToken::new();
    let (states_tx, states_rx) = mpsc::channel(32);
    let tx = StateTx(states_tx.clone());
    let ttl = config.handshake_ttl;
    let body = sender_task(
        deps.clone(),
        config,
        handshake,
        content,
        meta,
        options,
        tx,
        cancel.clone(),
    );
    let handle = spawn_transfer(deps, ttl, cancel, states_tx, states_rx, body);
    Ok((handle, display))
}

#[allow(clippy::too_many_arguments)]
async fn sender_task(
    deps: EngineDeps,
    config: EngineConfig,
    handshake: SenderHandshake,
    content: SendContent,
    meta: TransferMeta,
    options: SendOptions,
    tx: StateTx,
    cancel: CancellationToken,
) -> Result<Option<ReceivedFile>, TransferError> {
    tx.emit(TransferState::Idle).await;
    tx.emit(TransferState::Preparing).await;

    let keys = EventKeypair::generate();
    let transfer_id = TransferId::generate();
    let ttl_secs = config.handshake_ttl.as_secs();

    // Subscribe before publishing so the ready ACK cannot slip past.
    let mut events = deps
        .substrate
        .subscribe(Filter::new().kind(KIND_DATA).transfer(transfer_id.as_str()))
        .await?;

    let handshake_event = handshake.build_event(&keys, &transfer_id, &meta, ttl_secs)?;
    deps.substrate.publish(handshake_event).await?;
    info!(%transfer_id, mode = ?handshake.mode, "handshake published");
    tx.emit(TransferState::WaitingForReceiver).await;

    // ── Await ready ACK ──────────────────────────────────────────────────
    let deadline = Instant::now() + config.receiver_wait_timeout;
    let peer_epk = loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(TransferError::Expired(
                    "No receiver connected in time. Start a new transfer.".into(),
                ));
            }
            ev = events.next() => ev.ok_or_else(|| {
                TransferError::SubstrateUnavailable("event stream ended".into())
            })?,
        };
        if event.verify().is_err() {
            continue;
        }
        match handshake.verify_ready_ack(&event) {
            Ok(epk) => break epk,
            Err(e) => debug!(event = %event.id, error = %e, "ignoring non-matching ack"),
        }
    };

    let session_key = handshake.session_key(&peer_epk)?;
    let mut session = Session::new(
        session_key,
        transfer_id.clone(),
        meta.clone(),
        handshake.peer_fingerprint(),
    );
    info!(%transfer_id, "session established");
    tx.emit(TransferState::Connecting).await;

    let payload = content.bytes;

    // ── Direct path ──────────────────────────────────────────────────────
    if let Some(connector) = deps.connector.clone() {
        match direct_sender_path(
            &deps, &config, connector.as_ref(), &keys, &session, &mut events, &payload, &tx,
            &cancel,
        )
        .await?
        {
            DirectAttempt::Completed => return Ok(None),
            DirectAttempt::FailedBeforeOpen(e) if options.relay_only => {
                return Err(e);
            }
            DirectAttempt::FailedBeforeOpen(e) => {
                warn!(error = %e, "direct path failed, falling back to cloud");
            }
        }
    } else if options.relay_only {
        return Err(TransferError::Transport(
            "relay-only transfer with no peer connector".into(),
        ));
    }

    // ── Cloud fallback ───────────────────────────────────────────────────
    let store = deps.blob_store.as_ref().ok_or_else(|| {
        TransferError::Transport("direct connection failed and no blob store is configured".into())
    })?;
    let progress = |sent: u64, total: u64| {
        tx.emit_progress(TransferState::Transferring { bytes_sent: sent, total_bytes: total });
    };
    run_cloud_sender(
        deps.substrate.as_ref(),
        &mut events,
        &keys,
        store.as_ref(),
        &mut session,
        &payload,
        &config,
        &cancel,
        progress,
    )
    .await?;
    Ok(None)
}

enum DirectAttempt {
    Completed,
    /// The channel never opened; the cloud fallback may take over.
    FailedBeforeOpen(TransferError),
}

/// Drive signaling and streaming on the direct path. Failures after the
/// channel opened are fatal (`Err`); failures before it are recoverable.
#[allow(clippy::too_many_arguments)]
async fn direct_sender_path(
    deps: &EngineDeps,
    config: &EngineConfig,
    connector: &dyn PeerConnector,
    keys: &EventKeypair,
    session: &Session,
    events: &mut Subscription,
    payload: &[u8],
    tx: &StateTx,
    cancel: &CancellationToken,
) -> Result<DirectAttempt, TransferError> {
    // Offer, bounded by the ICE gathering timeout.
    let offer = match timeout(config.ice_timeout, connector.create_offer()).await {
        Ok(Ok(offer)) => offer,
        Ok(Err(e)) => return Ok(DirectAttempt::FailedBeforeOpen(e)),
        Err(_) => {
            return Ok(DirectAttempt::FailedBeforeOpen(TransferError::Transport(
                "ICE gathering timed out".into(),
            )))
        }
    };
    deps.substrate
        .publish(signal_event(keys, session, &offer, config.handshake_ttl.as_secs())?)
        .await?;

    // Answer.
    let deadline = Instant::now() + config.channel_open_timeout;
    let answer = loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Ok(DirectAttempt::FailedBeforeOpen(TransferError::Transport(
                    "no answer before the channel-open timeout".into(),
                )));
            }
            ev = events.next() => ev.ok_or_else(|| {
                TransferError::SubstrateUnavailable("event stream ended".into())
            })?,
        };
        if let Some(msg) = open_signal_event(session, &event) {
            if msg.kind == SignalKind::Answer {
                break msg;
            }
        }
    };
    if let Err(e) = connector.apply_answer(&answer).await {
        return Ok(DirectAttempt::FailedBeforeOpen(e));
    }

    let mut link = match timeout(config.channel_open_timeout, connector.open_channel()).await {
        Ok(Ok(link)) => link,
        Ok(Err(e)) => return Ok(DirectAttempt::FailedBeforeOpen(e)),
        Err(_) => {
            return Ok(DirectAttempt::FailedBeforeOpen(TransferError::Transport(
                "data channel failed to open in time".into(),
            )))
        }
    };
    info!("direct channel open");

    // From here the transfer completes on this channel or fails.
    let progress = |sent: u64, total: u64| {
        tx.emit_progress(TransferState::Transferring { bytes_sent: sent, total_bytes: total });
    };
    run_direct_sender(
        link.as_mut(),
        &session.key,
        payload,
        config.direct_chunk_size,
        config.backpressure_high_water,
        config.backpressure_low_water,
        config.chunk_ack_timeout,
        cancel,
        progress,
    )
    .await?;
    link.close().await;
    Ok(DirectAttempt::Completed)
}

// ── Signaling event helpers (shared with the receiver) ──────────────────────

pub(super) fn signal_event(
    keys: &EventKeypair,
    session: &Session,
    msg: &SignalingMessage,
    ttl_secs: u64,
) -> Result<Event, TransferError> {
    let now = unix_now();
    let tag_list = Tags::new()
        .push(tags::T, session.transfer_id.as_str())
        .push(tags::TYPE, EventType::Signal.as_str())
        .push(tags::EXPIRATION, (now + ttl_secs).to_string());
    let content = URL_SAFE_NO_PAD.encode(msg.seal(&session.key)?);
    Ok(Event::build(keys, KIND_DATA, now, tag_list, content)?)
}

/// Decrypt a `type=signal` event; `None` for anything that is not ours
/// (wrong type, bad ciphertext — e.g. an echo of our own offer is fine and
/// decrypts to its original kind).
pub(super) fn open_signal_event(session: &Session, event: &Event) -> Option<SignalingMessage> {
    if event.tags_view().event_type() != Some(EventType::Signal) {
        return None;
    }
    let content = URL_SAFE_NO_PAD.decode(&event.content).ok()?;
    SignalingMessage::open(&session.key, &content).ok()
}
