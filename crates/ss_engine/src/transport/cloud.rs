//! Cloud fallback: staging encrypted chunks through a blob store.
//!
//! Per-chunk protocol (window of 1):
//!   1. sender encrypts a 10 MiB window, uploads `nonce ‖ ct` as a blob
//!   2. sender publishes a `chunk_notify` data event whose encrypted
//!      content carries `{i, total, url}`
//!   3. receiver downloads, decrypts, writes at `i · chunk_size`, and
//!      publishes an ACK event with `seq = i + 1`
//!   4. sender advances to the next chunk only after that ACK
//!
//! The receiver closes with `seq = -1`; the sender completes on it. Blob
//! I/O retries with bounded exponential backoff; everything else surfaces.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ss_proto::chunk::{self, NONCE_LEN, NONCE_PREFIX_LEN};
use ss_proto::event::{Event, EventKeypair, KIND_DATA};
use ss_proto::tags::{self, EventType, Tags};
use ss_proto::transfer::chunk_count;

use crate::config::{unix_now, EngineConfig};
use crate::error::TransferError;
use crate::session::Session;
use crate::substrate::{Substrate, Subscription};
use crate::transport::{retry::with_backoff, BlobStore};

/// Encrypted content of a `chunk_notify` event.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkNotify {
    i: u64,
    total: u64,
    url: String,
}

fn data_event(
    keys: &EventKeypair,
    session: &Session,
    ty: EventType,
    seq: Option<i64>,
    content: String,
    ttl_secs: u64,
) -> Result<Event, TransferError> {
    let now = unix_now();
    let mut tag_list = Tags::new()
        .push(tags::T, session.transfer_id.as_str())
        .push(tags::TYPE, ty.as_str())
        .push(tags::EXPIRATION, (now + ttl_secs).to_string());
    if let Some(seq) = seq {
        tag_list = tag_list.push(tags::SEQ, seq.to_string());
    }
    Ok(Event::build(keys, KIND_DATA, now, tag_list, content)?)
}

/// Wait for the ACK with the exact expected sequence number.
async fn wait_ack(
    events: &mut Subscription,
    session: &mut Session,
    expected: i64,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let deadline = tokio::time::Instant::now() + config.chunk_ack_timeout;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(TransferError::Transport(format!(
                    "timed out waiting for chunk ACK seq={expected}"
                )));
            }
            ev = events.next() => ev.ok_or_else(|| {
                TransferError::SubstrateUnavailable("event stream ended".into())
            })?,
        };
        let view = event.tags_view();
        if view.event_type() != Some(EventType::Ack) {
            continue;
        }
        match view.seq() {
            Some(seq) if seq == expected => {
                if session.advance_ack(seq) {
                    return Ok(());
                }
                warn!(seq, "ack ignored by monotone cursor");
            }
            Some(other) => debug!(got = other, expected, "out-of-order ack skipped"),
            None => {}
        }
    }
}

/// Upload and notify chunk by chunk, gated on per-chunk ACKs.
#[allow(clippy::too_many_arguments)]
pub async fn run_cloud_sender(
    substrate: &dyn Substrate,
    events: &mut Subscription,
    keys: &EventKeypair,
    store: &dyn BlobStore,
    session: &mut Session,
    payload: &[u8],
    config: &EngineConfig,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u64, u64) + Send,
) -> Result<(), TransferError> {
    let chunk_size = config.cloud_chunk_size;
    let total_bytes = payload.len() as u64;
    let total = chunk_count(total_bytes, chunk_size);
    let ttl = config.handshake_ttl.as_secs();

    let prefix = {
        use rand::RngCore;
        let mut p = [0u8; NONCE_PREFIX_LEN];
        rand::rngs::OsRng.fill_bytes(&mut p);
        p
    };

    debug!(total, total_bytes, "cloud send starting");

    for i in 0..total {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let start = (i as usize) * chunk_size;
        let end = payload.len().min(start + chunk_size);

        let nonce = chunk::chunk_nonce(&prefix, i);
        let ciphertext =
            session.key.encrypt_with_nonce(&nonce, &payload[start..end], &chunk::chunk_aad(i))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        let blob = Bytes::from(blob);

        let url = with_backoff(&config.blob_retry, cancel, "blob upload", || {
            store.put(blob.clone())
        })
        .await?;

        let notify = serde_json::to_vec(&ChunkNotify { i, total, url })
            .map_err(|e| TransferError::Protocol(e.to_string()))?;
        let content = URL_SAFE_NO_PAD.encode(session.key.encrypt(&notify, b"chunk-notify")?);
        substrate
            .publish(data_event(keys, session, EventType::ChunkNotify, None, content, ttl)?)
            .await?;

        wait_ack(events, session, (i + 1) as i64, config, cancel).await?;
        on_progress(end as u64, total_bytes);
    }

    // Completion marker from the receiver.
    wait_ack(events, session, -1, config, cancel).await?;
    debug!("cloud send complete");
    Ok(())
}

/// Consume chunk notifications until the full payload is assembled.
#[allow(clippy::too_many_arguments)]
pub async fn run_cloud_receiver(
    substrate: &dyn Substrate,
    events: &mut Subscription,
    keys: &EventKeypair,
    store: &dyn BlobStore,
    session: &mut Session,
    first_notify: Option<Event>,
    config: &EngineConfig,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u64, u64) + Send,
) -> Result<Bytes, TransferError> {
    let chunk_size = config.cloud_chunk_size;
    let ttl = config.handshake_ttl.as_secs();
    let mut buffer: Vec<u8> = Vec::new();
    let mut received: Vec<bool> = Vec::new();
    let mut received_count: u64 = 0;
    let mut received_bytes: u64 = 0;
    let mut total: Option<u64> = None;
    let mut pending = first_notify;

    loop {
        let event = match pending.take() {
            Some(ev) => ev,
            None => tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                ev = events.next() => ev.ok_or_else(|| {
                    TransferError::SubstrateUnavailable("event stream ended".into())
                })?,
            },
        };
        if event.tags_view().event_type() != Some(EventType::ChunkNotify) {
            continue;
        }

        let content = URL_SAFE_NO_PAD
            .decode(&event.content)
            .map_err(|e| TransferError::Protocol(format!("bad notify content: {e}")))?;
        let notify: ChunkNotify =
            serde_json::from_slice(&session.key.decrypt(&content, b"chunk-notify")?)
                .map_err(|e| TransferError::Protocol(format!("bad notify payload: {e}")))?;

        let total_chunks = *total.get_or_insert(notify.total);
        if notify.total != total_chunks || notify.i >= total_chunks {
            return Err(TransferError::Protocol(format!(
                "inconsistent chunk notify: i={} total={}",
                notify.i, notify.total
            )));
        }
        received.resize(total_chunks as usize, false);
        if received[notify.i as usize] {
            debug!(i = notify.i, "duplicate notify skipped");
            continue;
        }

        let blob = with_backoff(&config.blob_retry, cancel, "blob download", || {
            store.get(&notify.url)
        })
        .await?;
        if blob.len() < NONCE_LEN {
            return Err(TransferError::Protocol("blob too short".into()));
        }
        let nonce: [u8; NONCE_LEN] = blob[..NONCE_LEN].try_into().expect("length checked");
        let plaintext =
            session.key.decrypt_detached(&nonce, &blob[NONCE_LEN..], &chunk::chunk_aad(notify.i))?;

        let offset = (notify.i as usize) * chunk_size;
        if buffer.len() < offset + plaintext.len() {
            buffer.resize(offset + plaintext.len(), 0);
        }
        buffer[offset..offset + plaintext.len()].copy_from_slice(&plaintext);

        received[notify.i as usize] = true;
        received_count += 1;
        received_bytes += plaintext.len() as u64;

        substrate
            .publish(data_event(
                keys,
                session,
                EventType::Ack,
                Some((notify.i + 1) as i64),
                String::new(),
                ttl,
            )?)
            .await?;
        on_progress(received_bytes, session.meta.total_bytes);

        if received_count == total_chunks {
            substrate
                .publish(data_event(keys, session, EventType::Ack, Some(-1), String::new(), ttl)?)
                .await?;
            debug!(total_chunks, "cloud receive complete");
            return Ok(Bytes::from(buffer));
        }
    }
}
