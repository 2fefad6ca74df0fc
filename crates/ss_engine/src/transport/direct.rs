//! Direct-path streaming over an open data channel.
//!
//! Sender: slice the payload into 128 KiB chunks, encrypt each under the
//! session key with a (random prefix ‖ seq) nonce, frame as
//! `u32_be(seq) ‖ nonce ‖ ciphertext`, and respect the channel's
//! buffered-amount backpressure. Finish with `"DONE:<n>"` and wait for
//! `"DONE_ACK"`.
//!
//! Receiver: chunks may be processed out of order in principle, so every
//! chunk is written at its absolute offset `seq · chunk_size`; the set of
//! received sequence numbers is checked against the sender's DONE count
//! before acknowledging.
//!
//! Once a channel is open the transfer completes on it or fails — there is
//! no mid-stream fallback to the cloud path.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ss_crypto::keystore::SessionKey;
use ss_proto::chunk::{self, ControlFrame, NONCE_PREFIX_LEN};
use ss_proto::transfer::chunk_count;

use crate::error::TransferError;
use crate::transport::{Frame, PeerLink};

fn nonce_prefix() -> [u8; NONCE_PREFIX_LEN] {
    use rand::RngCore;
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    rand::rngs::OsRng.fill_bytes(&mut prefix);
    prefix
}

/// Stream `payload` to the peer. `on_progress(bytes_sent, total_bytes)`
/// fires after every chunk.
#[allow(clippy::too_many_arguments)]
pub async fn run_direct_sender(
    link: &mut dyn PeerLink,
    key: &SessionKey,
    payload: &[u8],
    chunk_size: usize,
    high_water: usize,
    low_water: usize,
    done_ack_timeout: Duration,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u64, u64) + Send,
) -> Result<(), TransferError> {
    let total_bytes = payload.len() as u64;
    let total_chunks = chunk_count(total_bytes, chunk_size);
    let prefix = nonce_prefix();

    debug!(total_chunks, total_bytes, "direct send starting");

    for seq in 0..total_chunks {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let start = (seq as usize) * chunk_size;
        let end = payload.len().min(start + chunk_size);
        let nonce = chunk::chunk_nonce(&prefix, seq);
        let ciphertext = key.encrypt_with_nonce(&nonce, &payload[start..end], &chunk::chunk_aad(seq))?;
        let frame = chunk::encode_chunk(seq as u32, &nonce, &ciphertext);

        if link.buffered_amount() >= high_water {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = link.wait_buffered_below(low_water) => {}
            }
        }
        link.send(Frame::Binary(frame)).await?;
        on_progress(end as u64, total_bytes);
    }

    link.send(Frame::Text(ControlFrame::Done { total_chunks }.encode())).await?;

    // The receiver settles outstanding decryptions before acknowledging.
    let ack = tokio::select! {
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        r = tokio::time::timeout(done_ack_timeout, wait_done_ack(link)) => {
            r.map_err(|_| TransferError::Transport("timed out waiting for DONE_ACK".into()))?
        }
    };
    ack?;
    debug!("direct send complete");
    Ok(())
}

async fn wait_done_ack(link: &mut dyn PeerLink) -> Result<(), TransferError> {
    loop {
        match link.recv().await? {
            Some(Frame::Text(text)) => match ControlFrame::parse(&text)? {
                ControlFrame::DoneAck => return Ok(()),
                ControlFrame::Done { .. } => {
                    return Err(TransferError::Protocol("unexpected DONE from receiver".into()))
                }
            },
            Some(Frame::Binary(_)) => {
                return Err(TransferError::Protocol(
                    "unexpected binary frame from receiver".into(),
                ))
            }
            None => return Err(TransferError::Transport("channel closed before DONE_ACK".into())),
        }
    }
}

/// Receive a payload of `total_bytes`. Returns the reassembled plaintext.
pub async fn run_direct_receiver(
    link: &mut dyn PeerLink,
    key: &SessionKey,
    total_bytes: u64,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u64, u64) + Send,
) -> Result<Bytes, TransferError> {
    let expected_chunks = chunk_count(total_bytes, chunk_size);
    let mut buffer = vec![0u8; total_bytes as usize];
    let mut received = vec![false; expected_chunks as usize];
    let mut received_count: u64 = 0;
    let mut received_bytes: u64 = 0;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            f = link.recv() => f?,
        };
        match frame {
            Some(Frame::Binary(data)) => {
                let (seq, nonce, ciphertext) = chunk::decode_chunk(&data)?;
                let seq = seq as u64;
                if seq >= expected_chunks {
                    return Err(TransferError::Protocol(format!(
                        "chunk {seq} out of range (expected {expected_chunks} chunks)"
                    )));
                }
                let plaintext =
                    key.decrypt_detached(&nonce, ciphertext, &chunk::chunk_aad(seq))?;

                let offset = (seq as usize) * chunk_size;
                let expected_len = (total_bytes as usize).min(offset + chunk_size) - offset;
                if plaintext.len() != expected_len {
                    return Err(TransferError::Protocol(format!(
                        "chunk {seq} has {} bytes, expected {expected_len}",
                        plaintext.len()
                    )));
                }
                buffer[offset..offset + plaintext.len()].copy_from_slice(&plaintext);

                if !received[seq as usize] {
                    received[seq as usize] = true;
                    received_count += 1;
                    received_bytes += plaintext.len() as u64;
                } else {
                    warn!(seq, "duplicate chunk");
                }
                on_progress(received_bytes, total_bytes);
            }
            Some(Frame::Text(text)) => match ControlFrame::parse(&text)? {
                ControlFrame::Done { total_chunks } => {
                    if total_chunks != expected_chunks || received_count != expected_chunks {
                        return Err(TransferError::Protocol(format!(
                            "incomplete transfer: {received_count} of {total_chunks} chunks"
                        )));
                    }
                    link.send(Frame::Text(ControlFrame::DoneAck.encode())).await?;
                    debug!(total_chunks, "direct receive complete");
                    return Ok(Bytes::from(buffer));
                }
                ControlFrame::DoneAck => {
                    return Err(TransferError::Protocol("unexpected DONE_ACK from sender".into()))
                }
            },
            None => {
                return Err(TransferError::Transport(
                    "channel closed before transfer completed".into(),
                ))
            }
        }
    }
}
