//! Manual signaling mode (PINs starting with `2`).
//!
//! No rendezvous substrate: the two `SS01` envelopes travel out of band
//! (QR code, copy-paste — rendering is outside the engine). The offer
//! envelope's salt keys the transfer: both sides derive the same
//! PBKDF2 key from PIN + salt, so the channel inherits the PIN's secrecy
//! without a relay round-trip. No ephemeral exchange happens in this mode;
//! the envelope format carries none.
//!
//! Step order:
//!   sender:   `ManualSend::offer` → show envelope → `finish(answer)`
//!   receiver: `ManualReceive::accept(offer)` → show envelope → `finish()`

use std::sync::Arc;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ss_crypto::kdf;
use ss_crypto::keystore::SessionKey;
use ss_crypto::pin::{Pin, SignalingMethod};
use ss_proto::signal::{
    decode_manual_detailed, encode_manual_with_salt, SignalKind, SignalingMessage,
};
use ss_proto::transfer::TransferMeta;

use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::transport::{run_direct_receiver, run_direct_sender, PeerConnector};

use super::{ReceivedFile, SendContent};

fn require_manual_pin(pin: &Pin) -> Result<(), TransferError> {
    if pin.method() != Some(SignalingMethod::Manual) {
        return Err(TransferError::CredentialInvalid(
            "manual signaling requires a manual-mode PIN (first character '2')".into(),
        ));
    }
    Ok(())
}

/// Sender half of a manual transfer.
pub struct ManualSend {
    connector: Arc<dyn PeerConnector>,
    key: SessionKey,
    pin: Pin,
}

impl ManualSend {
    /// Create the offer envelope to hand to the receiver out of band.
    pub async fn offer(
        connector: Arc<dyn PeerConnector>,
        pin: Pin,
        content: &SendContent,
        config: &EngineConfig,
    ) -> Result<(ManualSend, Vec<u8>), TransferError> {
        require_manual_pin(&pin)?;
        let meta = TransferMeta::for_payload(
            &content.file_name,
            &content.mime_type,
            content.bytes.len() as u64,
            config.direct_chunk_size,
            config.max_file_size,
        )?;

        let mut offer = timeout(config.ice_timeout, connector.create_offer())
            .await
            .map_err(|_| TransferError::Transport("ICE gathering timed out".into()))??;
        offer.content_type = Some("file".into());
        offer.file_name = Some(meta.file_name.clone());
        offer.file_size = Some(meta.file_size);
        offer.mime_type = Some(meta.mime_type.clone());
        offer.total_bytes = Some(meta.total_bytes);

        let salt = kdf::generate_salt();
        let envelope = encode_manual_with_salt(&pin.material(), &offer, &salt)?;
        let key = kdf::derive_pin_key(&pin.material(), &salt);
        Ok((ManualSend { connector, key, pin }, envelope))
    }

    /// Apply the receiver's answer envelope and stream the payload.
    pub async fn finish(
        self,
        answer_envelope: &[u8],
        payload: &[u8],
        config: &EngineConfig,
        cancel: &CancellationToken,
        on_progress: impl FnMut(u64, u64) + Send,
    ) -> Result<(), TransferError> {
        let (answer, _) = decode_manual_detailed(&self.pin.material(), answer_envelope)?;
        if answer.kind != SignalKind::Answer {
            return Err(TransferError::Protocol("expected an answer envelope".into()));
        }
        self.connector.apply_answer(&answer).await?;

        let mut link = timeout(config.channel_open_timeout, self.connector.open_channel())
            .await
            .map_err(|_| TransferError::Transport("data channel failed to open in time".into()))??;
        info!("manual direct channel open");

        run_direct_sender(
            link.as_mut(),
            &self.key,
            payload,
            config.direct_chunk_size,
            config.backpressure_high_water,
            config.backpressure_low_water,
            config.chunk_ack_timeout,
            cancel,
            on_progress,
        )
        .await?;
        link.close().await;
        Ok(())
    }
}

/// Receiver half of a manual transfer.
pub struct ManualReceive {
    connector: Arc<dyn PeerConnector>,
    key: SessionKey,
    meta: TransferMeta,
}

impl ManualReceive {
    /// Consume the sender's offer envelope; returns the answer envelope to
    /// hand back out of band.
    pub async fn accept(
        connector: Arc<dyn PeerConnector>,
        pin: &Pin,
        offer_envelope: &[u8],
        config: &EngineConfig,
    ) -> Result<(ManualReceive, Vec<u8>), TransferError> {
        require_manual_pin(pin)?;
        let (offer, salt) = decode_manual_detailed(&pin.material(), offer_envelope)?;
        if offer.kind != SignalKind::Offer {
            return Err(TransferError::Protocol("expected an offer envelope".into()));
        }
        let meta = manual_meta(&offer, config)?;

        let answer = connector.accept_offer(&offer).await?;
        let answer_envelope = encode_manual_with_salt(&pin.material(), &answer, &salt)?;
        let key = kdf::derive_pin_key(&pin.material(), &salt);
        Ok((ManualReceive { connector, key, meta }, answer_envelope))
    }

    /// Open the channel and receive the payload.
    pub async fn finish(
        self,
        config: &EngineConfig,
        cancel: &CancellationToken,
        on_progress: impl FnMut(u64, u64) + Send,
    ) -> Result<ReceivedFile, TransferError> {
        let mut link = timeout(config.channel_open_timeout, self.connector.open_channel())
            .await
            .map_err(|_| TransferError::Transport("data channel failed to open in time".into()))??;
        info!("manual direct channel open");

        let bytes = run_direct_receiver(
            link.as_mut(),
            &self.key,
            self.meta.total_bytes,
            config.direct_chunk_size,
            cancel,
            on_progress,
        )
        .await?;
        link.close().await;
        Ok(ReceivedFile {
            file_name: self.meta.file_name,
            mime_type: self.meta.mime_type,
            bytes,
        })
    }
}

fn manual_meta(offer: &SignalingMessage, config: &EngineConfig) -> Result<TransferMeta, TransferError> {
    let file_name = offer
        .file_name
        .as_deref()
        .ok_or_else(|| TransferError::Protocol("manual offer lacks fileName".into()))?;
    let total_bytes = offer
        .total_bytes
        .or(offer.file_size)
        .ok_or_else(|| TransferError::Protocol("manual offer lacks totalBytes".into()))?;
    let mime_type = offer.mime_type.as_deref().unwrap_or("application/octet-stream");
    Ok(TransferMeta::for_payload(
        file_name,
        mime_type,
        total_bytes,
        config.direct_chunk_size,
        config.max_file_size,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;
    use bytes::Bytes;

    fn manual_pin() -> Pin {
        Pin::generate(SignalingMethod::Manual)
    }

    #[tokio::test]
    async fn manual_exchange_roundtrip() {
        let (conn_a, conn_b) = MemoryConnector::pair();
        let config = EngineConfig::default();
        let pin = manual_pin();
        let payload = Bytes::from((0..200_000).map(|i| (i % 199) as u8).collect::<Vec<u8>>());
        let content = SendContent {
            file_name: "manual.bin".into(),
            mime_type: "application/octet-stream".into(),
            bytes: payload.clone(),
        };

        let (sender, offer_env) = ManualSend::offer(
            Arc::new(conn_a),
            Pin::parse(pin.as_str()).unwrap(),
            &content,
            &config,
        )
        .await
        .unwrap();
        assert_eq!(&offer_env[..4], ss_proto::signal::MANUAL_MAGIC);

        let (receiver, answer_env) =
            ManualReceive::accept(Arc::new(conn_b), &pin, &offer_env, &config)
                .await
                .unwrap();

        let cancel = CancellationToken::new();
        let (sent, received) = tokio::join!(
            sender.finish(&answer_env, &payload, &config, &cancel, |_, _| {}),
            receiver.finish(&config, &cancel, |_, _| {}),
        );
        sent.unwrap();
        let file = received.unwrap();
        assert_eq!(file.file_name, "manual.bin");
        assert_eq!(file.bytes, payload);
    }

    #[tokio::test]
    async fn relay_pin_is_rejected() {
        let (conn_a, _conn_b) = MemoryConnector::pair();
        let config = EngineConfig::default();
        let content = SendContent {
            file_name: "x.bin".into(),
            mime_type: "application/octet-stream".into(),
            bytes: Bytes::from_static(b"data"),
        };
        let relay_pin = Pin::generate(ss_crypto::pin::SignalingMethod::Relay);
        let err = ManualSend::offer(Arc::new(conn_a), relay_pin, &content, &config)
            .await
            .err()
            .expect("relay PIN must be rejected");
        assert!(matches!(err, TransferError::CredentialInvalid(_)));
    }
}
