//! Transfer orchestrator.
//!
//! Owns the top-level state machine for one transfer. All progress and
//! every outcome flow through the [`TransferHandle`] state stream — the
//! single authoritative surface; there are no out-of-band signals.
//!
//! Cancellation flips a token observed at every suspension point; TTL
//! expiry behaves like a scheduled cancellation with an `Expired` outcome.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ss_crypto::passkey::PasskeyProvider;

use crate::error::{ErrorKind, TransferError};
use crate::substrate::Substrate;
use crate::transport::{BlobStore, PeerConnector};

pub mod manual;
mod receiver;
mod sender;

pub use receiver::receive;
pub use sender::send;

/// External collaborators wired into one transfer.
#[derive(Clone)]
pub struct EngineDeps {
    pub substrate: Arc<dyn Substrate>,
    /// NAT-traversal stack; without one, only the cloud path is possible.
    pub connector: Option<Arc<dyn PeerConnector>>,
    /// Blob store for the cloud fallback.
    pub blob_store: Option<Arc<dyn BlobStore>>,
    /// Platform authenticator; required for the passkey modes.
    pub passkey: Option<Arc<dyn PasskeyProvider>>,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Restrict the peer connection to relayed ICE and never stage chunks
    /// through the blob store.
    pub relay_only: bool,
    pub use_passkey: bool,
    /// Same passkey on both endpoints (device-to-device).
    pub self_transfer: bool,
    /// Canonical JSON of the pairing key naming the receiver (cross-user).
    pub receiver_pairing_key: Option<String>,
}

/// What the sender transmits.
#[derive(Debug, Clone)]
pub struct SendContent {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// Receiver credential: a PIN typed by the user, or the local passkey.
pub enum ReceiveCredential {
    Pin(ss_crypto::pin::Pin),
    Passkey {
        self_transfer: bool,
        /// Canonical JSON of the pairing key naming the sender (cross-user).
        sender_pairing_key: Option<String>,
    },
}

/// What the sender shows the user so the receiver can connect.
#[derive(Debug, Clone)]
pub enum CredentialDisplay {
    Pin {
        pin: String,
        /// Seven-word spoken form.
        words: Vec<String>,
    },
    Fingerprint {
        fingerprint: String,
        /// Grouped for on-screen comparison (`XXXX XXXX XXXX XXXX`).
        display: String,
    },
}

/// Decrypted payload surfaced on receiver completion.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub enum TransferState {
    Idle,
    Preparing,
    WaitingForReceiver,
    Connecting,
    Transferring { bytes_sent: u64, total_bytes: u64 },
    Receiving { bytes_received: u64, total_bytes: u64 },
    /// Terminal. Carries the decrypted payload on the receiving side.
    Complete(Option<ReceivedFile>),
    /// Terminal.
    Cancelled,
    /// Terminal.
    Error { kind: ErrorKind, message: String },
}

/// Handle to a running transfer: the state stream plus cancellation.
pub struct TransferHandle {
    states: mpsc::Receiver<TransferState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TransferHandle {
    /// Next state; `None` after a terminal state has been delivered.
    pub async fn next_state(&mut self) -> Option<TransferState> {
        self.states.recv().await
    }

    /// Idempotent. All in-flight awaits resolve promptly to `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the transfer task to finish (after a terminal state).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

// ── Internal plumbing ────────────────────────────────────────────────────────

/// State emitter shared by the sender/receiver tasks.
#[derive(Clone)]
pub(crate) struct StateTx(mpsc::Sender<TransferState>);

impl StateTx {
    pub(crate) async fn emit(&self, state: TransferState) {
        let _ = self.0.send(state).await;
    }

    /// Lossy emit for high-frequency progress updates.
    pub(crate) fn emit_progress(&self, state: TransferState) {
        let _ = self.0.try_send(state);
    }
}

/// Spawn the transfer body under the cancellation token and TTL clock, and
/// translate its outcome into the single terminal state. Returns the full
/// handle; `states_rx` is the receiver half of the state channel.
pub(crate) fn spawn_transfer<F>(
    deps: EngineDeps,
    ttl: std::time::Duration,
    cancel: CancellationToken,
    states_tx: mpsc::Sender<TransferState>,
    states_rx: mpsc::Receiver<TransferState>,
    body: F,
) -> TransferHandle
where
    F: std::future::Future<Output = Result<Option<ReceivedFile>, TransferError>> + Send + 'static,
{
    let tx = StateTx(states_tx);
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(TransferError::Cancelled),
            _ = tokio::time::sleep(ttl) => Err(TransferError::Expired(
                "Transfer expired. Ask sender to start a new transfer.".into(),
            )),
            r = body => r,
        };
        let terminal = match outcome {
            Ok(file) => TransferState::Complete(file),
            Err(TransferError::Cancelled) => TransferState::Cancelled,
            Err(e) => {
                tracing::warn!(error = %e, "transfer failed");
                TransferState::Error { kind: e.kind(), message: e.to_string() }
            }
        };
        tx.emit(terminal).await;
        deps.substrate.close().await;
    });

    TransferHandle { states: states_rx, cancel, task }
}
