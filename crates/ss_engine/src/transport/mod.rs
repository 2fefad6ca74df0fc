//! Transport boundaries.
//!
//! NAT traversal and blob storage are external collaborators; the engine
//! only drives them. [`PeerConnector`] wraps the offer/answer/ICE
//! negotiation of a platform peer-connection stack, [`PeerLink`] is the
//! ordered reliable data channel it yields, and [`BlobStore`] is the
//! short-lived ciphertext store behind the cloud fallback.

use async_trait::async_trait;
use bytes::Bytes;

use ss_proto::signal::SignalingMessage;

use crate::error::TransferError;

mod cloud;
mod direct;
mod memory;
mod retry;

pub use cloud::{run_cloud_receiver, run_cloud_sender};
pub use direct::{run_direct_receiver, run_direct_sender};
pub use memory::{MemoryBlobStore, MemoryConnector};
pub use retry::with_backoff;

/// A data channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Binary(b) => b.len(),
            Frame::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered, reliable, single-stream message channel.
#[async_trait]
pub trait PeerLink: Send {
    /// Queue a frame. Resolves once the frame is accepted into the
    /// outgoing buffer; implementations may block here for backpressure.
    async fn send(&mut self, frame: Frame) -> Result<(), TransferError>;

    /// Next incoming frame; `None` when the peer closed the channel.
    async fn recv(&mut self) -> Result<Option<Frame>, TransferError>;

    /// Bytes currently queued for sending.
    fn buffered_amount(&self) -> usize;

    /// Resolve once the outgoing buffer drains below `threshold`
    /// (the buffered-amount-low signal of the underlying channel).
    async fn wait_buffered_below(&self, threshold: usize);

    async fn close(&mut self);
}

/// One NAT-traversal negotiation. A connector instance belongs to a single
/// transfer.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Gather ICE candidates and produce the offer. The engine bounds this
    /// with the ICE timeout.
    async fn create_offer(&self) -> Result<SignalingMessage, TransferError>;

    /// Apply a peer's offer and produce the answer.
    async fn accept_offer(&self, offer: &SignalingMessage) -> Result<SignalingMessage, TransferError>;

    /// Apply the peer's answer on the offering side.
    async fn apply_answer(&self, answer: &SignalingMessage) -> Result<(), TransferError>;

    /// Resolve once the data channel is open. The engine bounds this with
    /// the channel-open timeout.
    async fn open_channel(&self) -> Result<Box<dyn PeerLink>, TransferError>;
}

/// Short-lived ciphertext store. Never sees plaintext or key material.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob, returning an opaque URL.
    async fn put(&self, data: Bytes) -> Result<String, TransferError>;

    /// Fetch a blob by URL.
    async fn get(&self, url: &str) -> Result<Bytes, TransferError>;
}
