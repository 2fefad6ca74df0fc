//! Rendezvous substrate boundary.
//!
//! The substrate is an event bus with tag filtering. One orchestrator owns
//! one client; publishing is serialized per client. The engine validates
//! event signatures and TTLs itself — the substrate is never trusted with
//! anything but delivery.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use ss_proto::{Event, Filter};

use crate::error::TransferError;

mod memory;
mod relay;

pub use memory::MemorySubstrate;
pub use relay::RelaySubstrate;

/// Streaming subscription. Dropping it (or calling [`Subscription::close`])
/// releases the underlying forwarder.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    _guard: DropGuard,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Event>, guard: DropGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Next matching event; `None` once the substrate side is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn close(self) {}
}

#[async_trait]
pub trait Substrate: Send + Sync {
    /// Cheap connectivity check, run before a send so the caller can fall
    /// back to manual signaling instead of publishing into the void.
    async fn probe(&self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Publish to the endpoint list in order; returns once at least one
    /// endpoint accepts.
    async fn publish(&self, event: Event) -> Result<(), TransferError>;

    /// One-shot fetch of stored events matching the filter.
    async fn query(&self, filter: Filter) -> Result<Vec<Event>, TransferError>;

    /// Stream new events matching the filter.
    async fn subscribe(&self, filter: Filter) -> Result<Subscription, TransferError>;

    /// Release all subscriptions and sockets.
    async fn close(&self);
}
