//! Loopback transport implementations.
//!
//! [`MemoryConnector`] pairs two in-process endpoints with bounded duplex
//! queues so the direct transport's backpressure path is exercised for
//! real. [`MemoryBlobStore`] is a hash map behind the blob contract. Both
//! back the integration tests and same-machine transfers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use ss_proto::signal::SignalingMessage;

use crate::error::TransferError;
use crate::transport::{BlobStore, Frame, PeerConnector, PeerLink};

/// Default per-direction buffer capacity (matches the engine's
/// backpressure high-water mark so tests hit the pause path).
const DEFAULT_CAPACITY: usize = 1024 * 1024;

// ── Bounded frame queue ──────────────────────────────────────────────────────

struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    buffered: AtomicUsize,
    capacity: usize,
    closed: AtomicBool,
    on_push: Notify,
    on_pop: Notify,
}

impl FrameQueue {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::new()),
            buffered: AtomicUsize::new(0),
            capacity,
            closed: AtomicBool::new(false),
            on_push: Notify::new(),
            on_pop: Notify::new(),
        })
    }

    async fn push(&self, frame: Frame) -> Result<(), TransferError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransferError::Transport("data channel closed".into()));
            }
            if self.buffered.load(Ordering::SeqCst) < self.capacity {
                let len = frame.len();
                self.frames.lock().expect("queue lock").push_back(frame);
                self.buffered.fetch_add(len, Ordering::SeqCst);
                self.on_push.notify_one();
                return Ok(());
            }
            self.on_pop.notified().await;
        }
    }

    async fn pop(&self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.frames.lock().expect("queue lock").pop_front() {
                self.buffered.fetch_sub(frame.len(), Ordering::SeqCst);
                self.on_pop.notify_one();
                return Some(frame);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.on_push.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.on_push.notify_waiters();
        self.on_pop.notify_waiters();
    }
}

// ── Link ─────────────────────────────────────────────────────────────────────

pub struct MemoryLink {
    outgoing: Arc<FrameQueue>,
    incoming: Arc<FrameQueue>,
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.outgoing.close();
    }
}

#[async_trait]
impl PeerLink for MemoryLink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransferError> {
        self.outgoing.push(frame).await
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransferError> {
        Ok(self.incoming.pop().await)
    }

    fn buffered_amount(&self) -> usize {
        self.outgoing.buffered.load(Ordering::SeqCst)
    }

    async fn wait_buffered_below(&self, threshold: usize) {
        while self.outgoing.buffered.load(Ordering::SeqCst) >= threshold {
            self.outgoing.on_pop.notified().await;
        }
    }

    async fn close(&mut self) {
        self.outgoing.close();
    }
}

// ── Connector ────────────────────────────────────────────────────────────────

struct PairState {
    a_to_b: Arc<FrameQueue>,
    b_to_a: Arc<FrameQueue>,
    /// Both sides must have completed signaling before a channel opens.
    offered: AtomicBool,
    answered: AtomicBool,
    open_notify: Notify,
}

/// One endpoint of an in-process peer connection.
pub struct MemoryConnector {
    state: Arc<PairState>,
    is_offerer: bool,
    /// Never opens a channel — simulates an unreachable peer / failed ICE.
    unreachable: bool,
}

impl MemoryConnector {
    /// A connected pair of endpoints (offerer, answerer).
    pub fn pair() -> (MemoryConnector, MemoryConnector) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    pub fn pair_with_capacity(capacity: usize) -> (MemoryConnector, MemoryConnector) {
        let state = Arc::new(PairState {
            a_to_b: FrameQueue::new(capacity),
            b_to_a: FrameQueue::new(capacity),
            offered: AtomicBool::new(false),
            answered: AtomicBool::new(false),
            open_notify: Notify::new(),
        });
        (
            MemoryConnector { state: Arc::clone(&state), is_offerer: true, unreachable: false },
            MemoryConnector { state, is_offerer: false, unreachable: false },
        )
    }

    /// An endpoint whose channel never opens (the engine's open timeout
    /// fires and the cloud fallback kicks in).
    pub fn unreachable() -> MemoryConnector {
        let (mut a, _b) = Self::pair();
        a.unreachable = true;
        a
    }
}

#[async_trait]
impl PeerConnector for MemoryConnector {
    async fn create_offer(&self) -> Result<SignalingMessage, TransferError> {
        Ok(SignalingMessage::offer(
            "v=0\r\ns=secure-send loopback\r\n",
            vec!["candidate:0 1 UDP 1 127.0.0.1 0 typ host".into()],
        ))
    }

    async fn accept_offer(&self, _offer: &SignalingMessage) -> Result<SignalingMessage, TransferError> {
        self.state.offered.store(true, Ordering::SeqCst);
        self.state.open_notify.notify_waiters();
        Ok(SignalingMessage::answer(
            "v=0\r\ns=secure-send loopback\r\n",
            vec!["candidate:0 1 UDP 1 127.0.0.1 0 typ host".into()],
        ))
    }

    async fn apply_answer(&self, _answer: &SignalingMessage) -> Result<(), TransferError> {
        self.state.answered.store(true, Ordering::SeqCst);
        self.state.open_notify.notify_waiters();
        Ok(())
    }

    async fn open_channel(&self) -> Result<Box<dyn PeerLink>, TransferError> {
        if self.unreachable {
            // Pend until the engine's open timeout gives up on us.
            futures::future::pending::<()>().await;
        }
        while !(self.state.offered.load(Ordering::SeqCst)
            && self.state.answered.load(Ordering::SeqCst))
        {
            self.state.open_notify.notified().await;
        }
        let (outgoing, incoming) = if self.is_offerer {
            (Arc::clone(&self.state.a_to_b), Arc::clone(&self.state.b_to_a))
        } else {
            (Arc::clone(&self.state.b_to_a), Arc::clone(&self.state.a_to_b))
        };
        Ok(Box::new(MemoryLink { outgoing, incoming }))
    }
}

// ── Blob store ───────────────────────────────────────────────────────────────

/// In-memory blob store with opaque URLs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    counter: AtomicUsize,
    /// Fail the first N put calls (retry-path testing).
    put_failures: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` uploads fail with a transport error.
    pub fn fail_next_puts(&self, n: usize) {
        self.put_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<String, TransferError> {
        if self
            .put_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransferError::Transport("simulated upload failure".into()));
        }
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let url = format!("blob:{id:08x}");
        self.blobs.lock().expect("blob lock").insert(url.clone(), data);
        Ok(url)
    }

    async fn get(&self, url: &str) -> Result<Bytes, TransferError> {
        self.blobs
            .lock()
            .expect("blob lock")
            .get(url)
            .cloned()
            .ok_or_else(|| TransferError::Transport(format!("no such blob: {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_delivers_in_order() {
        let (a, b) = MemoryConnector::pair();
        let offer = a.create_offer().await.unwrap();
        let answer = b.accept_offer(&offer).await.unwrap();
        a.apply_answer(&answer).await.unwrap();

        let mut link_a = a.open_channel().await.unwrap();
        let mut link_b = b.open_channel().await.unwrap();

        link_a.send(Frame::Binary(Bytes::from_static(b"one"))).await.unwrap();
        link_a.send(Frame::Text("two".into())).await.unwrap();

        assert_eq!(link_b.recv().await.unwrap(), Some(Frame::Binary(Bytes::from_static(b"one"))));
        assert_eq!(link_b.recv().await.unwrap(), Some(Frame::Text("two".into())));

        link_a.close().await;
        assert_eq!(link_b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn send_applies_backpressure() {
        let (a, b) = MemoryConnector::pair_with_capacity(16);
        let offer = a.create_offer().await.unwrap();
        let answer = b.accept_offer(&offer).await.unwrap();
        a.apply_answer(&answer).await.unwrap();
        let mut link_a = a.open_channel().await.unwrap();
        let mut link_b = b.open_channel().await.unwrap();

        link_a.send(Frame::Binary(Bytes::from(vec![0u8; 16]))).await.unwrap();
        // Queue full: the next send must block until the receiver drains.
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            link_a.send(Frame::Binary(Bytes::from(vec![0u8; 16]))),
        )
        .await;
        assert!(blocked.is_err(), "send should block while the queue is full");

        link_b.recv().await.unwrap();
        link_a.send(Frame::Binary(Bytes::from(vec![0u8; 16]))).await.unwrap();
    }

    #[tokio::test]
    async fn blob_store_roundtrip_and_failures() {
        let store = MemoryBlobStore::new();
        store.fail_next_puts(1);
        assert!(store.put(Bytes::from_static(b"x")).await.is_err());

        let url = store.put(Bytes::from_static(b"ciphertext")).await.unwrap();
        assert_eq!(store.get(&url).await.unwrap(), Bytes::from_static(b"ciphertext"));
        assert!(store.get("blob:missing").await.is_err());
    }
}
