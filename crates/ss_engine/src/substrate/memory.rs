//! In-process substrate: a broadcast bus with stored history.
//!
//! Backs same-process transfers and the integration tests. Semantics match
//! the relay client: publish validates the signature, query returns stored
//! events, subscriptions deliver new events only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ss_proto::{Event, Filter};

use crate::error::TransferError;
use crate::substrate::{Substrate, Subscription};

struct Inner {
    history: Mutex<Vec<Event>>,
    bus: broadcast::Sender<Event>,
}

/// Client handle onto a shared in-memory bus.
///
/// Cloning yields an independent client on the same bus: each orchestrator
/// owns its own handle, and `close()` only affects that handle.
pub struct MemorySubstrate {
    inner: Arc<Inner>,
    closed: AtomicBool,
}

impl Clone for MemorySubstrate {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), closed: AtomicBool::new(false) }
    }
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySubstrate {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                history: Mutex::new(Vec::new()),
                bus,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored events (test observability).
    pub fn stored(&self) -> usize {
        self.inner.history.lock().expect("history lock").len()
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn publish(&self, event: Event) -> Result<(), TransferError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferError::SubstrateUnavailable("client closed".into()));
        }
        event.verify()?;

        {
            let mut history = self.inner.history.lock().expect("history lock");
            if history.iter().any(|e| e.id == event.id) {
                return Ok(()); // duplicate, already accepted
            }
            history.push(event.clone());
        }
        // No receivers is fine; query() still sees the event.
        let _ = self.inner.bus.send(event);
        Ok(())
    }

    async fn query(&self, filter: Filter) -> Result<Vec<Event>, TransferError> {
        let history = self.inner.history.lock().expect("history lock");
        Ok(history.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, TransferError> {
        let (tx, rx) = mpsc::channel(64);
        let mut bus_rx = self.inner.bus.subscribe();
        let token = CancellationToken::new();
        let child = token.child_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    recv = bus_rx.recv() => match recv {
                        Ok(event) => {
                            if filter.matches(&event) && tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "memory substrate subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(Subscription::new(rx, token.drop_guard()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ss_proto::event::{EventKeypair, KIND_DATA};
    use ss_proto::tags::{self, Tags};

    fn event(tid: &str) -> Event {
        let keys = EventKeypair::generate();
        Event::build(
            &keys,
            KIND_DATA,
            1_700_000_000,
            Tags::new().push(tags::T, tid),
            String::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publish_then_query() {
        let bus = MemorySubstrate::new();
        bus.publish(event("aaaaaaaaaaaaaaaa")).await.unwrap();
        bus.publish(event("bbbbbbbbbbbbbbbb")).await.unwrap();

        let hits = bus
            .query(Filter::new().transfer("aaaaaaaaaaaaaaaa"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn subscription_sees_new_events_only() {
        let bus = MemorySubstrate::new();
        bus.publish(event("aaaaaaaaaaaaaaaa")).await.unwrap();

        let mut sub = bus
            .subscribe(Filter::new().transfer("aaaaaaaaaaaaaaaa"))
            .await
            .unwrap();
        let ev = event("aaaaaaaaaaaaaaaa");
        bus.publish(ev.clone()).await.unwrap();

        let got = sub.next().await.unwrap();
        assert_eq!(got.id, ev.id);
    }

    #[tokio::test]
    async fn duplicate_ids_are_stored_once() {
        let bus = MemorySubstrate::new();
        let ev = event("cccccccccccccccc");
        bus.publish(ev.clone()).await.unwrap();
        bus.publish(ev).await.unwrap();
        assert_eq!(bus.stored(), 1);
    }

    #[tokio::test]
    async fn tampered_event_rejected() {
        let bus = MemorySubstrate::new();
        let mut ev = event("dddddddddddddddd");
        ev.content = "dGFtcGVyZWQ".into();
        assert!(bus.publish(ev).await.is_err());
    }

    #[tokio::test]
    async fn closed_client_rejects_publish() {
        let bus = MemorySubstrate::new();
        bus.close().await;
        assert!(matches!(
            bus.publish(event("eeeeeeeeeeeeeeee")).await,
            Err(TransferError::SubstrateUnavailable(_))
        ));
    }
}
