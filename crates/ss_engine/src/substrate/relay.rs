//! WebSocket relay client.
//!
//! Wire protocol (JSON arrays, one per text frame):
//!   client → relay: ["EVENT", <event>]          publish
//!                   ["REQ", <sub_id>, <filter>] open subscription
//!                   ["CLOSE", <sub_id>]         close subscription
//!   relay → client: ["OK", <event_id>, <bool>, <msg>]
//!                   ["EVENT", <sub_id>, <event>]
//!                   ["EOSE", <sub_id>]          end of stored events
//!
//! Publish walks the endpoint list in order and returns on the first
//! accept. Subscriptions fan in from every endpoint with reconnection and
//! de-duplicate by event id; incoming events are signature-checked before
//! they reach the engine.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::RngCore;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ss_proto::{Event, Filter};

use crate::error::TransferError;
use crate::substrate::{Substrate, Subscription};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct RelaySubstrate {
    endpoints: Vec<String>,
    /// Parent of every subscription token; `close()` cancels the lot.
    root: CancellationToken,
}

impl RelaySubstrate {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints, root: CancellationToken::new() }
    }

    async fn connect(url: &str) -> Result<WsStream, TransferError> {
        let (ws, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| TransferError::SubstrateUnavailable(format!("{url}: connect timeout")))?
            .map_err(|e| TransferError::SubstrateUnavailable(format!("{url}: {e}")))?;
        Ok(ws)
    }

    fn sub_id() -> String {
        let mut bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Parsed relay frame.
enum RelayFrame {
    Ok { event_id: String, accepted: bool },
    Event { sub_id: String, event: Event },
    Eose { sub_id: String },
    Other,
}

fn parse_frame(text: &str) -> RelayFrame {
    let Ok(arr) = serde_json::from_str::<Vec<serde_json::Value>>(text) else {
        return RelayFrame::Other;
    };
    match arr.first().and_then(|v| v.as_str()) {
        Some("OK") if arr.len() >= 3 => RelayFrame::Ok {
            event_id: arr[1].as_str().unwrap_or_default().to_string(),
            accepted: arr[2].as_bool().unwrap_or(false),
        },
        Some("EVENT") if arr.len() >= 3 => {
            match serde_json::from_value::<Event>(arr[2].clone()) {
                Ok(event) => RelayFrame::Event {
                    sub_id: arr[1].as_str().unwrap_or_default().to_string(),
                    event,
                },
                Err(_) => RelayFrame::Other,
            }
        }
        Some("EOSE") if arr.len() >= 2 => RelayFrame::Eose {
            sub_id: arr[1].as_str().unwrap_or_default().to_string(),
        },
        _ => RelayFrame::Other,
    }
}

async fn publish_one(url: &str, event: &Event) -> Result<(), TransferError> {
    let mut ws = RelaySubstrate::connect(url).await?;
    let frame = serde_json::to_string(&serde_json::json!(["EVENT", event]))
        .map_err(|e| TransferError::Protocol(e.to_string()))?;
    ws.send(Message::Text(frame))
        .await
        .map_err(|e| TransferError::SubstrateUnavailable(format!("{url}: {e}")))?;

    let wait_ok = async {
        while let Some(msg) = ws.next().await {
            let Ok(Message::Text(text)) = msg else { continue };
            if let RelayFrame::Ok { event_id, accepted } = parse_frame(&text) {
                if event_id == event.id {
                    return accepted;
                }
            }
        }
        false
    };
    let accepted = timeout(PUBLISH_TIMEOUT, wait_ok)
        .await
        .map_err(|_| TransferError::SubstrateUnavailable(format!("{url}: no OK before timeout")))?;
    let _ = ws.close(None).await;

    if accepted {
        Ok(())
    } else {
        Err(TransferError::SubstrateUnavailable(format!("{url}: event rejected")))
    }
}

async fn query_one(url: &str, filter: &Filter) -> Result<Vec<Event>, TransferError> {
    let mut ws = RelaySubstrate::connect(url).await?;
    let sub_id = RelaySubstrate::sub_id();
    let req = serde_json::to_string(&serde_json::json!(["REQ", &sub_id, filter]))
        .map_err(|e| TransferError::Protocol(e.to_string()))?;
    ws.send(Message::Text(req))
        .await
        .map_err(|e| TransferError::SubstrateUnavailable(format!("{url}: {e}")))?;

    let collect = async {
        let mut events = Vec::new();
        while let Some(msg) = ws.next().await {
            let Ok(Message::Text(text)) = msg else { continue };
            match parse_frame(&text) {
                RelayFrame::Event { sub_id: sid, event } if sid == sub_id => {
                    if event.verify().is_ok() {
                        events.push(event);
                    }
                }
                RelayFrame::Eose { sub_id: sid } if sid == sub_id => break,
                _ => {}
            }
        }
        events
    };
    let events = timeout(QUERY_TIMEOUT, collect)
        .await
        .map_err(|_| TransferError::SubstrateUnavailable(format!("{url}: no EOSE before timeout")))?;

    let close = serde_json::to_string(&serde_json::json!(["CLOSE", &sub_id]))
        .map_err(|e| TransferError::Protocol(e.to_string()))?;
    let _ = ws.send(Message::Text(close)).await;
    let _ = ws.close(None).await;
    Ok(events)
}

/// One endpoint's half of a streaming subscription: connect, REQ, forward,
/// reconnect until cancelled.
async fn subscribe_worker(
    url: String,
    filter: Filter,
    tx: mpsc::Sender<Event>,
    seen: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match RelaySubstrate::connect(&url).await {
            Ok(mut ws) => {
                let sub_id = RelaySubstrate::sub_id();
                let req = match serde_json::to_string(&serde_json::json!(["REQ", &sub_id, &filter]))
                {
                    Ok(req) => req,
                    Err(_) => return,
                };
                if ws.send(Message::Text(req)).await.is_err() {
                    continue;
                }
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = ws.close(None).await;
                            return;
                        }
                        msg = ws.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let RelayFrame::Event { sub_id: sid, event } = parse_frame(&text) {
                                    if sid != sub_id || event.verify().is_err() {
                                        continue;
                                    }
                                    let fresh = seen
                                        .lock()
                                        .expect("seen lock")
                                        .insert(event.id.clone());
                                    if fresh && tx.send(event).await.is_err() {
                                        let _ = ws.close(None).await;
                                        return;
                                    }
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                debug!(%url, error = %e, "relay stream error, reconnecting");
                                break;
                            }
                            None => {
                                debug!(%url, "relay closed stream, reconnecting");
                                break;
                            }
                        },
                    }
                }
            }
            Err(e) => {
                warn!(%url, error = %e, "relay connect failed");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

#[async_trait]
impl Substrate for RelaySubstrate {
    async fn probe(&self) -> Result<(), TransferError> {
        let mut last = TransferError::SubstrateUnavailable("no relay endpoints configured".into());
        for url in &self.endpoints {
            match Self::connect(url).await {
                Ok(mut ws) => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    async fn publish(&self, event: Event) -> Result<(), TransferError> {
        let mut last = TransferError::SubstrateUnavailable("no relay endpoints configured".into());
        for url in &self.endpoints {
            match publish_one(url, &event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(%url, error = %e, "publish failed, trying next endpoint");
                    last = e;
                }
            }
        }
        Err(last)
    }

    async fn query(&self, filter: Filter) -> Result<Vec<Event>, TransferError> {
        let mut merged: Vec<Event> = Vec::new();
        let mut seen = HashSet::new();
        let mut any_ok = false;
        let mut last = TransferError::SubstrateUnavailable("no relay endpoints configured".into());

        for url in &self.endpoints {
            match query_one(url, &filter).await {
                Ok(events) => {
                    any_ok = true;
                    for ev in events {
                        if seen.insert(ev.id.clone()) {
                            merged.push(ev);
                        }
                    }
                }
                Err(e) => last = e,
            }
        }
        if any_ok {
            Ok(merged)
        } else {
            Err(last)
        }
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, TransferError> {
        if self.endpoints.is_empty() {
            return Err(TransferError::SubstrateUnavailable(
                "no relay endpoints configured".into(),
            ));
        }
        let (tx, rx) = mpsc::channel(64);
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let token = self.root.child_token();

        for url in &self.endpoints {
            tokio::spawn(subscribe_worker(
                url.clone(),
                filter.clone(),
                tx.clone(),
                Arc::clone(&seen),
                token.child_token(),
            ));
        }
        Ok(Subscription::new(rx, token.drop_guard()))
    }

    async fn close(&self) {
        self.root.cancel();
    }
}
