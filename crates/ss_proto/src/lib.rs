//! ss_proto — Secure Send wire types and serialisation
//!
//! Everything that crosses a process boundary is defined here:
//! - `event`    — rendezvous event envelope (dumb-relay contract)
//! - `tags`     — tag keys, event types, tag list builder
//! - `filter`   — subscription filters (in-memory matching + REQ shape)
//! - `transfer` — transfer ids, payload metadata, chunk math
//! - `chunk`    — direct/cloud chunk wire formats and control frames
//! - `signal`   — SDP signaling payloads, gzip + `SS01` manual envelope
//! - `error`    — unified error type

pub mod chunk;
pub mod error;
pub mod event;
pub mod filter;
pub mod signal;
pub mod tags;
pub mod transfer;

pub use error::ProtoError;
pub use event::{Event, EventKeypair, KIND_DATA, KIND_HANDSHAKE};
pub use filter::Filter;
pub use tags::{EventType, Tags};
pub use transfer::{TransferId, TransferMeta};
