//! ss_engine — Secure Send transfer protocol engine
//!
//! One transfer = one orchestrator run: rendezvous over the substrate,
//! authenticated key agreement, then a direct peer channel (or the cloud
//! blob fallback) streaming encrypted chunks.
//!
//! # Module layout
//! - `orchestrator` — public API: `send` / `receive` / `TransferHandle`,
//!   plus the manual (out-of-band) signaling flow
//! - `handshake`    — PIN / self-transfer / cross-user handshakes
//! - `substrate`    — event-bus boundary: in-memory bus + WebSocket relays
//! - `transport`    — peer-connection and blob-store boundaries, the
//!   direct and cloud streaming engines
//! - `session`      — established session state
//! - `config`       — timeouts, sizes, retry policy
//! - `error`        — transfer error taxonomy
//!
//! # Trust model
//! The substrate and the blob store see ciphertext and opaque hints only.
//! Session keys are fresh ECDH output held behind non-extractable handles;
//! every verification value is compared in constant time.

pub mod config;
pub mod error;
pub mod handshake;
pub mod orchestrator;
pub mod session;
pub mod substrate;
pub mod transport;

pub use config::EngineConfig;
pub use error::{ErrorKind, TransferError};
pub use orchestrator::{
    receive, send, CredentialDisplay, EngineDeps, ReceiveCredential, ReceivedFile, SendContent,
    SendOptions, TransferHandle, TransferState,
};
pub use session::Session;
pub use substrate::{MemorySubstrate, RelaySubstrate, Substrate, Subscription};
pub use transport::{BlobStore, MemoryBlobStore, MemoryConnector, PeerConnector, PeerLink};
