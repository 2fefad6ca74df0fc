//! Transfer error taxonomy.
//!
//! Every failure surfaces as exactly one terminal `Error` state carrying a
//! [`TransferError`]; nothing is retried silently except bounded blob-store
//! retries and per-endpoint substrate publishing.

use thiserror::Error;

use ss_crypto::CryptoError;
use ss_proto::ProtoError;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid credential: {0}")]
    CredentialInvalid(String),

    #[error("Invalid pairing key: {0}")]
    PairingKeyInvalid(String),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("{0}")]
    Expired(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Rendezvous substrate unavailable: {0}")]
    SubstrateUnavailable(String),
}

/// Cloneable discriminant for the state stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CredentialInvalid,
    PairingKeyInvalid,
    HandshakeRejected,
    Expired,
    Cancelled,
    Transport,
    Protocol,
    SubstrateUnavailable,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::CredentialInvalid(_) => ErrorKind::CredentialInvalid,
            TransferError::PairingKeyInvalid(_) => ErrorKind::PairingKeyInvalid,
            TransferError::HandshakeRejected(_) => ErrorKind::HandshakeRejected,
            TransferError::Expired(_) => ErrorKind::Expired,
            TransferError::Cancelled => ErrorKind::Cancelled,
            TransferError::Transport(_) => ErrorKind::Transport,
            TransferError::Protocol(_) => ErrorKind::Protocol,
            TransferError::SubstrateUnavailable(_) => ErrorKind::SubstrateUnavailable,
        }
    }
}

impl From<CryptoError> for TransferError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::PinInvalid(_) | CryptoError::PasskeyUnavailable => {
                TransferError::CredentialInvalid(err.to_string())
            }
            CryptoError::Cancelled => TransferError::Cancelled,
            CryptoError::PairingMalformed(_)
            | CryptoError::PairingExpired
            | CryptoError::NotAParty
            | CryptoError::SlotMismatch
            | CryptoError::SignatureInvalid => TransferError::PairingKeyInvalid(err.to_string()),
            other => TransferError::Protocol(other.to_string()),
        }
    }
}

impl From<ProtoError> for TransferError {
    fn from(err: ProtoError) -> Self {
        TransferError::Protocol(err.to_string())
    }
}
