use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Invalid event: {0}")]
    EventInvalid(String),

    #[error("Event signature verification failed")]
    EventSignatureInvalid,

    #[error("Malformed wire data: {0}")]
    Malformed(String),

    #[error("Unknown magic prefix — not a manual signaling payload")]
    BadMagic,

    #[error("Payload exceeds the configured maximum ({size} > {max} bytes)")]
    Oversized { size: u64, max: u64 },

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] ss_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
