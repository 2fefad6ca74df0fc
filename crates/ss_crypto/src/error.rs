use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid PIN: {0}")]
    PinInvalid(String),

    #[error("Passkey PRF extension is not available on this authenticator")]
    PasskeyUnavailable,

    #[error("Authentication cancelled by the user")]
    Cancelled,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AeadDecrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Malformed pairing key: {0}")]
    PairingMalformed(String),

    #[error("Pairing key request is older than 24 hours")]
    PairingExpired,

    #[error("This identity is not a party to the pairing key")]
    NotAParty,

    #[error("Pairing key slot does not match this identity")]
    SlotMismatch,

    #[error("Pairing key signature verification failed")]
    SignatureInvalid,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
