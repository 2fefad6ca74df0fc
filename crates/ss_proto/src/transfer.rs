//! Transfer identity and metadata.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Direct-path chunk size: 128 KiB (fits the data channel's message cap
/// with AEAD overhead to spare).
pub const DIRECT_CHUNK_SIZE: usize = 128 * 1024;

/// Cloud-fallback chunk size: 10 MiB per blob.
pub const CLOUD_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum file size: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// 16-hex transfer identifier, random per transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtoError::Malformed("transfer id must be 16 hex chars".into()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata describing the payload, carried inside the encrypted handshake
/// content (never in plaintext tags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMeta {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_bytes: u64,
    pub total_chunks: u64,
}

impl TransferMeta {
    /// Build metadata for a payload, validating the size cap.
    pub fn for_payload(
        file_name: &str,
        mime_type: &str,
        total_bytes: u64,
        chunk_size: usize,
        max_file_size: u64,
    ) -> Result<TransferMeta, ProtoError> {
        if total_bytes > max_file_size {
            return Err(ProtoError::Oversized { size: total_bytes, max: max_file_size });
        }
        Ok(TransferMeta {
            file_name: file_name.to_string(),
            file_size: total_bytes,
            mime_type: mime_type.to_string(),
            total_bytes,
            total_chunks: chunk_count(total_bytes, chunk_size),
        })
    }

    pub fn validate(&self, max_file_size: u64) -> Result<(), ProtoError> {
        if self.total_bytes > max_file_size {
            return Err(ProtoError::Oversized { size: self.total_bytes, max: max_file_size });
        }
        if self.total_chunks == 0 && self.total_bytes > 0 {
            return Err(ProtoError::Malformed("zero chunks for non-empty payload".into()));
        }
        Ok(())
    }
}

/// Number of chunks a payload splits into (an empty payload still produces
/// one chunk so the receive side has something to acknowledge).
pub fn chunk_count(total_bytes: u64, chunk_size: usize) -> u64 {
    if total_bytes == 0 {
        return 1;
    }
    total_bytes.div_ceil(chunk_size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_id_format() {
        let id = TransferId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert!(TransferId::parse(id.as_str()).is_ok());
        assert!(TransferId::parse("not-hex").is_err());
        assert!(TransferId::parse("00ff").is_err());
    }

    #[test]
    fn chunk_counts() {
        assert_eq!(chunk_count(0, DIRECT_CHUNK_SIZE), 1);
        assert_eq!(chunk_count(1, DIRECT_CHUNK_SIZE), 1);
        assert_eq!(chunk_count(DIRECT_CHUNK_SIZE as u64, DIRECT_CHUNK_SIZE), 1);
        assert_eq!(chunk_count(DIRECT_CHUNK_SIZE as u64 + 1, DIRECT_CHUNK_SIZE), 2);
        // 1_000_000 bytes = 7 full 128 KiB chunks + 976 bytes
        assert_eq!(chunk_count(1_000_000, DIRECT_CHUNK_SIZE), 8);
        // 12 MiB = 10 MiB + 2 MiB on the cloud path
        assert_eq!(chunk_count(12 * 1024 * 1024, CLOUD_CHUNK_SIZE), 2);
    }

    #[test]
    fn oversized_payload_rejected() {
        let err = TransferMeta::for_payload(
            "big.bin",
            "application/octet-stream",
            DEFAULT_MAX_FILE_SIZE + 1,
            DIRECT_CHUNK_SIZE,
            DEFAULT_MAX_FILE_SIZE,
        );
        assert!(matches!(err, Err(ProtoError::Oversized { .. })));
    }
}
