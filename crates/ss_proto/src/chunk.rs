//! Chunk wire formats.
//!
//! Direct path (data channel, binary frames):
//!   [ seq (u32 BE) | nonce (12 bytes) | ciphertext + tag ]
//!
//! Control frames on the same channel are UTF-8 text:
//!   "DONE:<total_chunks>"  sender → receiver
//!   "DONE_ACK"             receiver → sender
//!
//! Cloud path: the blob body is [ nonce (12) | ciphertext + tag ], i.e. the
//! AEAD prefix format; the notify event carries only the blob URL.
//!
//! Nonces are (4-byte per-transfer random prefix ‖ u64 BE seq) — unique per
//! session key as long as a prefix is never reused across transfers, which
//! the engine guarantees by generating one per transfer. The sequence
//! number doubles as AAD so a valid chunk cannot be replayed at another
//! position.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtoError;

/// AEAD nonce length (96 bits), duplicated here so wire code does not need
/// a crypto import.
pub const NONCE_LEN: usize = 12;

const SEQ_LEN: usize = 4;

/// Random per-transfer nonce prefix length.
pub const NONCE_PREFIX_LEN: usize = 4;

/// Build the deterministic chunk nonce: prefix ‖ u64 BE seq.
pub fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_LEN], seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// AAD binding a chunk to its position.
pub fn chunk_aad(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// Encode a direct-path chunk frame.
pub fn encode_chunk(seq: u32, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEQ_LEN + NONCE_LEN + ciphertext.len());
    buf.put_u32(seq);
    buf.put_slice(nonce);
    buf.put_slice(ciphertext);
    buf.freeze()
}

/// Decode a direct-path chunk frame into (seq, nonce, ciphertext).
pub fn decode_chunk(frame: &[u8]) -> Result<(u32, [u8; NONCE_LEN], &[u8]), ProtoError> {
    if frame.len() < SEQ_LEN + NONCE_LEN {
        return Err(ProtoError::Malformed("chunk frame too short".into()));
    }
    let seq = u32::from_be_bytes(frame[..SEQ_LEN].try_into().expect("length checked"));
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&frame[SEQ_LEN..SEQ_LEN + NONCE_LEN]);
    Ok((seq, nonce, &frame[SEQ_LEN + NONCE_LEN..]))
}

/// Text control frames on the direct channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// Sender has transmitted all chunks.
    Done { total_chunks: u64 },
    /// Receiver has verified the complete set.
    DoneAck,
}

impl ControlFrame {
    pub fn encode(&self) -> String {
        match self {
            ControlFrame::Done { total_chunks } => format!("DONE:{total_chunks}"),
            ControlFrame::DoneAck => "DONE_ACK".to_string(),
        }
    }

    pub fn parse(text: &str) -> Result<ControlFrame, ProtoError> {
        if text == "DONE_ACK" {
            return Ok(ControlFrame::DoneAck);
        }
        if let Some(rest) = text.strip_prefix("DONE:") {
            let total_chunks = rest
                .parse()
                .map_err(|_| ProtoError::Malformed(format!("bad DONE frame: {text}")))?;
            return Ok(ControlFrame::Done { total_chunks });
        }
        Err(ProtoError::Malformed(format!("unknown control frame: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_frame_roundtrip() {
        let nonce = chunk_nonce(&[0xde, 0xad, 0xbe, 0xef], 42);
        let frame = encode_chunk(42, &nonce, b"ciphertext-bytes");
        let (seq, n, ct) = decode_chunk(&frame).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(n, nonce);
        assert_eq!(ct, b"ciphertext-bytes");
    }

    #[test]
    fn nonce_embeds_sequence() {
        let prefix = [1, 2, 3, 4];
        let n0 = chunk_nonce(&prefix, 0);
        let n1 = chunk_nonce(&prefix, 1);
        assert_ne!(n0, n1);
        assert_eq!(&n0[..NONCE_PREFIX_LEN], &prefix);
        assert_eq!(u64::from_be_bytes(n1[NONCE_PREFIX_LEN..].try_into().unwrap()), 1);
    }

    #[test]
    fn short_frame_rejected() {
        assert!(decode_chunk(&[0u8; 10]).is_err());
    }

    #[test]
    fn control_frames() {
        assert_eq!(
            ControlFrame::parse("DONE:8").unwrap(),
            ControlFrame::Done { total_chunks: 8 }
        );
        assert_eq!(ControlFrame::parse("DONE_ACK").unwrap(), ControlFrame::DoneAck);
        assert_eq!(ControlFrame::Done { total_chunks: 8 }.encode(), "DONE:8");
        assert!(ControlFrame::parse("DONE:").is_err());
        assert!(ControlFrame::parse("HELLO").is_err());
    }
}
