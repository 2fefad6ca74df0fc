//! Constant-time comparison.
//!
//! Every fingerprint, nonce, hash, commitment and verification value in the
//! protocol goes through `ct_eq`. Lengths are public; a length mismatch
//! short-circuits to `false`.

use subtle::ConstantTimeEq;

/// Constant-time byte equality.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Constant-time equality of two string tokens (fingerprints, hex hints).
pub fn ct_eq_str(a: &str, b: &str) -> bool {
    ct_eq(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_slices() {
        assert!(ct_eq(b"abcdef", b"abcdef"));
    }

    #[test]
    fn unequal_slices() {
        assert!(!ct_eq(b"abcdef", b"abcdeg"));
        assert!(!ct_eq(b"abc", b"abcdef"));
    }

    #[test]
    fn empty_is_equal() {
        assert!(ct_eq(b"", b""));
    }
}
