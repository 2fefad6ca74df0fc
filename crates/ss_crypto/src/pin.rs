//! Transfer PINs.
//!
//! A PIN is 12 characters from a 69-character alphabet that excludes the
//! visually confusable `0 1 I O i l o`. Structure:
//!
//!   [ method char | 10 random chars | checksum char ]
//!
//! - First character encodes the signaling method: an uppercase letter means
//!   relay signaling, the digit `2` means manual/QR signaling.
//! - Last character is a weighted checksum: its alphabet index equals
//!   Σ index(pin[i]) · (i+1) (mod 69) over the first eleven characters,
//!   catching single-character typos and most transpositions.
//!
//! For spoken transmission a PIN maps bijectively onto a sequence of seven
//! BIP-39 words (base-69 → base-2048 conversion; 69^12 < 2048^7).
//!
//! The PIN itself is the transfer secret. The only value derived from it
//! that ever appears on the wire is the one-way hint: the first 8 hex
//! characters of SHA-256(pin), used to filter rendezvous events.

use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keystore::PinMaterial;

/// PIN alphabet: digits, uppercase and lowercase without confusables, plus
/// 14 symbols. 69 characters total.
pub const ALPHABET: &str =
    "23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz!#$%&*+-=?@^_~";

/// PIN length in characters.
pub const PIN_LEN: usize = 12;

/// Number of BIP-39 words in the spoken form.
pub const WORD_COUNT: usize = 7;

const RADIX: u128 = 69;
const WORD_RADIX: u128 = 2048;

/// Uppercase letters occupy indices 8..32 of the alphabet.
const UPPER_START: usize = 8;
const UPPER_END: usize = 32;

/// How the two endpoints exchange signaling, encoded in the first PIN char.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingMethod {
    /// Signaling events travel over the rendezvous substrate.
    Relay,
    /// Signaling payloads are carried out-of-band (QR / copy-paste).
    Manual,
}

/// A validated transfer PIN. The inner string is zeroized on drop.
pub struct Pin {
    value: Zeroizing<String>,
}

fn index_of(c: char) -> Option<usize> {
    ALPHABET.bytes().position(|b| b as char == c)
}

fn checksum_index(indices: &[usize]) -> usize {
    indices
        .iter()
        .enumerate()
        .map(|(i, &idx)| idx * (i + 1))
        .sum::<usize>()
        % RADIX as usize
}

impl Pin {
    /// Generate a fresh PIN for the given signaling method.
    pub fn generate(method: SignalingMethod) -> Self {
        let mut rng = rand::rngs::OsRng;
        let alphabet: Vec<char> = ALPHABET.chars().collect();

        let mut indices = Vec::with_capacity(PIN_LEN - 1);
        indices.push(match method {
            SignalingMethod::Relay => rng.gen_range(UPPER_START..UPPER_END),
            // '2' is index 0 of the alphabet.
            SignalingMethod::Manual => 0,
        });
        for _ in 1..PIN_LEN - 1 {
            indices.push(rng.gen_range(0..RADIX as usize));
        }
        let check = checksum_index(&indices);

        let mut s = String::with_capacity(PIN_LEN);
        for &idx in &indices {
            s.push(alphabet[idx]);
        }
        s.push(alphabet[check]);

        Self { value: Zeroizing::new(s) }
    }

    /// Parse and validate a PIN: length, alphabet membership, checksum.
    pub fn parse(input: &str) -> Result<Self, CryptoError> {
        if input.chars().count() != PIN_LEN {
            return Err(CryptoError::PinInvalid(format!(
                "expected {PIN_LEN} characters, got {}",
                input.chars().count()
            )));
        }
        let mut indices = Vec::with_capacity(PIN_LEN);
        for c in input.chars() {
            match index_of(c) {
                Some(idx) => indices.push(idx),
                None => {
                    return Err(CryptoError::PinInvalid(
                        "character outside the PIN alphabet".into(),
                    ))
                }
            }
        }
        let expected = checksum_index(&indices[..PIN_LEN - 1]);
        if indices[PIN_LEN - 1] != expected {
            return Err(CryptoError::PinInvalid("checksum mismatch".into()));
        }
        Ok(Self { value: Zeroizing::new(input.to_string()) })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Signaling method encoded in the first character, if recognised.
    pub fn method(&self) -> Option<SignalingMethod> {
        let first = self.value.chars().next()?;
        if first.is_ascii_uppercase() {
            Some(SignalingMethod::Relay)
        } else if first == '2' {
            Some(SignalingMethod::Manual)
        } else {
            None
        }
    }

    /// One-way filter hint: first 8 lowercase hex chars of SHA-256(pin).
    pub fn hint(&self) -> String {
        let digest = Sha256::digest(self.value.as_bytes());
        hex::encode(&digest[..4])
    }

    /// Consume the PIN into KDF material.
    pub fn into_material(self) -> PinMaterial {
        PinMaterial::new(self.value.as_bytes().to_vec())
    }

    /// KDF material without consuming the PIN.
    pub fn material(&self) -> PinMaterial {
        PinMaterial::new(self.value.as_bytes().to_vec())
    }

    // ── Spoken form ──────────────────────────────────────────────────────

    /// Map the PIN to its seven-word spoken form.
    pub fn to_words(&self) -> Vec<&'static str> {
        let list = bip39::Language::English.word_list();

        let mut value: u128 = 0;
        for c in self.value.chars() {
            // parse() guaranteed alphabet membership
            let idx = index_of(c).unwrap_or(0) as u128;
            value = value * RADIX + idx;
        }

        let mut digits = [0usize; WORD_COUNT];
        for slot in digits.iter_mut().rev() {
            *slot = (value % WORD_RADIX) as usize;
            value /= WORD_RADIX;
        }
        digits.iter().map(|&d| list[d]).collect()
    }

    /// Reconstruct a PIN from its seven-word spoken form.
    pub fn from_words(words: &[&str]) -> Result<Self, CryptoError> {
        if words.len() != WORD_COUNT {
            return Err(CryptoError::PinInvalid(format!(
                "expected {WORD_COUNT} words, got {}",
                words.len()
            )));
        }
        let list = bip39::Language::English.word_list();

        let mut value: u128 = 0;
        for word in words {
            let lower = word.trim().to_ascii_lowercase();
            let idx = list
                .iter()
                .position(|w| *w == lower)
                .ok_or_else(|| CryptoError::PinInvalid(format!("unknown word: {word}")))?;
            value = value * WORD_RADIX + idx as u128;
        }

        let max = RADIX.pow(PIN_LEN as u32);
        if value >= max {
            return Err(CryptoError::PinInvalid("word sequence out of range".into()));
        }

        let alphabet: Vec<char> = ALPHABET.chars().collect();
        let mut chars = ['\0'; PIN_LEN];
        for slot in chars.iter_mut().rev() {
            *slot = alphabet[(value % RADIX) as usize];
            value /= RADIX;
        }
        // Checksum validation happens in parse()
        Pin::parse(&chars.iter().collect::<String>())
    }
}

/// Convenience validity predicate.
pub fn is_valid_pin(input: &str) -> bool {
    Pin::parse(input).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_69_chars_and_no_confusables() {
        assert_eq!(ALPHABET.chars().count(), 69);
        for c in ['0', '1', 'I', 'O', 'i', 'l', 'o'] {
            assert!(!ALPHABET.contains(c), "{c} must be excluded");
        }
    }

    #[test]
    fn generated_pins_validate() {
        for _ in 0..64 {
            let pin = Pin::generate(SignalingMethod::Relay);
            assert!(is_valid_pin(pin.as_str()));
            assert_eq!(pin.method(), Some(SignalingMethod::Relay));
        }
    }

    #[test]
    fn manual_pins_start_with_2() {
        let pin = Pin::generate(SignalingMethod::Manual);
        assert!(pin.as_str().starts_with('2'));
        assert_eq!(pin.method(), Some(SignalingMethod::Manual));
    }

    #[test]
    fn checksum_catches_single_char_flip() {
        let pin = Pin::generate(SignalingMethod::Relay);
        let mut chars: Vec<char> = pin.as_str().chars().collect();
        let original = chars[5];
        chars[5] = ALPHABET
            .chars()
            .find(|&c| c != original)
            .unwrap();
        let mutated: String = chars.iter().collect();
        assert!(!is_valid_pin(&mutated));
    }

    #[test]
    fn rejects_wrong_length_and_alphabet() {
        assert!(!is_valid_pin("short"));
        assert!(!is_valid_pin("O00000000000")); // confusables
    }

    #[test]
    fn hint_is_8_lowercase_hex() {
        let pin = Pin::generate(SignalingMethod::Relay);
        let hint = pin.hint();
        assert_eq!(hint.len(), 8);
        assert!(hint.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Deterministic for the same pin
        assert_eq!(hint, Pin::parse(pin.as_str()).unwrap().hint());
    }

    #[test]
    fn words_roundtrip() {
        for _ in 0..32 {
            let pin = Pin::generate(SignalingMethod::Relay);
            let words = pin.to_words();
            assert_eq!(words.len(), WORD_COUNT);
            let back = Pin::from_words(&words).unwrap();
            assert_eq!(back.as_str(), pin.as_str());
        }
    }

    #[test]
    fn words_reject_unknown_word() {
        let pin = Pin::generate(SignalingMethod::Relay);
        let mut words = pin.to_words();
        words[3] = "definitelynotaword";
        assert!(Pin::from_words(&words).is_err());
    }
}
