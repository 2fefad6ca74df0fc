//! ss_crypto — Secure Send credential layer and cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Session keys, identity secrets and PIN bytes live behind sealed
//!   handles; no API returns raw key material, and everything secret is
//!   zeroized on drop.
//! - Every comparison of a hash, tag, fingerprint or nonce is constant
//!   time ([`ct::ct_eq`]).
//!
//! # Module layout
//! - `pin`       — PIN alphabet, checksum, hint, seven-word spoken form
//! - `passkey`   — PRF authenticator boundary + software provider
//! - `identity`  — master-key-derived party identity (public id, ppk, HMAC)
//! - `pairing`   — dual-HMAC countersigned pairing-key records
//! - `keystore`  — non-extractable SessionKey / EphemeralKeyPair handles
//! - `aead`      — AES-256-GCM encrypt/decrypt helpers
//! - `kdf`       — PBKDF2 / HKDF with versioned domain labels
//! - `ct`        — constant-time comparison
//! - `error`     — unified error type

pub mod aead;
pub mod ct;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keystore;
pub mod pairing;
pub mod passkey;
pub mod pin;

pub use error::CryptoError;
