//! Token encryption for drivelink.
//!
//! Provider access and refresh tokens are only ever persisted as ciphertext.
//! This module provides:
//! - Authenticated encryption using XChaCha20-Poly1305
//! - A zeroizing key type
//! - The [`TokenCipher`] seam injected into the credential layer
//!
//! # Security Guarantees
//! - Key material is zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod cipher;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use cipher::{TokenCipher, XChaChaTokenCipher};
pub use keys::{TokenKey, KEY_LENGTH};
