//! Courier cryptographic primitives
//!
//! This crate provides the at-rest encryption layer for relayed messages:
//! AES-256-GCM with a fresh random nonce per encryption call. The relay
//! stores the nonce alongside each ciphertext and decrypts on the history
//! read path.

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod cipher;
pub mod error;

pub use cipher::{MessageCipher, KEY_LEN, NONCE_LEN};
pub use error::CryptoError;
