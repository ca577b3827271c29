//! At-rest message encryption
//!
//! Message text is encrypted before it reaches the durable store and
//! decrypted on the way back out. The key is process-wide configuration,
//! loaded once at startup and never rotated mid-run.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};

/// Key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (96-bit GCM nonce)
pub const NONCE_LEN: usize = 12;

/// Symmetric cipher for message text at rest.
#[derive(Clone)]
pub struct MessageCipher {
    cipher: Aes256Gcm,
}

impl MessageCipher {
    /// Build a cipher from a raw 32-byte key.
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self { cipher }
    }

    /// Build a cipher from a hex-encoded 32-byte key (64 hex characters).
    ///
    /// The decoded key material is zeroized once the cipher is constructed.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let decoded = hex::decode(hex_key.trim())
            .map_err(|_| CryptoError::InvalidKey("key is not valid hex".to_string()))?;
        let mut key: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("key must be {} bytes", KEY_LEN)))?;

        let cipher = Self::new(&key);
        key.zeroize();
        Ok(cipher)
    }

    /// Encrypt a plaintext, returning the ciphertext and the nonce used.
    ///
    /// A fresh random nonce is generated on every call and must be stored
    /// alongside the ciphertext; it is never reused. Empty plaintexts are
    /// valid input and round-trip to empty.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
        let nonce_bytes = rand::random::<[u8; NONCE_LEN]>();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        Ok((ciphertext, nonce_bytes))
    }

    /// Decrypt a ciphertext/nonce pair produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails with [`CryptoError::DecryptionError`] if either half is corrupt
    /// or the pair was produced under a different key.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::DecryptionError);
        }

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionError)
    }
}
