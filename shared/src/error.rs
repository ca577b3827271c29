//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug, Clone)]
pub enum CryptoError {
    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failure
    #[error("Encryption error: {0}")]
    EncryptionError(String),

    /// Ciphertext/nonce pair is corrupt or was produced under another key
    #[error("Decryption failed")]
    DecryptionError,
}

/// Result type alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
