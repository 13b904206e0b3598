//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Peer public key is a low-order point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Handshake failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Operation not allowed in the current handshake state
    #[error("invalid handshake state: {0}")]
    InvalidState(&'static str),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Nonce overflow (counter exhausted)
    #[error("nonce counter exhausted")]
    NonceOverflow,
}
