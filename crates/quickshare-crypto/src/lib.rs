//! # Quickshare Crypto
//!
//! Cryptographic primitives for the Quickshare nearby file-transfer protocol.
//!
//! This crate provides:
//! - Ephemeral X25519 key agreement
//! - The pairing handshake state machine (`Idle → KeyExchanged → Authenticated | Failed`)
//! - Short authentication codes (4-digit PIN) derived from the handshake
//! - `XChaCha20-Poly1305` session encryption with counter nonces
//! - BLAKE3 hashing and key derivation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Hash | BLAKE3 | 128-bit collision |
//! | KDF | HKDF-BLAKE3 | 128-bit |
//! | Key Confirmation | keyed BLAKE3 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod error;
pub mod handshake;
pub mod hash;
pub mod random;
pub mod x25519;

pub use aead::{Opener, Sealer, SessionCrypto};
pub use error::CryptoError;
pub use handshake::{AuthCode, Handshake, HandshakeFailure, HandshakePhase, Hello, Role, Trust};

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Handshake nonce size
pub const HANDSHAKE_NONCE_SIZE: usize = 32;

/// XChaCha20-Poly1305 key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// BLAKE3 output size
pub const BLAKE3_OUTPUT_SIZE: usize = 32;

/// Key confirmation tag size
pub const CONFIRMATION_TAG_SIZE: usize = 32;

/// Session keys derived from a completed handshake.
///
/// Directional keys are already mapped to the local role: `send_key` encrypts
/// what this side writes, `recv_key` decrypts what the peer writes.
#[derive(zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for sending data
    pub send_key: [u8; 32],
    /// Key for receiving data
    pub recv_key: [u8; 32],
    /// Chain key, source of the nonce salt
    pub chain_key: [u8; 32],
}

impl SessionKeys {
    /// Short non-secret fingerprint of this session's key material.
    ///
    /// Both peers compute the same value; used for log correlation.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 8] {
        let hash = blake3::hash(&self.chain_key);
        let mut fp = [0u8; 8];
        fp.copy_from_slice(&hash.as_bytes()[..8]);
        fp
    }

    /// Build the AEAD state for the connection.
    #[must_use]
    pub fn into_crypto(self) -> SessionCrypto {
        SessionCrypto::new(self.send_key, self.recv_key, &self.chain_key)
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
