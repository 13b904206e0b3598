//! `XChaCha20-Poly1305` AEAD encryption.
//!
//! Every Control and Chunk frame sent after the handshake is sealed with
//! [`SessionCrypto`]. Nonces are never transmitted: both sides derive them
//! from a per-direction message counter and the session's nonce salt, which
//! works because frames travel over an ordered stream.
//!
//! ```ignore
//! use quickshare_crypto::aead::{AeadKey, Nonce};
//!
//! let key = AeadKey::new([7u8; 32]);
//! let nonce = Nonce::from_counter(0, &[0u8; 16]);
//! let ciphertext = key.encrypt(&nonce, b"secret", b"aad")?;
//! let plaintext = key.decrypt(&nonce, &ciphertext, b"aad")?;
//! ```

use crate::CryptoError;
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::ZeroizeOnDrop;

/// Authentication tag size (16 bytes / 128 bits).
pub const TAG_SIZE: usize = 16;

/// XChaCha20-Poly1305 nonce size (24 bytes / 192 bits).
pub const NONCE_SIZE: usize = 24;

/// AEAD key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = 32;

/// Messages allowed per direction before the session must end.
pub const MAX_MESSAGES_PER_DIRECTION: u64 = 1 << 40;

/// XChaCha20-Poly1305 nonce (24 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from a counter value.
    ///
    /// The counter occupies the first 8 bytes (little-endian), the salt the
    /// remaining 16.
    #[must_use]
    pub fn from_counter(counter: u64, salt: &[u8; 16]) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..8].copy_from_slice(&counter.to_le_bytes());
        bytes[8..].copy_from_slice(salt);
        Self(bytes)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    fn as_generic(&self) -> &chacha20poly1305::XNonce {
        chacha20poly1305::XNonce::from_slice(&self.0)
    }
}

/// AEAD encryption key (32 bytes), zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Encrypt plaintext with associated data.
    ///
    /// Returns ciphertext with the 16-byte tag appended.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn encrypt(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .encrypt(
                nonce.as_generic(),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt ciphertext (tag included) with associated data.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on authentication failure.
    pub fn decrypt(
        &self,
        nonce: &Nonce,
        ciphertext_and_tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_and_tag.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(
                nonce.as_generic(),
                Payload {
                    msg: ciphertext_and_tag,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// One direction of a session: a key, the nonce salt, and a counter.
struct Direction {
    key: AeadKey,
    nonce_salt: [u8; 16],
    counter: u64,
}

impl Direction {
    fn next_nonce(&mut self) -> Result<Nonce, CryptoError> {
        if self.counter >= MAX_MESSAGES_PER_DIRECTION {
            return Err(CryptoError::NonceOverflow);
        }
        let nonce = Nonce::from_counter(self.counter, &self.nonce_salt);
        self.counter += 1;
        Ok(nonce)
    }
}

/// Outgoing half of a [`SessionCrypto`].
pub struct Sealer(Direction);

impl Sealer {
    /// Seal the next outgoing message.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NonceOverflow` if the send counter is exhausted.
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.0.next_nonce()?;
        self.0.key.encrypt(&nonce, plaintext, aad)
    }

    /// Messages sealed so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.0.counter
    }
}

/// Incoming half of a [`SessionCrypto`].
pub struct Opener(Direction);

impl Opener {
    /// Open the next incoming message.
    ///
    /// The counter advances even on failure; a connection that saw a forged
    /// frame cannot recover and must be dropped.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on authentication failure and
    /// `CryptoError::NonceOverflow` if the receive counter is exhausted.
    pub fn open(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.0.next_nonce()?;
        self.0.key.decrypt(&nonce, ciphertext, aad)
    }

    /// Messages opened so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.0.counter
    }
}

/// Session encryption state for post-handshake frames.
///
/// Keys are zeroized when the halves drop.
pub struct SessionCrypto {
    sealer: Sealer,
    opener: Opener,
}

impl SessionCrypto {
    /// Create a new session crypto state from session keys.
    #[must_use]
    pub fn new(send_key: [u8; 32], recv_key: [u8; 32], chain_key: &[u8; 32]) -> Self {
        let mut nonce_salt = [0u8; 16];
        nonce_salt.copy_from_slice(&chain_key[..16]);

        Self {
            sealer: Sealer(Direction {
                key: AeadKey::new(send_key),
                nonce_salt,
                counter: 0,
            }),
            opener: Opener(Direction {
                key: AeadKey::new(recv_key),
                nonce_salt,
                counter: 0,
            }),
        }
    }

    /// Seal the next outgoing message.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NonceOverflow` if the send counter is exhausted.
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.sealer.seal(plaintext, aad)
    }

    /// Open the next incoming message.
    ///
    /// # Errors
    ///
    /// See [`Opener::open`].
    pub fn decrypt(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.opener.open(ciphertext, aad)
    }

    /// Messages sealed so far.
    #[must_use]
    pub fn send_counter(&self) -> u64 {
        self.sealer.counter()
    }

    /// Messages opened so far.
    #[must_use]
    pub fn recv_counter(&self) -> u64 {
        self.opener.counter()
    }

    /// Separate the directions so reading and writing can proceed
    /// independently.
    #[must_use]
    pub fn split(self) -> (Sealer, Opener) {
        (self.sealer, self.opener)
    }
}
