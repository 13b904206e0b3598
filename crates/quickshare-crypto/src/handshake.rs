//! Pairing handshake state machine.
//!
//! ```text
//! Initiator                          Responder
//!     |------ Hello (e_i, n_i) ---------->|
//!     |<----- Hello (e_r, n_r) -----------|      Idle -> KeyExchanged
//!     |                                   |
//!     |   [both display the auth code]    |
//!     |                                   |
//!     |------ Confirm (tag_i) ----------->|
//!     |<----- Confirm (tag_r) ------------|      KeyExchanged -> Authenticated
//! ```
//!
//! The transcript is always `hello_initiator || hello_responder`, so both
//! roles derive identical key material; the directional keys are then
//! mapped onto `send_key`/`recv_key` for the local role.
//!
//! This type only tracks state and derives keys; moving frames and applying
//! timeouts is the caller's job.

use crate::hash::{hash, hkdf_expand_key, hkdf_extract, keyed_hash};
use crate::random::random_32;
use crate::x25519::{PrivateKey, PublicKey};
use crate::{CONFIRMATION_TAG_SIZE, CryptoError, HANDSHAKE_NONCE_SIZE, SessionKeys};
use rand_core::OsRng;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Handshake protocol version carried in every Hello.
pub const HANDSHAKE_VERSION: u32 = 1;

const LABEL_INITIATOR_KEY: &[u8] = b"quickshare v1 initiator->responder";
const LABEL_RESPONDER_KEY: &[u8] = b"quickshare v1 responder->initiator";
const LABEL_CHAIN: &[u8] = b"quickshare v1 chain";
const LABEL_AUTH: &[u8] = b"quickshare v1 auth";
const LABEL_CONFIRM_INITIATOR: &[u8] = b"quickshare v1 confirm initiator";
const LABEL_CONFIRM_RESPONDER: &[u8] = b"quickshare v1 confirm responder";

const PIN_HASH_MODULO: i32 = 9973;
const PIN_HASH_BASE_MULTIPLIER: i32 = 31;

/// Which side of the connection this handshake runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection (sender)
    Initiator,
    /// Accepted the connection (receiver)
    Responder,
}

impl Role {
    fn confirm_label(self) -> &'static [u8] {
        match self {
            Role::Initiator => LABEL_CONFIRM_INITIATOR,
            Role::Responder => LABEL_CONFIRM_RESPONDER,
        }
    }

    /// The opposite role.
    #[must_use]
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// How the peer's identity is trusted once keys are agreed.
#[derive(Clone)]
pub enum Trust {
    /// Key confirmation alone is enough.
    Implicit,
    /// The local user must confirm the displayed auth code.
    Pin,
    /// Both devices share a secret; confirmation tags mix it in.
    PreShared([u8; 32]),
}

impl std::fmt::Debug for Trust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trust::Implicit => write!(f, "Implicit"),
            Trust::Pin => write!(f, "Pin"),
            Trust::PreShared(_) => write!(f, "PreShared(..)"),
        }
    }
}

/// Ephemeral key material one side contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// X25519 ephemeral public key
    pub public_key: [u8; 32],
    /// Fresh random nonce
    pub nonce: [u8; HANDSHAKE_NONCE_SIZE],
}

impl Hello {
    fn transcript_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.public_key);
        out[32..].copy_from_slice(&self.nonce);
        out
    }
}

/// 4-digit short authentication code shown on both devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthCode(String);

impl AuthCode {
    /// Derive the code from authentication key material.
    #[must_use]
    pub fn derive(auth_key: &[u8]) -> Self {
        let mut hash: i32 = 0;
        let mut multiplier: i32 = 1;
        for &byte in auth_key {
            hash = (hash + i32::from(byte as i8) * multiplier) % PIN_HASH_MODULO;
            multiplier = (multiplier * PIN_HASH_BASE_MULTIPLIER) % PIN_HASH_MODULO;
        }
        Self(format!("{:04}", hash.abs()))
    }

    /// The digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a handshake ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeFailure {
    /// Peer key material missing or of the wrong size
    #[error("malformed key material: {0}")]
    MalformedKeyMaterial(String),
    /// Peer key is a low-order point or mirrors our own
    #[error("peer public key rejected")]
    WeakPeerKey,
    /// Peer confirmation tag did not verify
    #[error("key confirmation mismatch")]
    ConfirmationMismatch,
    /// Local user rejected the auth code
    #[error("auth code rejected by user")]
    Rejected,
    /// Confirmation did not arrive in time
    #[error("handshake timed out")]
    Timeout,
    /// Protocol violation reported by the driver
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Peer aborted the handshake
    #[error("peer aborted: {0}")]
    PeerAborted(String),
    /// The state machine was left mid-transition
    #[error("handshake interrupted")]
    Interrupted,
}

/// Externally visible handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Waiting for the peer's Hello
    Idle,
    /// Shared secret derived, trust not yet confirmed
    KeyExchanged,
    /// Terminal success
    Authenticated,
    /// Terminal failure
    Failed,
}

struct Exchanged {
    keys: SessionKeys,
    confirm_key: Zeroizing<[u8; 32]>,
    transcript_hash: [u8; 32],
    auth_code: AuthCode,
    peer_confirmed: bool,
    user_confirmed: bool,
}

enum State {
    Idle(PrivateKey),
    KeyExchanged(Box<Exchanged>),
    Authenticated(SessionKeys, AuthCode),
    Failed(HandshakeFailure),
}

/// One side of a pairing handshake.
pub struct Handshake {
    role: Role,
    trust: Trust,
    local: Hello,
    state: State,
}

impl Handshake {
    /// Start a handshake with a fresh ephemeral key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn new(role: Role, trust: Trust) -> Result<Self, CryptoError> {
        let secret = PrivateKey::generate(&mut OsRng);
        let local = Hello {
            public_key: secret.public_key().to_bytes(),
            nonce: random_32()?,
        };
        Ok(Self {
            role,
            trust,
            local,
            state: State::Idle(secret),
        })
    }

    /// Local role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The Hello to send to the peer.
    #[must_use]
    pub fn local_hello(&self) -> &Hello {
        &self.local
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> HandshakePhase {
        match self.state {
            State::Idle(_) => HandshakePhase::Idle,
            State::KeyExchanged(_) => HandshakePhase::KeyExchanged,
            State::Authenticated(..) => HandshakePhase::Authenticated,
            State::Failed(_) => HandshakePhase::Failed,
        }
    }

    /// Failure reason once in `Failed`.
    #[must_use]
    pub fn failure(&self) -> Option<&HandshakeFailure> {
        match &self.state {
            State::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Whether the local user has to confirm the auth code.
    #[must_use]
    pub fn requires_user_confirmation(&self) -> bool {
        matches!(self.trust, Trust::Pin)
    }

    /// Auth code, available from `KeyExchanged` on.
    #[must_use]
    pub fn auth_code(&self) -> Option<&AuthCode> {
        match &self.state {
            State::KeyExchanged(ex) => Some(&ex.auth_code),
            State::Authenticated(_, code) => Some(code),
            _ => None,
        }
    }

    /// Process the peer's Hello: `Idle → KeyExchanged`.
    ///
    /// # Errors
    ///
    /// Fails the handshake and returns [`CryptoError::HandshakeFailed`] on
    /// malformed or weak key material, or [`CryptoError::InvalidState`] if
    /// not in `Idle`.
    pub fn receive_hello(&mut self, public_key: &[u8], nonce: &[u8]) -> Result<(), CryptoError> {
        let secret = match self.take_state() {
            State::Idle(secret) => secret,
            other => {
                self.state = other;
                return Err(CryptoError::InvalidState("hello already processed"));
            }
        };

        let peer_key = match PublicKey::from_slice(public_key) {
            Ok(key) => key,
            Err(e) => return Err(self.fail_with(HandshakeFailure::MalformedKeyMaterial(e.to_string()))),
        };
        let Ok(peer_nonce) = <[u8; HANDSHAKE_NONCE_SIZE]>::try_from(nonce) else {
            return Err(self.fail_with(HandshakeFailure::MalformedKeyMaterial(format!(
                "nonce must be {HANDSHAKE_NONCE_SIZE} bytes, got {}",
                nonce.len()
            ))));
        };
        if peer_key.to_bytes() == self.local.public_key {
            return Err(self.fail_with(HandshakeFailure::WeakPeerKey));
        }
        let Some(shared) = secret.exchange(&peer_key) else {
            return Err(self.fail_with(HandshakeFailure::WeakPeerKey));
        };

        let peer = Hello {
            public_key: peer_key.to_bytes(),
            nonce: peer_nonce,
        };
        let (first, second) = match self.role {
            Role::Initiator => (&self.local, &peer),
            Role::Responder => (&peer, &self.local),
        };
        let mut transcript = [0u8; 128];
        transcript[..64].copy_from_slice(&first.transcript_bytes());
        transcript[64..].copy_from_slice(&second.transcript_bytes());
        let transcript_hash = hash(&transcript);

        let prk = Zeroizing::new(hkdf_extract(&transcript_hash, shared.as_bytes()));
        let i2r = hkdf_expand_key(&prk, LABEL_INITIATOR_KEY);
        let r2i = hkdf_expand_key(&prk, LABEL_RESPONDER_KEY);
        let chain_key = hkdf_expand_key(&prk, LABEL_CHAIN);
        let auth_key = Zeroizing::new(hkdf_expand_key(&prk, LABEL_AUTH));

        let (send_key, recv_key) = match self.role {
            Role::Initiator => (i2r, r2i),
            Role::Responder => (r2i, i2r),
        };
        let confirm_key = match &self.trust {
            Trust::PreShared(secret) => Zeroizing::new(keyed_hash(secret, &[auth_key.as_slice()])),
            Trust::Implicit | Trust::Pin => auth_key.clone(),
        };

        self.state = State::KeyExchanged(Box::new(Exchanged {
            keys: SessionKeys {
                send_key,
                recv_key,
                chain_key,
            },
            confirm_key,
            transcript_hash,
            auth_code: AuthCode::derive(auth_key.as_slice()),
            peer_confirmed: false,
            user_confirmed: false,
        }));
        Ok(())
    }

    /// Confirmation tag proving this side derived the same keys.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] outside `KeyExchanged`.
    pub fn confirmation_tag(&self) -> Result<[u8; CONFIRMATION_TAG_SIZE], CryptoError> {
        match &self.state {
            State::KeyExchanged(ex) => Ok(keyed_hash(
                &ex.confirm_key,
                &[self.role.confirm_label(), &ex.transcript_hash],
            )),
            _ => Err(CryptoError::InvalidState("no key exchange to confirm")),
        }
    }

    /// Verify the peer's confirmation tag.
    ///
    /// # Errors
    ///
    /// On mismatch the handshake moves to `Failed` and
    /// [`CryptoError::HandshakeFailed`] is returned.
    pub fn verify_peer_confirmation(&mut self, tag: &[u8]) -> Result<(), CryptoError> {
        let expected = match &self.state {
            State::KeyExchanged(ex) => keyed_hash(
                &ex.confirm_key,
                &[self.role.peer().confirm_label(), &ex.transcript_hash],
            ),
            _ => return Err(CryptoError::InvalidState("no key exchange to confirm")),
        };
        let matches = tag.len() == expected.len() && bool::from(expected.as_slice().ct_eq(tag));
        if !matches {
            return Err(self.fail_with(HandshakeFailure::ConfirmationMismatch));
        }
        if let State::KeyExchanged(ex) = &mut self.state {
            ex.peer_confirmed = true;
        }
        Ok(())
    }

    /// Record the local user's verdict on the displayed auth code.
    ///
    /// # Errors
    ///
    /// A rejection fails the handshake.
    pub fn confirm_auth_code(&mut self, accepted: bool) -> Result<(), CryptoError> {
        if !accepted {
            return Err(self.fail_with(HandshakeFailure::Rejected));
        }
        match &mut self.state {
            State::KeyExchanged(ex) => {
                ex.user_confirmed = true;
                Ok(())
            }
            _ => Err(CryptoError::InvalidState("no auth code to confirm")),
        }
    }

    /// `KeyExchanged → Authenticated` once every trust requirement holds.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if the peer has not confirmed
    /// or a required user confirmation is missing.
    pub fn complete(&mut self) -> Result<(), CryptoError> {
        let needs_user = self.requires_user_confirmation();
        match self.take_state() {
            State::KeyExchanged(ex) if ex.peer_confirmed && (ex.user_confirmed || !needs_user) => {
                let Exchanged {
                    keys, auth_code, ..
                } = *ex;
                self.state = State::Authenticated(keys, auth_code);
                Ok(())
            }
            other => {
                self.state = other;
                Err(CryptoError::InvalidState("trust not yet established"))
            }
        }
    }

    /// Move a non-terminal handshake to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] if already terminal; the
    /// existing terminal state is kept.
    pub fn fail(&mut self, reason: HandshakeFailure) -> Result<(), CryptoError> {
        match self.state {
            State::Authenticated(..) | State::Failed(_) => {
                Err(CryptoError::InvalidState("handshake already finished"))
            }
            _ => {
                self.state = State::Failed(reason);
                Ok(())
            }
        }
    }

    /// Consume an authenticated handshake and return its session keys.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidState`] unless `Authenticated`.
    pub fn into_session_keys(self) -> Result<SessionKeys, CryptoError> {
        match self.state {
            State::Authenticated(keys, _) => Ok(keys),
            _ => Err(CryptoError::InvalidState("handshake not authenticated")),
        }
    }

    fn take_state(&mut self) -> State {
        std::mem::replace(&mut self.state, State::Failed(HandshakeFailure::Interrupted))
    }

    fn fail_with(&mut self, reason: HandshakeFailure) -> CryptoError {
        let err = CryptoError::HandshakeFailed(reason.to_string());
        if !matches!(self.state, State::Authenticated(..)) {
            self.state = State::Failed(reason);
        }
        err
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role)
            .field("trust", &self.trust)
            .field("phase", &self.phase())
            .finish()
    }
}
