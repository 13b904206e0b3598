//! Error types for the Quickshare core protocol.

use quickshare_crypto::{CryptoError, HandshakeFailure};
use quickshare_files::FileError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Coarse failure category reported to applications and peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Peer sent something that violates the protocol
    Malformed,
    /// Key agreement or trust confirmation failed
    HandshakeFailed,
    /// A session with the endpoint is already live
    SessionConflict,
    /// Received content does not match its declared hash
    IntegrityFailure,
    /// Peer went silent
    Timeout,
    /// Socket or filesystem failure
    IoFailure,
    /// Receiver declined the transfer
    Rejected,
    /// Transfer was cancelled
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "Malformed"),
            Self::HandshakeFailed => write!(f, "HandshakeFailed"),
            Self::SessionConflict => write!(f, "SessionConflict"),
            Self::IntegrityFailure => write!(f, "IntegrityFailure"),
            Self::Timeout => write!(f, "Timeout"),
            Self::IoFailure => write!(f, "IoFailure"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Frame-level errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Length prefix exceeds the configured maximum
    #[error("frame of {len} bytes exceeds limit of {max}")]
    Oversized {
        /// Declared length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Length prefix of zero
    #[error("empty frame")]
    Empty,

    /// Unknown frame tag
    #[error("unknown frame tag: 0x{0:02X}")]
    UnknownTag(u8),

    /// Body failed to deserialize or carried trailing bytes
    #[error("invalid frame body: {0}")]
    InvalidBody(String),

    /// Chunk payload larger than allowed
    #[error("chunk payload of {len} bytes exceeds limit of {max}")]
    ChunkTooLarge {
        /// Payload length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Underlying stream failed, or ended inside a frame
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            FrameError::Io(_) => ErrorKind::IoFailure,
            _ => ErrorKind::Malformed,
        }
    }
}

/// Errors that end a handshake or transfer session
#[derive(Debug, Error)]
pub enum TransferError {
    /// Framing failed
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Sealed frame did not authenticate, or keys are exhausted
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Handshake ended in `Failed`
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    /// File operation failed
    #[error("file error: {0}")]
    File(#[from] FileError),

    /// Peer broke the transfer protocol
    #[error("protocol violation: {0}")]
    Protocol(Cow<'static, str>),

    /// Peer stopped responding
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Connection closed before the session finished
    #[error("connection closed by peer")]
    Closed,

    /// Receiver declined the manifest
    #[error("transfer rejected by receiver")]
    Rejected,

    /// Transfer cancelled on this side
    #[error("transfer cancelled: {0}")]
    Cancelled(Cow<'static, str>),

    /// Peer sent `Cancel`
    #[error("transfer cancelled by peer: {0}")]
    PeerCancelled(String),

    /// Peer reported its own failure
    #[error("peer reported failure: {0}")]
    PeerFailed(ErrorKind),
}

impl TransferError {
    /// Create a protocol violation with static context (zero allocation)
    #[must_use]
    pub const fn protocol(context: &'static str) -> Self {
        TransferError::Protocol(Cow::Borrowed(context))
    }

    /// Create a local cancellation with static context (zero allocation)
    #[must_use]
    pub const fn cancelled(context: &'static str) -> Self {
        TransferError::Cancelled(Cow::Borrowed(context))
    }

    /// Whether the peer already knows the session is over.
    ///
    /// False means this side should tell it.
    #[must_use]
    pub fn peer_is_aware(&self) -> bool {
        matches!(
            self,
            TransferError::PeerCancelled(_)
                | TransferError::PeerFailed(_)
                | TransferError::Rejected
                | TransferError::Closed
                | TransferError::Frame(FrameError::Io(_))
        )
    }

    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Frame(e) => e.kind(),
            TransferError::Crypto(_) | TransferError::Protocol(_) => ErrorKind::Malformed,
            TransferError::Handshake(HandshakeFailure::Timeout) => ErrorKind::Timeout,
            TransferError::Handshake(_) => ErrorKind::HandshakeFailed,
            TransferError::File(e) => match e {
                FileError::IntegrityFailure { .. } => ErrorKind::IntegrityFailure,
                FileError::Io { .. } | FileError::Truncated { .. } => ErrorKind::IoFailure,
                FileError::InvalidName { .. }
                | FileError::OffsetMismatch { .. }
                | FileError::Overflow { .. }
                | FileError::Incomplete { .. } => ErrorKind::Malformed,
            },
            TransferError::Timeout(_) => ErrorKind::Timeout,
            TransferError::Closed => ErrorKind::IoFailure,
            TransferError::Rejected => ErrorKind::Rejected,
            TransferError::Cancelled(_) | TransferError::PeerCancelled(_) => ErrorKind::Cancelled,
            TransferError::PeerFailed(kind) => *kind,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Frame(FrameError::Io(err))
    }
}
