//! Error types for the Session Manager API
//!
//! Errors are categorized to support retry logic and map onto the
//! protocol-wide [`ErrorKind`].
//!
//! # Example
//!
//! ```no_run
//! use quickshare_core::node::NodeError;
//!
//! fn handle_error(err: NodeError) {
//!     if err.is_transient() {
//!         println!("Transient error, may retry: {}", err);
//!     } else {
//!         println!("Permanent error: {}", err);
//!     }
//! }
//! ```

use crate::error::{ErrorKind, TransferError};
use crate::node::session::SessionId;
use quickshare_discovery::{DiscoveryError, EndpointId};
use quickshare_files::FileError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur in Session Manager operations
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    // ============ Transport Errors ============
    /// Connection could not be opened or broke
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    // ============ Cryptographic Errors ============
    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(Cow<'static, str>),

    // ============ Session Errors ============
    /// A session with this endpoint is already live
    #[error("Session conflict: endpoint {0} already has an active session")]
    SessionConflict(EndpointId),

    /// No active session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    // ============ Transfer Errors ============
    /// Transfer ended with an error
    #[error("Transfer error ({kind}): {message}")]
    Transfer {
        /// Failure category
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },

    // ============ I/O Errors ============
    /// File or socket I/O error
    #[error("I/O error: {0}")]
    Io(String),

    // ============ Discovery Errors ============
    /// Discovery operation failed
    #[error("Discovery error: {0}")]
    Discovery(Cow<'static, str>),

    // ============ Configuration & State Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Operation not valid in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    // ============ Operational Errors ============
    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// Background task went away
    #[error("Channel error: {0}")]
    Channel(Cow<'static, str>),
}

impl NodeError {
    /// Returns true if this error is transient and may succeed on retry
    ///
    /// Transient errors include:
    /// - Timeouts
    /// - Transport failures
    /// - An endpoint that is busy with another session
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::Timeout(_)
                | NodeError::Transport(_)
                | NodeError::Channel(_)
                | NodeError::SessionConflict(_)
        )
    }

    /// Returns true if this error is permanent and will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidConfig(_)
                | NodeError::SessionNotFound(_)
                | NodeError::InvalidState(_)
                | NodeError::Handshake(_)
                | NodeError::Crypto(_)
        )
    }

    /// Returns true if this error should trigger a retry with backoff
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.is_transient() && !matches!(self, NodeError::Timeout(_))
    }

    /// Failure category, or `None` for local API misuse that never
    /// reaches a peer.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            NodeError::Transport(_) | NodeError::Io(_) => Some(ErrorKind::IoFailure),
            NodeError::Crypto(_) | NodeError::Handshake(_) => Some(ErrorKind::HandshakeFailed),
            NodeError::SessionConflict(_) => Some(ErrorKind::SessionConflict),
            NodeError::Transfer { kind, .. } => Some(*kind),
            NodeError::Timeout(_) => Some(ErrorKind::Timeout),
            NodeError::Discovery(_)
            | NodeError::SessionNotFound(_)
            | NodeError::InvalidConfig(_)
            | NodeError::InvalidState(_)
            | NodeError::Channel(_) => None,
        }
    }

    /// Create a transport error with static context (zero allocation)
    #[must_use]
    pub const fn transport(context: &'static str) -> Self {
        NodeError::Transport(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        NodeError::Timeout(Cow::Borrowed(context))
    }

    /// Create a handshake error with static context (zero allocation)
    #[must_use]
    pub const fn handshake(context: &'static str) -> Self {
        NodeError::Handshake(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        NodeError::InvalidState(Cow::Borrowed(context))
    }

    /// Create a discovery error with static context (zero allocation)
    #[must_use]
    pub const fn discovery(context: &'static str) -> Self {
        NodeError::Discovery(Cow::Borrowed(context))
    }
}

impl From<TransferError> for NodeError {
    fn from(err: TransferError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::HandshakeFailed => NodeError::Handshake(Cow::Owned(message)),
            ErrorKind::Timeout => NodeError::Timeout(Cow::Owned(message)),
            ErrorKind::IoFailure => NodeError::Io(message),
            kind => NodeError::Transfer { kind, message },
        }
    }
}

impl From<FileError> for NodeError {
    fn from(err: FileError) -> Self {
        TransferError::File(err).into()
    }
}

impl From<quickshare_crypto::CryptoError> for NodeError {
    fn from(err: quickshare_crypto::CryptoError) -> Self {
        NodeError::Crypto(err.to_string())
    }
}

impl From<DiscoveryError> for NodeError {
    fn from(err: DiscoveryError) -> Self {
        NodeError::Discovery(Cow::Owned(err.to_string()))
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

/// Result type for Session Manager operations
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use quickshare_crypto::HandshakeFailure;

    #[test]
    fn test_transient_errors() {
        assert!(NodeError::timeout("test").is_transient());
        assert!(NodeError::transport("test").is_transient());
        assert!(NodeError::SessionConflict(EndpointId::random()).is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(NodeError::InvalidConfig(Cow::Borrowed("test")).is_permanent());
        assert!(NodeError::SessionNotFound(SessionId::from_raw(1)).is_permanent());
        assert!(NodeError::handshake("test").is_permanent());
    }

    #[test]
    fn test_should_retry() {
        assert!(NodeError::transport("test").should_retry());
        assert!(!NodeError::timeout("test").should_retry());
        assert!(!NodeError::invalid_state("test").should_retry());
    }

    #[test]
    fn test_mutual_exclusivity() {
        let errors = [
            NodeError::timeout("test"),
            NodeError::transport("test"),
            NodeError::InvalidConfig(Cow::Borrowed("test")),
            NodeError::SessionNotFound(SessionId::from_raw(7)),
            NodeError::handshake("test"),
        ];
        for err in &errors {
            assert!(!(err.is_transient() && err.is_permanent()), "{err}");
        }
    }

    #[test]
    fn test_transfer_error_conversion() {
        let err: NodeError = TransferError::Handshake(HandshakeFailure::Rejected).into();
        assert!(matches!(err, NodeError::Handshake(_)));
        assert_eq!(err.kind(), Some(ErrorKind::HandshakeFailed));

        let err: NodeError = TransferError::Handshake(HandshakeFailure::Timeout).into();
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));

        let err: NodeError = TransferError::Rejected.into();
        assert!(matches!(
            err,
            NodeError::Transfer {
                kind: ErrorKind::Rejected,
                ..
            }
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let node_err: NodeError = io_err.into();
        assert!(matches!(node_err, NodeError::Io(_)));
        assert_eq!(node_err.kind(), Some(ErrorKind::IoFailure));
    }

    #[test]
    fn test_error_display() {
        let id = EndpointId::parse("ABCD").unwrap();
        assert!(
            NodeError::SessionConflict(id)
                .to_string()
                .contains("ABCD")
        );
        assert!(
            NodeError::SessionNotFound(SessionId::from_raw(0xff))
                .to_string()
                .contains("00000000000000ff")
        );
    }

    #[test]
    fn test_local_misuse_has_no_kind() {
        assert_eq!(NodeError::invalid_state("test").kind(), None);
        assert_eq!(NodeError::SessionNotFound(SessionId::from_raw(1)).kind(), None);
    }
}
