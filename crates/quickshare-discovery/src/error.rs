//! Discovery error types.

use thiserror::Error;

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Multicast socket could not be created, joined, or written.
    ///
    /// A failed send is retried on the next announcement.
    #[error("multicast socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Advertisement record is malformed
    #[error("invalid advertisement record: {0}")]
    InvalidRecord(String),

    /// Endpoint identifier is malformed
    #[error("invalid endpoint id: {0:?}")]
    InvalidEndpointId(String),

    /// Announcement could not be encoded
    #[error("announcement encoding failed: {0}")]
    Encode(String),

    /// Backend has shut down
    #[error("discovery backend closed")]
    Closed,
}

impl DiscoveryError {
    /// Whether the backend is gone and retrying cannot help.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::Closed)
    }
}
