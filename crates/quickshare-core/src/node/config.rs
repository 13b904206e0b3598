//! Node configuration

use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::node::error::{NodeError, Result};
use quickshare_crypto::Trust;
use quickshare_discovery::EndpointId;
use quickshare_files::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use std::borrow::Cow;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port for incoming sessions
pub const DEFAULT_PORT: u16 = 9300;

/// Room a sealed chunk frame needs beyond its payload: frame header, chunk
/// fields, and the AEAD tag.
pub const CHUNK_FRAME_OVERHEAD: usize = 64;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address for incoming sessions (port 0 picks an ephemeral port)
    pub listen_addr: SocketAddr,

    /// Identifier sent in `Hello` and advertised by discovery
    pub endpoint_id: EndpointId,

    /// Human-readable name shown to peers
    pub device_name: String,

    /// Trust policy for handshakes
    pub trust: Trust,

    /// Bound on TCP connect plus the whole handshake
    pub handshake_timeout: Duration,

    /// Largest frame accepted from a peer
    pub max_frame_size: usize,

    /// Transfer configuration
    pub transfer: TransferConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            endpoint_id: EndpointId::random(),
            device_name: "Unknown".to_string(),
            trust: Trust::Implicit,
            handshake_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            transfer: TransferConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Check the configuration before binding.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidConfig`] for an empty device name, a
    /// chunk size of zero or above the limit, a chunk that would not fit
    /// in one frame, or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(NodeError::InvalidConfig(Cow::Borrowed(
                "device name must not be empty",
            )));
        }
        let chunk_size = self.transfer.chunk_size;
        if chunk_size == 0 {
            return Err(NodeError::InvalidConfig(Cow::Borrowed(
                "chunk size must be greater than zero",
            )));
        }
        if chunk_size > MAX_CHUNK_SIZE {
            return Err(NodeError::InvalidConfig(Cow::Owned(format!(
                "chunk size {chunk_size} exceeds maximum {MAX_CHUNK_SIZE}"
            ))));
        }
        if chunk_size + CHUNK_FRAME_OVERHEAD > self.max_frame_size {
            return Err(NodeError::InvalidConfig(Cow::Owned(format!(
                "chunk size {} does not fit in frames of {} bytes",
                chunk_size, self.max_frame_size
            ))));
        }
        if self.handshake_timeout.is_zero()
            || self.transfer.chunk_timeout.is_zero()
            || self.transfer.consent_timeout.is_zero()
        {
            return Err(NodeError::InvalidConfig(Cow::Borrowed(
                "timeouts must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// File transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Payload bytes per chunk frame
    pub chunk_size: usize,

    /// Bound on each read while a transfer is running
    pub chunk_timeout: Duration,

    /// How long a receiver may take to accept or reject a manifest
    pub consent_timeout: Duration,

    /// Accept every manifest without asking
    pub auto_accept: bool,

    /// Directory received files are written to
    pub download_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_timeout: Duration::from_secs(30),
            consent_timeout: Duration::from_secs(60),
            auto_accept: false,
            download_dir: PathBuf::from("."),
        }
    }
}
