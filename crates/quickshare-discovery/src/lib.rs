//! # Quickshare Discovery
//!
//! Local network discovery for the Quickshare protocol.
//!
//! This crate provides:
//! - The advertisement record (service instance name + TXT endpoint info)
//! - Periodic multicast announcement of the local endpoint
//! - A restartable browse stream of `Found` / `Lost` events
//! - Duplicate suppression and timeout-based expiry of endpoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use quickshare_discovery::{Discovery, DiscoveryConfig, EndpointId, EndpointInfo};
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> Result<(), quickshare_discovery::DiscoveryError> {
//! let discovery = Discovery::multicast(DiscoveryConfig::default())?;
//! discovery
//!     .start_advertising(EndpointInfo::new(EndpointId::random(), "laptop", 54321))
//!     .await?;
//!
//! let mut events = discovery.browse()?;
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod manager;
pub mod memory;
pub mod multicast;
pub mod record;
pub mod tracker;

pub use backend::{Announcement, DiscoveryBackend, Sighting};
pub use error::DiscoveryError;
pub use manager::{BrowseStream, Discovery, DiscoveryConfig};
pub use memory::{MemoryBackend, MemoryNetwork};
pub use multicast::MulticastBackend;
pub use record::ServiceRecord;
pub use tracker::EndpointTracker;

use rand::Rng;
use std::net::SocketAddr;

/// Length of an endpoint identifier
pub const ENDPOINT_ID_LEN: usize = 4;

/// Protocol version advertised in the endpoint flags
pub const ADVERTISED_VERSION: u8 = 1;

/// Stable 4-character alphanumeric device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    /// Generate a random identifier.
    #[must_use]
    pub fn random() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(ENDPOINT_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Parse an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidEndpointId`] unless `s` is exactly
    /// four ASCII alphanumeric characters.
    pub fn parse(s: &str) -> Result<Self, DiscoveryError> {
        if s.len() == ENDPOINT_ID_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Ok(Self(s.to_string()))
        } else {
            Err(DiscoveryError::InvalidEndpointId(s.to_string()))
        }
    }

    /// Identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes of the identifier
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ENDPOINT_ID_LEN] {
        let mut out = [0u8; ENDPOINT_ID_LEN];
        out.copy_from_slice(self.0.as_bytes());
        out
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EndpointId {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Kind of device behind an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    /// Not specified
    #[default]
    Unknown,
    /// Phone
    Phone,
    /// Tablet
    Tablet,
    /// Laptop or desktop computer
    Laptop,
}

impl DeviceType {
    fn to_bits(self) -> u8 {
        match self {
            DeviceType::Unknown => 0,
            DeviceType::Phone => 1,
            DeviceType::Tablet => 2,
            DeviceType::Laptop => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => DeviceType::Phone,
            2 => DeviceType::Tablet,
            3 => DeviceType::Laptop,
            _ => DeviceType::Unknown,
        }
    }
}

/// Capability and version flags carried in the advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// Protocol version (3 bits)
    pub version: u8,
    /// Device kind
    pub device_type: DeviceType,
    /// Whether the device accepts transfers from everyone nearby
    pub visible: bool,
}

impl Capabilities {
    /// Pack into the advertisement flag byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        ((self.version & 0x07) << 5) | (u8::from(!self.visible) << 4) | (self.device_type.to_bits() << 1)
    }

    /// Unpack from the advertisement flag byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            version: byte >> 5,
            visible: byte & 0x10 == 0,
            device_type: DeviceType::from_bits(byte >> 1),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            version: ADVERTISED_VERSION,
            device_type: DeviceType::Laptop,
            visible: true,
        }
    }
}

/// What the local device advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Stable identifier
    pub id: EndpointId,
    /// Display name
    pub name: String,
    /// TCP port of the session listener
    pub port: u16,
    /// Capability flags
    pub capabilities: Capabilities,
}

impl EndpointInfo {
    /// Info with default capabilities.
    #[must_use]
    pub fn new(id: EndpointId, name: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            name: name.into(),
            port,
            capabilities: Capabilities::default(),
        }
    }
}

/// A peer found on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Stable identifier
    pub id: EndpointId,
    /// Display name
    pub name: String,
    /// Where its session listener is reachable
    pub addr: SocketAddr,
    /// Capability flags
    pub capabilities: Capabilities,
}

/// Appearance or disappearance of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// New endpoint, or a known one whose details changed
    Found(Endpoint),
    /// Endpoint said goodbye or stopped announcing
    Lost(EndpointId),
}
