//! Transport seam for announcements.

use crate::DiscoveryError;
use crate::record::{SERVICE_TYPE, ServiceRecord};
use async_trait::async_trait;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio::sync::broadcast;

/// Largest announcement accepted off the wire
pub const MAX_ANNOUNCEMENT_SIZE: usize = 1024;

/// Datagram sent by an advertising endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Service type, always [`SERVICE_TYPE`] for our own traffic
    pub service_type: String,
    /// The advertised record
    pub record: ServiceRecord,
    /// Endpoint is leaving the network
    pub goodbye: bool,
}

impl Announcement {
    /// Announcement of `record` being present.
    #[must_use]
    pub fn hello(record: ServiceRecord) -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            record,
            goodbye: false,
        }
    }

    /// Announcement of `record` going away.
    #[must_use]
    pub fn goodbye(record: ServiceRecord) -> Self {
        Self {
            goodbye: true,
            ..Self::hello(record)
        }
    }

    /// Serialize for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DiscoveryError> {
        wire_options()
            .serialize(self)
            .map_err(|e| DiscoveryError::Encode(e.to_string()))
    }

    /// Deserialize from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidRecord`] for undecodable datagrams.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        if bytes.len() > MAX_ANNOUNCEMENT_SIZE {
            return Err(DiscoveryError::InvalidRecord(format!(
                "announcement is {} bytes",
                bytes.len()
            )));
        }
        wire_options()
            .deserialize(bytes)
            .map_err(|e| DiscoveryError::InvalidRecord(e.to_string()))
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_ANNOUNCEMENT_SIZE as u64)
        .reject_trailing_bytes()
}

/// An announcement as received, with the address it came from.
#[derive(Debug, Clone)]
pub struct Sighting {
    /// The advertised record
    pub record: ServiceRecord,
    /// Source address of the datagram
    pub source: IpAddr,
    /// Endpoint is leaving the network
    pub goodbye: bool,
}

/// Something that can carry announcements between endpoints.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Send one announcement to everyone listening.
    async fn announce(&self, announcement: &Announcement) -> Result<(), DiscoveryError>;

    /// Subscribe to incoming announcements.
    ///
    /// The receiver yields [`broadcast::error::RecvError::Closed`] once the
    /// backend can no longer receive.
    fn subscribe(&self) -> Result<broadcast::Receiver<Sighting>, DiscoveryError>;
}
