//! In-process backend.
//!
//! Every backend created from the same [`MemoryNetwork`] hears every
//! announcement, including its own, the same way multicast loopback does.

use crate::backend::{Announcement, DiscoveryBackend, Sighting};
use crate::DiscoveryError;
use async_trait::async_trait;
use std::net::IpAddr;
use tokio::sync::broadcast;

const NETWORK_CAPACITY: usize = 256;

/// A shared segment that in-memory backends attach to.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    tx: broadcast::Sender<Sighting>,
}

impl MemoryNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NETWORK_CAPACITY);
        Self { tx }
    }

    /// Attach a backend that sends from `addr`.
    #[must_use]
    pub fn backend(&self, addr: IpAddr) -> MemoryBackend {
        MemoryBackend {
            tx: self.tx.clone(),
            addr,
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend attached to a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    tx: broadcast::Sender<Sighting>,
    addr: IpAddr,
}

#[async_trait]
impl DiscoveryBackend for MemoryBackend {
    async fn announce(&self, announcement: &Announcement) -> Result<(), DiscoveryError> {
        let sighting = Sighting {
            record: announcement.record.clone(),
            source: self.addr,
            goodbye: announcement.goodbye,
        };
        // No listeners is not an error on a broadcast medium
        let _ = self.tx.send(sighting);
        Ok(())
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<Sighting>, DiscoveryError> {
        Ok(self.tx.subscribe())
    }
}
