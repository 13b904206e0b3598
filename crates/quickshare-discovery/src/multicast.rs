//! UDP multicast backend.

use crate::backend::{Announcement, DiscoveryBackend, MAX_ANNOUNCEMENT_SIZE, Sighting};
use crate::manager::DiscoveryConfig;
use crate::record::SERVICE_TYPE;
use crate::DiscoveryError;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SIGHTING_CAPACITY: usize = 256;

type SharedSender = Arc<Mutex<Option<broadcast::Sender<Sighting>>>>;

/// Announces and listens on an IPv4 multicast group.
///
/// A receive error is fatal: the receive loop stops, current subscribers
/// observe `Closed`, and further subscriptions and announcements fail with
/// [`DiscoveryError::Closed`]. Send errors are returned as they happen.
pub struct MulticastBackend {
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    tx: SharedSender,
    recv_task: JoinHandle<()>,
}

impl MulticastBackend {
    /// Bind to the group port and join the group.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Socket`] if the socket cannot be created,
    /// bound, or joined to the group.
    pub fn bind(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let group = config.multicast_group;

        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        #[cfg(unix)]
        socket2.set_reuse_port(true)?;
        socket2.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port())).into())?;
        socket2.join_multicast_v4(group.ip(), &config.interface)?;
        socket2.set_multicast_if_v4(&config.interface)?;
        socket2.set_multicast_loop_v4(true)?;
        socket2.set_multicast_ttl_v4(config.multicast_ttl)?;
        socket2.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);

        let (sender, _) = broadcast::channel(SIGHTING_CAPACITY);
        let tx: SharedSender = Arc::new(Mutex::new(Some(sender)));
        let recv_task = tokio::spawn(recv_loop(Arc::clone(&socket), Arc::clone(&tx)));

        tracing::debug!("Joined discovery group {}", group);

        Ok(Self {
            socket,
            group,
            tx,
            recv_task,
        })
    }

    /// Multicast group this backend uses
    #[must_use]
    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }
}

fn lock(tx: &SharedSender) -> MutexGuard<'_, Option<broadcast::Sender<Sighting>>> {
    tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn recv_loop(socket: Arc<UdpSocket>, tx: SharedSender) {
    let mut buf = vec![0u8; MAX_ANNOUNCEMENT_SIZE + 1];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::error!("Discovery socket receive failed: {}", e);
                lock(&tx).take();
                return;
            }
        };

        let announcement = match Announcement::from_bytes(&buf[..len]) {
            Ok(announcement) => announcement,
            Err(e) => {
                tracing::trace!("Ignoring datagram from {}: {}", from, e);
                continue;
            }
        };
        if announcement.service_type != SERVICE_TYPE {
            continue;
        }

        let sighting = Sighting {
            record: announcement.record,
            source: from.ip(),
            goodbye: announcement.goodbye,
        };
        if let Some(sender) = lock(&tx).as_ref() {
            let _ = sender.send(sighting);
        }
    }
}

#[async_trait]
impl DiscoveryBackend for MulticastBackend {
    async fn announce(&self, announcement: &Announcement) -> Result<(), DiscoveryError> {
        if lock(&self.tx).is_none() {
            return Err(DiscoveryError::Closed);
        }
        let bytes = announcement.to_bytes()?;
        self.socket
            .send_to(&bytes, SocketAddr::V4(self.group))
            .await?;
        Ok(())
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<Sighting>, DiscoveryError> {
        lock(&self.tx)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(DiscoveryError::Closed)
    }
}

impl Drop for MulticastBackend {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

impl std::fmt::Debug for MulticastBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastBackend")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}
