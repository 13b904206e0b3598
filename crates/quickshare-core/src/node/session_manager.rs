//! Session management for Quickshare nodes
//!
//! This module provides the session lifecycle:
//! - Binding the TCP listener and accepting inbound connections
//! - Outbound connections to discovered endpoints
//! - At most one live session per endpoint
//! - Session lookup, consent, and cancellation
//!
//! # Architecture
//!
//! Live sessions are stored in a concurrent DashMap keyed by [`SessionId`].
//! A second DashMap reserves endpoint ids; its entry API makes the conflict
//! check and the reservation one atomic step. Each session runs on its own
//! task, which owns the connection and releases the reservation when the
//! session ends.
//!
//! # Session Flow
//!
//! ```text
//! Initiator (sender)                Responder (receiver)
//!     |                                  |
//!     |------------ Hello -------------->|
//!     |<----------- Hello ---------------|
//!     |            [auth code]           |
//!     |------------ Confirm ------------>|
//!     |<----------- Confirm -------------|
//!     |                                  |
//!     |====== Introduction (sealed) ====>|
//!     |                                  |  [accept / reject]
//!     |<======= Response (sealed) =======|
//!     |======= Chunk ... (sealed) ======>|
//!     |<======= Finished (sealed) =======|
//! ```

use crate::channel::{SecureReader, SecureWriter, secure_channel};
use crate::error::{ErrorKind, TransferError};
use crate::frame::{
    ControlFrame, DEFAULT_MAX_CHUNK_PAYLOAD, FinishOutcome, FrameCodec, FrameReader,
};
use crate::handshake::{
    AutoConfirm, HandshakeOptions, HandshakeOutcome, LocalIdentity, PinConfirmer,
    perform_handshake,
};
use crate::node::config::NodeConfig;
use crate::node::error::{NodeError, Result};
use crate::node::session::{SessionHandle, SessionId, SessionWork};
use crate::transfer::{
    Direction, TransferContext, TransferState, final_state, notify_peer, run_receiver, run_sender,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use quickshare_crypto::Role;
use quickshare_discovery::{Endpoint, EndpointId, EndpointInfo};
use quickshare_files::OutgoingFile;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Inbound sessions waiting for `accept_incoming`
const INCOMING_QUEUE: usize = 64;

/// Pause after a failed `accept` (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct ManagerShared {
    config: NodeConfig,
    identity: LocalIdentity,
    codec: FrameCodec,
    confirmer: Arc<dyn PinConfirmer>,
    sessions: DashMap<SessionId, SessionHandle>,
    reservations: DashMap<EndpointId, SessionId>,
}

/// Claim on an endpoint id for one session.
///
/// Dropping it frees the endpoint and removes the session from the arena.
struct Reservation {
    shared: Arc<ManagerShared>,
    endpoint: EndpointId,
    session: SessionId,
}

impl Reservation {
    fn claim(shared: &Arc<ManagerShared>, endpoint: EndpointId, session: SessionId) -> Result<Self> {
        match shared.reservations.entry(endpoint.clone()) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    "Endpoint {} already has session {}",
                    endpoint,
                    existing.get()
                );
                return Err(NodeError::SessionConflict(endpoint));
            }
            Entry::Vacant(slot) => {
                slot.insert(session);
            }
        }
        Ok(Self {
            shared: shared.clone(),
            endpoint,
            session,
        })
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.shared.sessions.remove(&self.session);
        self.shared
            .reservations
            .remove_if(&self.endpoint, |_, owner| *owner == self.session);
    }
}

/// Session manager for Quickshare nodes
///
/// Owns the listener and every live session. Thread-safe; wrap it in an
/// `Arc` to share it between tasks. Dropping it stops accepting and
/// cancels all sessions.
pub struct SessionManager {
    shared: Arc<ManagerShared>,
    local_addr: SocketAddr,
    incoming: Mutex<mpsc::Receiver<Result<SessionHandle>>>,
    acceptor: JoinHandle<()>,
}

impl SessionManager {
    /// Bind the listener and start accepting. Auth codes are confirmed
    /// automatically under [`Trust::Pin`](quickshare_crypto::Trust::Pin).
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidConfig`] if the configuration does not
    /// validate and [`NodeError::Transport`] if the port cannot be bound.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        Self::bind_with_confirmer(config, Arc::new(AutoConfirm)).await
    }

    /// Bind the listener, asking `confirmer` to compare auth codes.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub async fn bind_with_confirmer(
        config: NodeConfig,
        confirmer: Arc<dyn PinConfirmer>,
    ) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr).await.map_err(|e| {
            NodeError::Transport(Cow::Owned(format!("bind {}: {}", config.listen_addr, e)))
        })?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ManagerShared {
            identity: LocalIdentity {
                endpoint_id: config.endpoint_id.clone(),
                device_name: config.device_name.clone(),
            },
            codec: FrameCodec::new(config.max_frame_size, DEFAULT_MAX_CHUNK_PAYLOAD),
            confirmer,
            sessions: DashMap::new(),
            reservations: DashMap::new(),
            config,
        });

        let (tx, rx) = mpsc::channel(INCOMING_QUEUE);
        let acceptor = tokio::spawn(accept_loop(shared.clone(), listener, tx));

        tracing::info!(
            "Session manager for {} ({}) listening on {}",
            shared.identity.device_name,
            shared.identity.endpoint_id,
            local_addr
        );

        Ok(Self {
            shared,
            local_addr,
            incoming: Mutex::new(rx),
            acceptor,
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// What discovery should advertise for this node
    #[must_use]
    pub fn endpoint_info(&self) -> EndpointInfo {
        EndpointInfo::new(
            self.shared.identity.endpoint_id.clone(),
            self.shared.identity.device_name.clone(),
            self.local_addr.port(),
        )
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    /// Open a session to `endpoint` as the sender.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::SessionConflict`] if a session with the
    /// endpoint is already live, [`NodeError::Transport`] or
    /// [`NodeError::Timeout`] if it cannot be reached, and
    /// [`NodeError::Handshake`] if the handshake fails or the peer is not
    /// the endpoint it was discovered as.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<SessionHandle> {
        let reservation =
            Reservation::claim(&self.shared, endpoint.id.clone(), SessionId::random())?;

        tracing::info!(
            "Connecting to {} ({}) at {}",
            endpoint.name,
            endpoint.id,
            endpoint.addr
        );

        let timeout = self.shared.config.handshake_timeout;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint.addr))
            .await
            .map_err(|_| NodeError::timeout("connect"))?
            .map_err(|e| {
                NodeError::Transport(Cow::Owned(format!("connect to {}: {}", endpoint.addr, e)))
            })?;
        stream.set_nodelay(true)?;

        let (read, mut write) = stream.into_split();
        let mut reader = FrameReader::new(read, self.shared.codec);
        let outcome = perform_handshake(
            &mut reader,
            &mut write,
            Role::Initiator,
            &self.shared.handshake_options(),
        )
        .await?;

        if outcome.peer.endpoint_id != endpoint.id {
            return Err(NodeError::Handshake(Cow::Owned(format!(
                "expected endpoint {}, peer identified as {}",
                endpoint.id, outcome.peer.endpoint_id
            ))));
        }

        Ok(self.shared.start_session(
            outcome,
            endpoint.addr,
            Direction::Outbound,
            reader,
            write,
            reservation,
        ))
    }

    /// Connect to `endpoint` and offer `paths`.
    ///
    /// Files are opened (and hashed) before connecting.
    ///
    /// # Errors
    ///
    /// Returns file errors for unreadable paths, plus everything
    /// [`connect`](Self::connect) returns.
    pub async fn send_files(&self, endpoint: &Endpoint, paths: Vec<PathBuf>) -> Result<SessionHandle> {
        if paths.is_empty() {
            return Err(NodeError::invalid_state("no files to send"));
        }
        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            files.push(OutgoingFile::open(path).await?);
        }

        let handle = self.connect(endpoint).await?;
        handle.send_files(files)?;
        Ok(handle)
    }

    /// Next inbound session.
    ///
    /// # Errors
    ///
    /// Returns the error of an inbound attempt that failed its handshake
    /// or conflicted with a live session. Those attempts never become
    /// sessions.
    pub async fn accept_incoming(&self) -> Result<SessionHandle> {
        let mut incoming = self.incoming.lock().await;
        incoming
            .recv()
            .await
            .unwrap_or_else(|| Err(NodeError::Channel(Cow::Borrowed("acceptor stopped"))))
    }

    /// Accept the manifest offered in inbound session `id`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::SessionNotFound`] for unknown or ended
    /// sessions, plus everything [`SessionHandle::accept`] returns.
    pub fn accept_transfer(&self, id: SessionId) -> Result<()> {
        self.session(id)?.accept()
    }

    /// Reject the manifest offered in inbound session `id`.
    ///
    /// # Errors
    ///
    /// See [`accept_transfer`](Self::accept_transfer).
    pub fn reject_transfer(&self, id: SessionId) -> Result<()> {
        self.session(id)?.reject()
    }

    /// Cancel session `id` at its next chunk boundary.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::SessionNotFound`] for unknown or ended sessions.
    pub fn cancel(&self, id: SessionId) -> Result<()> {
        self.session(id)?.cancel();
        Ok(())
    }

    /// Look up a live session
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::SessionNotFound`] for unknown or ended sessions.
    pub fn session(&self, id: SessionId) -> Result<SessionHandle> {
        self.shared
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(NodeError::SessionNotFound(id))
    }

    /// Sessions that have not ended
    #[must_use]
    pub fn list_active(&self) -> Vec<SessionHandle> {
        self.shared
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(SessionHandle::is_active)
            .collect()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.acceptor.abort();
        for entry in self.shared.sessions.iter() {
            entry.value().cancel();
        }
    }
}

impl ManagerShared {
    fn handshake_options(&self) -> HandshakeOptions<'_> {
        HandshakeOptions {
            identity: &self.identity,
            trust: self.config.trust.clone(),
            confirmer: self.confirmer.as_ref(),
            timeout: self.config.handshake_timeout,
        }
    }

    /// Register the session and spawn the task that runs it.
    fn start_session(
        &self,
        outcome: HandshakeOutcome,
        peer_addr: SocketAddr,
        direction: Direction,
        reader: FrameReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        reservation: Reservation,
    ) -> SessionHandle {
        let HandshakeOutcome {
            peer,
            keys,
            auth_code,
        } = outcome;
        let (handle, work) = SessionHandle::new(
            reservation.session,
            peer,
            peer_addr,
            direction,
            auth_code,
            keys.fingerprint(),
        );
        self.sessions.insert(handle.id(), handle.clone());

        tracing::info!(
            "Session {} with {} ({}) started, {:?}, keys {}",
            handle.id(),
            handle.peer().device_name,
            handle.peer().endpoint_id,
            direction,
            hex::encode(handle.key_fingerprint())
        );

        let (reader, writer) = secure_channel(reader, writer, keys.into_crypto());
        let ctx = handle.transfer_context(self.config.transfer.clone());
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let state = run_session(&task_handle, work, reader, writer, &ctx).await;
            // Free the endpoint before anyone observes the end
            drop(reservation);
            task_handle.events().set_state(state);
        });

        handle
    }

    async fn handshake_incoming(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<SessionHandle> {
        stream.set_nodelay(true)?;
        let (read, mut write) = stream.into_split();
        let mut reader = FrameReader::new(read, self.codec);
        let outcome = perform_handshake(
            &mut reader,
            &mut write,
            Role::Responder,
            &self.handshake_options(),
        )
        .await?;

        let reservation =
            match Reservation::claim(self, outcome.peer.endpoint_id.clone(), SessionId::random()) {
                Ok(reservation) => reservation,
                Err(err) => {
                    let (_, mut writer) = secure_channel(reader, write, outcome.keys.into_crypto());
                    notify_peer(
                        &mut writer,
                        ControlFrame::Finished {
                            outcome: FinishOutcome::Failed(ErrorKind::SessionConflict),
                        },
                    )
                    .await;
                    return Err(err);
                }
            };

        Ok(self.start_session(
            outcome,
            peer_addr,
            Direction::Inbound,
            reader,
            write,
            reservation,
        ))
    }
}

async fn accept_loop(
    shared: Arc<ManagerShared>,
    listener: TcpListener,
    queue: mpsc::Sender<Result<SessionHandle>>,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        tracing::debug!("Incoming connection from {}", peer_addr);

        // Each handshake on its own task so a stalled peer delays no one
        let shared = shared.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            let result = shared.handshake_incoming(stream, peer_addr).await;
            deliver_inbound(&queue, result, peer_addr).await;
        });
    }
}

/// Hand an inbound attempt to `accept_incoming`.
///
/// Established sessions wait for room in the queue. Failures are dropped
/// when it is full, so nothing piles up while no one is accepting.
async fn deliver_inbound(
    queue: &mpsc::Sender<Result<SessionHandle>>,
    result: Result<SessionHandle>,
    peer_addr: SocketAddr,
) {
    match result {
        Ok(handle) => {
            let _ = queue.send(Ok(handle)).await;
        }
        Err(e) => {
            tracing::warn!("Inbound session from {} failed: {}", peer_addr, e);
            if let Err(mpsc::error::TrySendError::Full(_)) = queue.try_send(Err(e)) {
                tracing::debug!("Inbound queue full, dropped failure from {}", peer_addr);
            }
        }
    }
}

async fn run_session(
    handle: &SessionHandle,
    work: SessionWork,
    reader: SecureReader<OwnedReadHalf>,
    mut writer: SecureWriter<OwnedWriteHalf>,
    ctx: &TransferContext,
) -> TransferState {
    let result = match work {
        SessionWork::Send(files) => match wait_for_files(files, ctx).await {
            Ok(files) => run_sender(reader, writer, files, ctx).await,
            Err(err) => {
                notify_peer(
                    &mut writer,
                    ControlFrame::Cancel {
                        reason: err.to_string(),
                    },
                )
                .await;
                Err(err)
            }
        },
        SessionWork::Receive(consent) => run_receiver(reader, writer, consent, ctx)
            .await
            .map(|paths| {
                for path in paths {
                    tracing::debug!("Session {} saved {}", handle.id(), path.display());
                }
            }),
    };

    match result {
        Ok(()) => {
            tracing::info!("Session {} completed", handle.id());
            TransferState::Completed
        }
        Err(err) => {
            let state = final_state(&err);
            if state == TransferState::Cancelled {
                tracing::info!("Session {} cancelled: {}", handle.id(), err);
            } else {
                tracing::warn!("Session {} failed: {}", handle.id(), err);
                ctx.events.error(err.kind(), err.to_string());
            }
            state
        }
    }
}

async fn wait_for_files(
    files: oneshot::Receiver<Vec<OutgoingFile>>,
    ctx: &TransferContext,
) -> std::result::Result<Vec<OutgoingFile>, TransferError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(TransferError::cancelled("cancelled by user")),
        files = tokio::time::timeout(ctx.config.chunk_timeout, files) => match files {
            Ok(Ok(files)) => Ok(files),
            Ok(Err(_)) => Err(TransferError::cancelled("session handle dropped")),
            Err(_) => Err(TransferError::Timeout("files to send")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::events::SessionEvent;
    use quickshare_discovery::Capabilities;
    use std::net::Ipv4Addr;

    fn config(dir: &std::path::Path, id: &str) -> NodeConfig {
        let mut config = NodeConfig {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            endpoint_id: EndpointId::parse(id).unwrap(),
            device_name: format!("device-{id}"),
            ..NodeConfig::default()
        };
        config.transfer.download_dir = dir.to_path_buf();
        config.transfer.auto_accept = true;
        config
    }

    fn endpoint_of(manager: &SessionManager) -> Endpoint {
        let info = manager.endpoint_info();
        Endpoint {
            id: info.id,
            name: info.name,
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, manager.local_addr().port())),
            capabilities: Capabilities::default(),
        }
    }

    #[tokio::test]
    async fn test_inbound_failures_never_wait_for_room() {
        let (queue, mut rx) = mpsc::channel(2);
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, 4000));

        for _ in 0..10 {
            tokio::time::timeout(
                Duration::from_secs(1),
                deliver_inbound(&queue, Err(NodeError::handshake("bad confirm")), peer),
            )
            .await
            .expect("failure delivery must not block");
        }

        assert!(matches!(rx.try_recv(), Ok(Err(NodeError::Handshake(_)))));
        assert!(matches!(rx.try_recv(), Ok(Err(NodeError::Handshake(_)))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config(dir.path(), "AAAA");
        bad.transfer.chunk_size = 0;
        assert!(matches!(
            SessionManager::bind(bad).await,
            Err(NodeError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("note.txt");
        std::fs::write(&src, b"see you at noon").unwrap();
        let inbox = dir.path().join("inbox");

        let sender = SessionManager::bind(config(dir.path(), "SEND")).await.unwrap();
        let receiver = SessionManager::bind(config(&inbox, "RECV")).await.unwrap();

        let outbound = sender
            .send_files(&endpoint_of(&receiver), vec![src])
            .await
            .unwrap();
        let inbound = receiver.accept_incoming().await.unwrap();

        assert_eq!(inbound.peer().endpoint_id.as_str(), "SEND");
        assert_eq!(inbound.auth_code(), outbound.auth_code());
        assert_eq!(inbound.key_fingerprint(), outbound.key_fingerprint());

        assert_eq!(inbound.wait().await, TransferState::Completed);
        assert_eq!(outbound.wait().await, TransferState::Completed);
        assert_eq!(
            std::fs::read(inbox.join("note.txt")).unwrap(),
            b"see you at noon"
        );
    }

    #[tokio::test]
    async fn test_reject_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, [1u8; 100]).unwrap();
        let inbox = dir.path().join("inbox");

        let sender = SessionManager::bind(config(dir.path(), "SEND")).await.unwrap();
        let mut receiver_config = config(&inbox, "RECV");
        receiver_config.transfer.auto_accept = false;
        let receiver = SessionManager::bind(receiver_config).await.unwrap();

        let outbound = sender
            .send_files(&endpoint_of(&receiver), vec![src])
            .await
            .unwrap();
        let inbound = receiver.accept_incoming().await.unwrap();

        let mut events = inbound.subscribe();
        loop {
            match events.recv().await {
                Some(SessionEvent::ManifestOffered(items)) => {
                    assert_eq!(items.len(), 1);
                    assert_eq!(items[0].size, 100);
                    break;
                }
                Some(_) => continue,
                None => panic!("session ended before the manifest arrived"),
            }
        }
        receiver.reject_transfer(inbound.id()).unwrap();

        assert_eq!(
            inbound.wait().await,
            TransferState::Failed(ErrorKind::Rejected)
        );
        assert_eq!(
            outbound.wait().await,
            TransferState::Failed(ErrorKind::Rejected)
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::bind(config(dir.path(), "AAAA")).await.unwrap();
        assert!(matches!(
            manager.cancel(SessionId::from_raw(42)),
            Err(NodeError::SessionNotFound(_))
        ));
        assert!(manager.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_endpoint_identity_fails_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let sender = SessionManager::bind(config(dir.path(), "SEND")).await.unwrap();
        let receiver = SessionManager::bind(config(dir.path(), "RECV")).await.unwrap();

        let mut endpoint = endpoint_of(&receiver);
        endpoint.id = EndpointId::parse("OTHR").unwrap();
        assert!(matches!(
            sender.connect(&endpoint).await,
            Err(NodeError::Handshake(_))
        ));
        // The reservation is released again
        assert!(sender.shared.reservations.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_leave_the_arena_when_done() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("x");
        std::fs::write(&src, b"x").unwrap();
        let inbox = dir.path().join("inbox");

        let sender = SessionManager::bind(config(dir.path(), "SEND")).await.unwrap();
        let receiver = SessionManager::bind(config(&inbox, "RECV")).await.unwrap();
        let endpoint = endpoint_of(&receiver);

        let first = sender.send_files(&endpoint, vec![src.clone()]).await.unwrap();
        let inbound = receiver.accept_incoming().await.unwrap();
        assert_eq!(first.wait().await, TransferState::Completed);
        assert_eq!(inbound.wait().await, TransferState::Completed);
        assert!(sender.session(first.id()).is_err());
        assert!(sender.list_active().is_empty());

        // Same endpoint is free again
        let second = sender.send_files(&endpoint, vec![src]).await.unwrap();
        receiver.accept_incoming().await.unwrap();
        assert_eq!(second.wait().await, TransferState::Completed);
    }
}
