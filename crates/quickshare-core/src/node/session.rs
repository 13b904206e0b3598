//! Session handles.
//!
//! A [`SessionHandle`] is the application's view of one authenticated
//! session. The session itself runs on its own task, owned by the
//! [`SessionManager`](crate::node::SessionManager); handles only exchange
//! decisions with it and observe its events.

use crate::handshake::PeerIdentity;
use crate::node::config::TransferConfig;
use crate::node::error::{NodeError, Result};
use crate::node::events::{EventHub, SessionEvents};
use crate::transfer::{Direction, TransferContext, TransferState};
use quickshare_crypto::AuthCode;
use quickshare_files::OutgoingFile;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Generate a random identifier
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Wrap a raw value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Decision channel held by the session task.
pub(crate) enum SessionWork {
    /// Outbound: files arrive through [`SessionHandle::send_files`]
    Send(oneshot::Receiver<Vec<OutgoingFile>>),
    /// Inbound: consent arrives through [`SessionHandle::accept`]
    Receive(oneshot::Receiver<bool>),
}

struct SessionShared {
    id: SessionId,
    peer: PeerIdentity,
    peer_addr: SocketAddr,
    direction: Direction,
    auth_code: AuthCode,
    key_fingerprint: [u8; 8],
    events: Arc<EventHub>,
    cancel: CancellationToken,
    files: Mutex<Option<oneshot::Sender<Vec<OutgoingFile>>>>,
    consent: Mutex<Option<oneshot::Sender<bool>>>,
}

/// Handle to one session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer.endpoint_id)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        peer: PeerIdentity,
        peer_addr: SocketAddr,
        direction: Direction,
        auth_code: AuthCode,
        key_fingerprint: [u8; 8],
    ) -> (Self, SessionWork) {
        let (files, consent, work) = match direction {
            Direction::Outbound => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), None, SessionWork::Send(rx))
            }
            Direction::Inbound => {
                let (tx, rx) = oneshot::channel();
                (None, Some(tx), SessionWork::Receive(rx))
            }
        };

        let handle = Self {
            inner: Arc::new(SessionShared {
                id,
                peer,
                peer_addr,
                direction,
                auth_code,
                key_fingerprint,
                events: Arc::new(EventHub::new()),
                cancel: CancellationToken::new(),
                files: Mutex::new(files),
                consent: Mutex::new(consent),
            }),
        };
        (handle, work)
    }

    pub(crate) fn transfer_context(&self, config: TransferConfig) -> TransferContext {
        TransferContext {
            config,
            cancel: self.inner.cancel.clone(),
            events: self.inner.events.clone(),
        }
    }

    pub(crate) fn events(&self) -> &EventHub {
        &self.inner.events
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Who is on the other end
    #[must_use]
    pub fn peer(&self) -> &PeerIdentity {
        &self.inner.peer
    }

    /// Peer's socket address
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Whether this side sends or receives
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Code to show the user; both devices display the same one
    #[must_use]
    pub fn auth_code(&self) -> &AuthCode {
        &self.inner.auth_code
    }

    /// Non-secret fingerprint of the session keys, for log correlation
    #[must_use]
    pub fn key_fingerprint(&self) -> [u8; 8] {
        self.inner.key_fingerprint
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.inner.events.state()
    }

    /// Whether the session has not ended yet
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Subscribe to this session's events
    pub fn subscribe(&self) -> SessionEvents {
        self.inner.events.subscribe()
    }

    /// Wait for the terminal state
    pub async fn wait(&self) -> TransferState {
        self.inner.events.wait_terminal().await
    }

    /// Open `paths` and offer them to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Io`] or [`NodeError::Transfer`] if a file
    /// cannot be opened, plus everything [`send_files`](Self::send_files)
    /// returns.
    pub async fn send(&self, paths: Vec<PathBuf>) -> Result<()> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(OutgoingFile::open(&path).await?);
        }
        self.send_files(files)
    }

    /// Offer already opened files to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidState`] on inbound sessions, for an
    /// empty list, or if files were already given, and
    /// [`NodeError::Channel`] if the session already ended.
    pub fn send_files(&self, files: Vec<OutgoingFile>) -> Result<()> {
        if self.inner.direction == Direction::Inbound {
            return Err(NodeError::invalid_state("inbound sessions cannot send"));
        }
        if files.is_empty() {
            return Err(NodeError::invalid_state("no files to send"));
        }
        let tx = self
            .inner
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(NodeError::invalid_state("files already given to this session"))?;
        tracing::debug!("Session {} sending {} file(s)", self.inner.id, files.len());
        tx.send(files)
            .map_err(|_| NodeError::Channel("session already ended".into()))
    }

    /// Accept the offered manifest
    ///
    /// # Errors
    ///
    /// See [`reject`](Self::reject).
    pub fn accept(&self) -> Result<()> {
        self.decide(true)
    }

    /// Reject the offered manifest.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidState`] on outbound sessions or if a
    /// decision was already made, and [`NodeError::Channel`] if the
    /// session already ended.
    pub fn reject(&self) -> Result<()> {
        self.decide(false)
    }

    /// Request cooperative cancellation.
    ///
    /// Takes effect at the next chunk boundary. Repeated calls are
    /// harmless.
    pub fn cancel(&self) {
        if !self.inner.cancel.is_cancelled() {
            tracing::info!("Cancelling session {}", self.inner.id);
        }
        self.inner.cancel.cancel();
    }

    fn decide(&self, accepted: bool) -> Result<()> {
        if self.inner.direction == Direction::Outbound {
            return Err(NodeError::invalid_state(
                "outbound sessions have nothing to accept",
            ));
        }
        let tx = self
            .inner
            .consent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(NodeError::invalid_state("transfer decision already made"))?;
        tracing::info!(
            "Session {} transfer {}",
            self.inner.id,
            if accepted { "accepted" } else { "rejected" }
        );
        tx.send(accepted)
            .map_err(|_| NodeError::Channel("session already ended".into()))
    }
}
