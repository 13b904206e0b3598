//! Per-session event fan-out.
//!
//! Every subscriber gets its own unbounded queue, starting with the state
//! the session is in when it subscribes, followed by the pending manifest
//! if a decision is still outstanding. Once the session reaches a
//! terminal state the hub emits it, drops all queues so streams end, and
//! ignores anything else it is asked to publish.

use crate::error::ErrorKind;
use crate::frame::ManifestEntry;
use crate::node::progress::TransferProgress;
use crate::transfer::TransferState;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_stream::Stream;

/// Something that happened in a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Bytes moved
    ProgressUpdate(TransferProgress),
    /// Session changed state
    StateChanged(TransferState),
    /// Session hit an error; a terminal `StateChanged` follows
    Error(ErrorKind, String),
    /// Peer offered these items and waits for a decision
    ManifestOffered(Vec<ManifestEntry>),
}

/// Fan-out of one session's events.
pub struct EventHub {
    inner: Mutex<HubInner>,
    state: watch::Sender<TransferState>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    offered: Option<Vec<ManifestEntry>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Hub for a session in `Negotiating`
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(TransferState::Negotiating);
        Self {
            inner: Mutex::new(HubInner::default()),
            state,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        *self.state.borrow()
    }

    /// Open a new event stream.
    ///
    /// The first event is always the current state. A subscriber that
    /// arrives after the end sees only the terminal state.
    pub fn subscribe(&self) -> SessionEvents {
        let mut inner = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let current = self.state();
        let _ = tx.send(SessionEvent::StateChanged(current));
        if current == TransferState::Negotiating {
            if let Some(items) = &inner.offered {
                let _ = tx.send(SessionEvent::ManifestOffered(items.clone()));
            }
        }
        if !current.is_terminal() {
            inner.subscribers.push(tx);
        }
        SessionEvents { rx }
    }

    /// Move to `next`.
    ///
    /// Returns false, emitting nothing, once the session already ended.
    pub fn set_state(&self, next: TransferState) -> bool {
        let mut inner = self.lock();
        if self.state().is_terminal() {
            return false;
        }
        if self.state() == next {
            return true;
        }
        self.state.send_replace(next);
        inner.offered = None;
        inner
            .subscribers
            .retain(|tx| tx.send(SessionEvent::StateChanged(next)).is_ok());
        if next.is_terminal() {
            inner.subscribers.clear();
        }
        true
    }

    /// Publish a progress snapshot
    pub fn progress(&self, progress: TransferProgress) {
        self.publish(SessionEvent::ProgressUpdate(progress));
    }

    /// Publish an error ahead of the terminal state
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) {
        self.publish(SessionEvent::Error(kind, message.into()));
    }

    /// Publish the manifest the peer offered
    pub fn manifest_offered(&self, items: Vec<ManifestEntry>) {
        self.lock().offered = Some(items.clone());
        self.publish(SessionEvent::ManifestOffered(items));
    }

    /// Wait until the session reaches a terminal state
    pub async fn wait_terminal(&self) -> TransferState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(TransferState::is_terminal).await {
            Ok(state) => *state,
            // The sender lives in `self`, so it cannot be gone
            Err(_) => self.state(),
        }
    }

    fn publish(&self, event: SessionEvent) {
        let mut inner = self.lock();
        if self.state().is_terminal() {
            return;
        }
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stream of one subscriber's session events.
///
/// Ends after the terminal `StateChanged`.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Next event, or `None` once the session ended
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
