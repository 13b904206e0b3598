//! File transfer layer.
//!
//! [`TransferSession`] holds the state machine. [`sender`] and [`receiver`]
//! drive it over a secure channel, one per side of a session.

pub mod receiver;
pub mod sender;
pub mod session;

pub use receiver::run_receiver;
pub use sender::run_sender;
pub use session::{Direction, TransferItem, TransferSession, TransferState};

use crate::channel::SecureWriter;
use crate::error::TransferError;
use crate::frame::{ControlFrame, WireFrame};
use crate::node::config::TransferConfig;
use crate::node::events::EventHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

const NOTIFY_GRACE: Duration = Duration::from_secs(1);

/// What a transfer loop needs besides its connection.
#[derive(Clone)]
pub struct TransferContext {
    /// Chunking, timeouts, consent policy, destination
    pub config: TransferConfig,
    /// Cooperative cancellation, checked at every chunk boundary
    pub cancel: CancellationToken,
    /// Where progress and state changes are published
    pub events: Arc<EventHub>,
}

/// Terminal state a session ends in after `err`.
#[must_use]
pub fn final_state(err: &TransferError) -> TransferState {
    match err {
        TransferError::Cancelled(_) | TransferError::PeerCancelled(_) => TransferState::Cancelled,
        other => TransferState::Failed(other.kind()),
    }
}

/// Best-effort delivery of a last control frame.
pub(crate) async fn notify_peer<W: AsyncWrite + Unpin>(writer: &mut SecureWriter<W>, frame: ControlFrame) {
    let frame = WireFrame::Control(frame);
    if let Ok(Err(e)) = tokio::time::timeout(NOTIFY_GRACE, writer.send(&frame)).await {
        tracing::debug!("Could not notify peer: {}", e);
    }
}

fn control_name(frame: &ControlFrame) -> &'static str {
    match frame {
        ControlFrame::Introduction { .. } => "Introduction",
        ControlFrame::Response { .. } => "Response",
        ControlFrame::Cancel { .. } => "Cancel",
        ControlFrame::Finished { .. } => "Finished",
    }
}

fn unexpected(frame: &WireFrame) -> TransferError {
    let name = match frame {
        WireFrame::Handshake(_) => "Handshake",
        WireFrame::Control(control) => control_name(control),
        WireFrame::Chunk(_) => "Chunk",
    };
    TransferError::Protocol(format!("unexpected {name} frame").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_final_state() {
        assert_eq!(
            final_state(&TransferError::cancelled("user")),
            TransferState::Cancelled
        );
        assert_eq!(
            final_state(&TransferError::PeerCancelled("peer".into())),
            TransferState::Cancelled
        );
        assert_eq!(
            final_state(&TransferError::Rejected),
            TransferState::Failed(ErrorKind::Rejected)
        );
        assert_eq!(
            final_state(&TransferError::Timeout("chunk")),
            TransferState::Failed(ErrorKind::Timeout)
        );
    }
}
