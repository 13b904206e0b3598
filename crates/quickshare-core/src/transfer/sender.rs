//! Sending side of a transfer.
//!
//! The read half of the channel is moved into a small pump task so the
//! send loop can look for a peer `Cancel` between chunks without blocking.

use super::{TransferContext, notify_peer, unexpected};
use crate::channel::{SecureReader, SecureWriter};
use crate::error::TransferError;
use crate::frame::{ChunkFrame, ControlFrame, FinishOutcome, WireFrame};
use crate::transfer::session::{Direction, TransferItem, TransferSession, TransferState};
use quickshare_files::{FileChunker, OutgoingFile};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

type Inbound = Result<Option<WireFrame>, TransferError>;

/// How long a failed write waits for the peer's last word
const VERDICT_GRACE: Duration = Duration::from_millis(250);

/// Offer `files`, and stream them once the receiver accepts.
///
/// # Errors
///
/// Returns the reason the transfer did not complete. Unless the peer
/// already knows (it cancelled, rejected, failed, or hung up), it is sent
/// `Cancel` before this returns.
pub async fn run_sender<R, W>(
    reader: SecureReader<R>,
    mut writer: SecureWriter<W>,
    files: Vec<OutgoingFile>,
    ctx: &TransferContext,
) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (tx, mut inbound) = mpsc::unbounded_channel();
    let pump = tokio::spawn(pump_inbound(reader, tx));

    let result = send(&mut writer, &mut inbound, &files, ctx).await;
    pump.abort();

    if let Err(err) = &result {
        if !err.peer_is_aware() {
            let reason = match err {
                TransferError::Cancelled(reason) => reason.to_string(),
                other => other.to_string(),
            };
            notify_peer(&mut writer, ControlFrame::Cancel { reason }).await;
        }
    }
    result
}

async fn pump_inbound<R: AsyncRead + Unpin>(
    mut reader: SecureReader<R>,
    tx: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        let next = reader.recv().await;
        let last = !matches!(next, Ok(Some(_)));
        if tx.send(next).is_err() || last {
            break;
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(
    writer: &mut SecureWriter<W>,
    inbound: &mut mpsc::UnboundedReceiver<Inbound>,
    files: &[OutgoingFile],
    ctx: &TransferContext,
) -> Result<(), TransferError> {
    if files.is_empty() {
        return Err(TransferError::cancelled("nothing to send"));
    }
    let items = files
        .iter()
        .map(|f| {
            let meta = f.metadata();
            TransferItem::new(meta.name.clone(), meta.size, meta.hash)
        })
        .collect();
    let mut session = TransferSession::new(Direction::Outbound, items);

    writer
        .send(&WireFrame::Control(ControlFrame::Introduction {
            items: session.manifest(),
        }))
        .await?;
    tracing::info!(
        "Offered {} item(s), {} bytes",
        session.items().len(),
        session.bytes_total()
    );

    // The receiver may wait for its user before answering
    let decision_timeout = ctx.config.consent_timeout + ctx.config.chunk_timeout;
    let next = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(TransferError::cancelled("cancelled by user")),
        next = tokio::time::timeout(decision_timeout, inbound.recv()) => {
            next.map_err(|_| TransferError::Timeout("transfer decision"))?
        }
    };
    match control_of(next)? {
        ControlFrame::Response { accepted: true } => {}
        ControlFrame::Response { accepted: false } => return Err(TransferError::Rejected),
        other => return Err(unexpected(&WireFrame::Control(other))),
    }

    session.transition(TransferState::Transferring)?;
    ctx.events.set_state(TransferState::Transferring);
    tracing::debug!("Receiver accepted, streaming chunks");

    let chunker = FileChunker::with_chunk_size(ctx.config.chunk_size);
    for (index, file) in files.iter().enumerate() {
        let item_index =
            u32::try_from(index).map_err(|_| TransferError::protocol("manifest too large"))?;
        let mut chunks = file.reader(chunker).await?;

        while let Some((offset, payload)) = chunks.next_chunk().await? {
            check_boundary(ctx, inbound)?;
            session.record_chunk(item_index, offset, payload.len())?;

            let frame = WireFrame::Chunk(ChunkFrame {
                item_index,
                offset,
                payload,
            });
            let written = tokio::time::timeout(ctx.config.chunk_timeout, writer.send(&frame))
                .await
                .map_err(|_| TransferError::Timeout("chunk write"))?;
            if let Err(err) = written {
                return Err(peer_verdict(inbound).await.unwrap_or(err));
            }
            ctx.events.progress(session.progress());
        }
    }

    let next = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(TransferError::cancelled("cancelled by user")),
        next = tokio::time::timeout(ctx.config.chunk_timeout, inbound.recv()) => {
            next.map_err(|_| TransferError::Timeout("receiver verdict"))?
        }
    };
    match control_of(next)? {
        ControlFrame::Finished {
            outcome: FinishOutcome::Completed,
        } => {}
        other => return Err(unexpected(&WireFrame::Control(other))),
    }

    session.transition(TransferState::Completed)?;
    tracing::info!(
        "Sent {} item(s), {} bytes",
        session.items().len(),
        session.bytes_done()
    );
    Ok(())
}

/// Stop at a chunk boundary if either side gave up.
fn check_boundary(
    ctx: &TransferContext,
    inbound: &mut mpsc::UnboundedReceiver<Inbound>,
) -> Result<(), TransferError> {
    if ctx.cancel.is_cancelled() {
        return Err(TransferError::cancelled("cancelled by user"));
    }
    match inbound.try_recv() {
        Ok(next) => {
            let frame = control_of(Some(next))?;
            Err(unexpected(&WireFrame::Control(frame)))
        }
        Err(TryRecvError::Empty) => Ok(()),
        Err(TryRecvError::Disconnected) => Err(TransferError::Closed),
    }
}

/// After a failed write, the peer may already have said why it hung up.
async fn peer_verdict(inbound: &mut mpsc::UnboundedReceiver<Inbound>) -> Option<TransferError> {
    let next = tokio::time::timeout(VERDICT_GRACE, inbound.recv()).await.ok()?;
    match control_of(next) {
        Err(err @ (TransferError::PeerCancelled(_) | TransferError::PeerFailed(_))) => Some(err),
        _ => None,
    }
}

/// Unwrap a control frame from the pump, turning the peer's own
/// cancellation or failure report into the matching error.
fn control_of(next: Option<Inbound>) -> Result<ControlFrame, TransferError> {
    match next {
        None | Some(Ok(None)) => Err(TransferError::Closed),
        Some(Err(e)) => Err(e),
        Some(Ok(Some(WireFrame::Control(control)))) => match control {
            ControlFrame::Cancel { reason } => Err(TransferError::PeerCancelled(reason)),
            ControlFrame::Finished {
                outcome: FinishOutcome::Failed(kind),
            } => Err(TransferError::PeerFailed(kind)),
            other => Ok(other),
        },
        Some(Ok(Some(other))) => Err(unexpected(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_control_of_maps_peer_verdicts() {
        let cancel = Some(Ok(Some(WireFrame::Control(ControlFrame::Cancel {
            reason: "bye".into(),
        }))));
        assert!(matches!(
            control_of(cancel),
            Err(TransferError::PeerCancelled(reason)) if reason == "bye"
        ));

        let failed = Some(Ok(Some(WireFrame::Control(ControlFrame::Finished {
            outcome: FinishOutcome::Failed(ErrorKind::IntegrityFailure),
        }))));
        assert!(matches!(
            control_of(failed),
            Err(TransferError::PeerFailed(ErrorKind::IntegrityFailure))
        ));

        assert!(matches!(control_of(None), Err(TransferError::Closed)));
        assert!(matches!(control_of(Some(Ok(None))), Err(TransferError::Closed)));
    }

    #[test]
    fn test_chunk_to_sender_is_a_violation() {
        let chunk = Some(Ok(Some(WireFrame::Chunk(ChunkFrame {
            item_index: 0,
            offset: 0,
            payload: vec![1],
        }))));
        assert!(matches!(
            control_of(chunk),
            Err(TransferError::Protocol(_))
        ));
    }
}
