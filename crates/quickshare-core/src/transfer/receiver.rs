//! Receiving side of a transfer.

use super::{TransferContext, notify_peer, unexpected};
use crate::channel::{SecureReader, SecureWriter};
use crate::error::TransferError;
use crate::frame::{ChunkFrame, ControlFrame, FinishOutcome, ManifestEntry, WireFrame};
use crate::transfer::session::{TransferSession, TransferState};
use quickshare_files::IncomingFile;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

/// Items that may have an open part file at the same time.
///
/// A part file is created when an item's first chunk arrives and closed
/// when the item completes. A sender that interleaves more items than this
/// fails the transfer as malformed.
pub const MAX_OPEN_ITEMS: usize = 8;

/// Receive one transfer into the configured download directory.
///
/// `consent` carries the local user's decision unless the configuration
/// auto-accepts. Returns the final paths of the received files.
///
/// # Errors
///
/// Returns the reason the transfer did not complete. Files still in
/// flight keep their `.part` file with the bytes received so far. Unless
/// the peer already knows, it is sent `Cancel` (local cancellation) or
/// `Finished{Failed}`.
pub async fn run_receiver<R, W>(
    mut reader: SecureReader<R>,
    mut writer: SecureWriter<W>,
    consent: oneshot::Receiver<bool>,
    ctx: &TransferContext,
) -> Result<Vec<PathBuf>, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut files = HashMap::new();
    let result = receive(&mut reader, &mut writer, consent, ctx, &mut files).await;

    if let Err(err) = &result {
        for file in files.into_values() {
            match file.abandon().await {
                Ok(path) => tracing::info!("Kept partial file {}", path.display()),
                Err(e) => tracing::warn!("Could not flush partial file: {}", e),
            }
        }
        if !err.peer_is_aware() {
            let frame = match err {
                TransferError::Cancelled(reason) => ControlFrame::Cancel {
                    reason: reason.to_string(),
                },
                other => ControlFrame::Finished {
                    outcome: FinishOutcome::Failed(other.kind()),
                },
            };
            notify_peer(&mut writer, frame).await;
        }
    }
    result
}

async fn receive<R, W>(
    reader: &mut SecureReader<R>,
    writer: &mut SecureWriter<W>,
    consent: oneshot::Receiver<bool>,
    ctx: &TransferContext,
    files: &mut HashMap<u32, IncomingFile>,
) -> Result<Vec<PathBuf>, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let manifest = read_introduction(reader, ctx).await?;
    let mut session = TransferSession::from_manifest(&manifest)?;
    tracing::info!(
        "Peer offered {} item(s), {} bytes",
        session.items().len(),
        session.bytes_total()
    );
    ctx.events.manifest_offered(manifest);

    let accepted = if ctx.config.auto_accept {
        true
    } else {
        await_consent(reader, consent, ctx).await?
    };
    if !accepted {
        writer
            .send(&WireFrame::Control(ControlFrame::Response { accepted: false }))
            .await?;
        tracing::info!("Transfer rejected");
        return Err(TransferError::Rejected);
    }

    writer
        .send(&WireFrame::Control(ControlFrame::Response { accepted: true }))
        .await?;
    session.transition(TransferState::Transferring)?;
    ctx.events.set_state(TransferState::Transferring);

    let mut paths = Vec::with_capacity(session.items().len());
    for item in session.items().iter().filter(|item| item.size == 0) {
        let file = IncomingFile::create(&ctx.config.download_dir, item.metadata()).await?;
        paths.push(file.finish().await?);
    }
    ctx.events.progress(session.progress());

    while !session.is_all_complete() {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(TransferError::cancelled("cancelled by user")),
            next = tokio::time::timeout(ctx.config.chunk_timeout, reader.recv()) => {
                match next.map_err(|_| TransferError::Timeout("chunk"))?? {
                    Some(WireFrame::Chunk(chunk)) => chunk,
                    Some(WireFrame::Control(ControlFrame::Cancel { reason })) => {
                        return Err(TransferError::PeerCancelled(reason));
                    }
                    Some(other) => return Err(unexpected(&other)),
                    None => return Err(TransferError::Closed),
                }
            }
        };
        if ctx.cancel.is_cancelled() {
            return Err(TransferError::cancelled("cancelled by user"));
        }

        let ChunkFrame {
            item_index,
            offset,
            payload,
        } = chunk;
        let complete = session.record_chunk(item_index, offset, payload.len())?;
        let open = files.len();
        let file = match files.entry(item_index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if open >= MAX_OPEN_ITEMS {
                    return Err(TransferError::protocol("too many items in flight"));
                }
                let metadata = session
                    .items()
                    .get(item_index as usize)
                    .ok_or(TransferError::protocol("chunk for unknown item"))?
                    .metadata();
                entry.insert(IncomingFile::create(&ctx.config.download_dir, metadata).await?)
            }
        };
        file.write_chunk(offset, &payload).await?;

        if complete {
            if let Some(file) = files.remove(&item_index) {
                paths.push(file.finish().await?);
            }
        }
        ctx.events.progress(session.progress());
    }

    writer
        .send(&WireFrame::Control(ControlFrame::Finished {
            outcome: FinishOutcome::Completed,
        }))
        .await?;
    session.transition(TransferState::Completed)?;
    tracing::info!(
        "Received {} item(s), {} bytes",
        session.items().len(),
        session.bytes_done()
    );
    Ok(paths)
}

async fn read_introduction<R: AsyncRead + Unpin>(
    reader: &mut SecureReader<R>,
    ctx: &TransferContext,
) -> Result<Vec<ManifestEntry>, TransferError> {
    let next = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(TransferError::cancelled("cancelled by user")),
        next = tokio::time::timeout(ctx.config.chunk_timeout, reader.recv()) => {
            next.map_err(|_| TransferError::Timeout("introduction"))??
        }
    };
    match next {
        Some(WireFrame::Control(ControlFrame::Introduction { items })) => Ok(items),
        Some(WireFrame::Control(ControlFrame::Cancel { reason })) => {
            Err(TransferError::PeerCancelled(reason))
        }
        Some(other) => Err(unexpected(&other)),
        None => Err(TransferError::Closed),
    }
}

/// Wait for the local decision while watching for cancellation from
/// either side. Silence past `consent_timeout` cancels the transfer.
async fn await_consent<R: AsyncRead + Unpin>(
    reader: &mut SecureReader<R>,
    consent: oneshot::Receiver<bool>,
    ctx: &TransferContext,
) -> Result<bool, TransferError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(TransferError::cancelled("cancelled by user")),
        // A dropped decision channel counts as a rejection
        decision = consent => Ok(decision.unwrap_or(false)),
        next = reader.recv() => match next? {
            Some(WireFrame::Control(ControlFrame::Cancel { reason })) => {
                Err(TransferError::PeerCancelled(reason))
            }
            Some(other) => Err(unexpected(&other)),
            None => Err(TransferError::Closed),
        },
        _ = tokio::time::sleep(ctx.config.consent_timeout) => {
            tracing::info!("No decision within {:?}", ctx.config.consent_timeout);
            Err(TransferError::cancelled("consent timed out"))
        }
    }
}
