//! Transfer session state machine.
//!
//! Pure bookkeeping with no I/O. The sender and receiver loops drive it and
//! rely on it to reject illegal transitions and chunks that do not line up
//! with what the manifest declared.

use crate::error::{ErrorKind, TransferError};
use crate::frame::ManifestEntry;
use crate::node::progress::TransferProgress;
use quickshare_files::FileMetadata;
use quickshare_files::name::validate_file_name;
use std::borrow::Cow;
use std::time::Instant;

/// Transfer session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Manifest offered, waiting for the receiver's decision
    Negotiating,
    /// Chunks flowing
    Transferring,
    /// Every item arrived and verified
    Completed,
    /// Cancelled by either side
    Cancelled,
    /// Ended with an error
    Failed(ErrorKind),
}

impl TransferState {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Cancelled | TransferState::Failed(_)
        )
    }

    fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::{Cancelled, Completed, Failed, Negotiating, Transferring};
        matches!(
            (self, next),
            (Negotiating, Transferring)
                | (Negotiating, Cancelled)
                | (Negotiating, Failed(_))
                | (Transferring, Completed)
                | (Transferring, Cancelled)
                | (Transferring, Failed(_))
        )
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Negotiating => write!(f, "Negotiating"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed(kind) => write!(f, "Failed({kind})"),
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// This side sends files
    Outbound,
    /// This side receives files
    Inbound,
}

/// One file of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    /// File name
    pub name: String,
    /// Declared size
    pub size: u64,
    /// Declared BLAKE3 hash
    pub hash: Option<[u8; 32]>,
    bytes_transferred: u64,
}

impl TransferItem {
    /// Create an item with nothing transferred yet
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64, hash: Option<[u8; 32]>) -> Self {
        Self {
            name: name.into(),
            size,
            hash,
            bytes_transferred: 0,
        }
    }

    /// Bytes delivered so far
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Whether every declared byte was delivered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_transferred == self.size
    }

    /// File metadata for the files layer
    #[must_use]
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.name.clone(),
            size: self.size,
            hash: self.hash,
        }
    }

    fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            name: self.name.clone(),
            size: self.size,
            hash: self.hash.map(|h| h.to_vec()),
        }
    }
}

/// Transfer session
///
/// Tracks the state and per-item progress of one transfer, in either
/// direction.
#[derive(Debug)]
pub struct TransferSession {
    direction: Direction,
    state: TransferState,
    items: Vec<TransferItem>,
    started_at: Option<Instant>,
}

impl TransferSession {
    /// Create a session over known items
    #[must_use]
    pub fn new(direction: Direction, items: Vec<TransferItem>) -> Self {
        Self {
            direction,
            state: TransferState::Negotiating,
            items,
            started_at: None,
        }
    }

    /// Create the receiving side from an offered manifest.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::File`] for unsafe names and
    /// [`TransferError::Protocol`] for hashes of the wrong length or an
    /// empty manifest.
    pub fn from_manifest(entries: &[ManifestEntry]) -> Result<Self, TransferError> {
        if entries.is_empty() {
            return Err(TransferError::protocol("empty manifest"));
        }
        if u32::try_from(entries.len()).is_err() {
            return Err(TransferError::protocol("manifest too large"));
        }

        let items = entries
            .iter()
            .map(|entry| {
                validate_file_name(&entry.name)?;
                let hash = match &entry.hash {
                    None => None,
                    Some(bytes) => Some(<[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
                        TransferError::Protocol(Cow::Owned(format!(
                            "hash of {} bytes for {:?}",
                            bytes.len(),
                            entry.name
                        )))
                    })?),
                };
                Ok(TransferItem::new(entry.name.clone(), entry.size, hash))
            })
            .collect::<Result<Vec<_>, TransferError>>()?;

        Ok(Self::new(Direction::Inbound, items))
    }

    /// Manifest describing the items
    #[must_use]
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.items.iter().map(TransferItem::manifest_entry).collect()
    }

    /// Transfer direction
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Items in manifest order
    #[must_use]
    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Protocol`] if the transition is not legal
    /// from the current state. Terminal states accept no transition.
    pub fn transition(&mut self, next: TransferState) -> Result<(), TransferError> {
        if !self.state.can_transition_to(next) {
            return Err(TransferError::Protocol(Cow::Owned(format!(
                "illegal transition {} -> {}",
                self.state, next
            ))));
        }
        if next == TransferState::Transferring {
            self.started_at = Some(Instant::now());
        }
        tracing::debug!("Transfer state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Account for a chunk of `len` bytes at `offset` of item `index`.
    ///
    /// Returns whether the item is now complete.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Protocol`] outside `Transferring`, for an
    /// unknown item, an empty payload, a gap or overlap, or a payload past
    /// the declared size.
    pub fn record_chunk(&mut self, index: u32, offset: u64, len: usize) -> Result<bool, TransferError> {
        if self.state != TransferState::Transferring {
            return Err(TransferError::protocol("chunk outside transferring state"));
        }
        let item = self
            .items
            .get_mut(index as usize)
            .ok_or(TransferError::protocol("chunk for unknown item"))?;
        if len == 0 {
            return Err(TransferError::protocol("empty chunk"));
        }
        if offset != item.bytes_transferred {
            return Err(TransferError::Protocol(Cow::Owned(format!(
                "chunk for item {} at offset {}, expected {}",
                index, offset, item.bytes_transferred
            ))));
        }
        let end = offset
            .checked_add(len as u64)
            .filter(|end| *end <= item.size)
            .ok_or_else(|| {
                TransferError::Protocol(Cow::Owned(format!(
                    "chunk for item {} runs past declared size {}",
                    index, item.size
                )))
            })?;

        item.bytes_transferred = end;
        Ok(item.is_complete())
    }

    /// Whether every item is complete
    #[must_use]
    pub fn is_all_complete(&self) -> bool {
        self.items.iter().all(TransferItem::is_complete)
    }

    /// Bytes delivered across all items
    #[must_use]
    pub fn bytes_done(&self) -> u64 {
        self.items.iter().map(|i| i.bytes_transferred).sum()
    }

    /// Declared bytes across all items
    #[must_use]
    pub fn bytes_total(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }

    /// Snapshot of the progress so far
    #[must_use]
    pub fn progress(&self) -> TransferProgress {
        let speed = self.started_at.map_or(0.0, |start| {
            let elapsed = start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                self.bytes_done() as f64 / elapsed
            } else {
                0.0
            }
        });
        let items_done = self
            .items
            .iter()
            .filter(|i| self.state != TransferState::Negotiating && i.is_complete())
            .count();

        TransferProgress::new(
            self.bytes_done(),
            self.bytes_total(),
            items_done,
            self.items.len(),
            speed,
        )
    }
}
