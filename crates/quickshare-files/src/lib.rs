//! # Quickshare Files
//!
//! File side of a Quickshare transfer.
//!
//! This crate provides:
//! - Chunk planning with a configurable chunk size
//! - BLAKE3 content hashing for integrity verification
//! - Sequential chunk reading for outgoing files
//! - Staged writes for incoming files: data lands in a `.part` file and is
//!   renamed into place only after size and hash check out
//! - File name validation for names that arrive over the wire

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod error;
pub mod hasher;
pub mod incoming;
pub mod name;
pub mod outgoing;

pub use chunker::FileChunker;
pub use error::FileError;
pub use incoming::IncomingFile;
pub use outgoing::{ChunkReader, OutgoingFile};

/// Default chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk size a sender may use (1 MiB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Suffix of files still being received
pub const PART_SUFFIX: &str = ".part";

/// File metadata for transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File name (single path component)
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// BLAKE3 hash of entire file
    pub hash: Option<[u8; 32]>,
}

/// Result type for file operations
pub type Result<T> = std::result::Result<T, FileError>;
