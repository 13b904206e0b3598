//! File error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or staging files
#[derive(Debug, Error)]
pub enum FileError {
    /// Underlying I/O failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File the operation touched
        path: PathBuf,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// Name is not a safe single path component
    #[error("invalid file name {name:?}: {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was refused
        reason: &'static str,
    },

    /// Chunk does not start where the previous one ended
    #[error("chunk offset {actual} does not continue at {expected}")]
    OffsetMismatch {
        /// Next offset the file expects
        expected: u64,
        /// Offset carried by the chunk
        actual: u64,
    },

    /// Chunk would run past the declared size
    #[error("chunk ends at {attempted}, past declared size {declared}")]
    Overflow {
        /// Declared file size
        declared: u64,
        /// End offset the chunk would reach
        attempted: u64,
    },

    /// Finished with fewer bytes than declared
    #[error("file incomplete: {written} of {declared} bytes")]
    Incomplete {
        /// Declared file size
        declared: u64,
        /// Bytes actually written
        written: u64,
    },

    /// Source file is shorter than the size it was announced with
    #[error("source {} ended after {read} of {declared} bytes", path.display())]
    Truncated {
        /// Source file
        path: PathBuf,
        /// Declared file size
        declared: u64,
        /// Bytes available
        read: u64,
    },

    /// Content hash did not match the declared hash
    #[error("integrity check failed for {}: expected {expected}, got {actual}", path.display())]
    IntegrityFailure {
        /// Partial file kept on disk
        path: PathBuf,
        /// Declared hash (hex)
        expected: String,
        /// Computed hash (hex)
        actual: String,
    },
}

impl FileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileError::Io {
            path: path.into(),
            source,
        }
    }
}
