//! Chunk planning.

use crate::DEFAULT_CHUNK_SIZE;

/// Split a file into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size (clamped to at least 1)
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks for a file
    #[must_use]
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// `(offset, len)` of every chunk, in order
    pub fn ranges(&self, file_size: u64) -> impl Iterator<Item = (u64, usize)> + use<> {
        let chunk_size = self.chunk_size as u64;
        (0..self.chunk_count(file_size)).map(move |i| {
            let offset = i * chunk_size;
            let len = chunk_size.min(file_size - offset);
            (offset, len as usize)
        })
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}
