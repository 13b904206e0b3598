//! Outgoing files: metadata capture and sequential chunk reads.

use crate::hasher::hash_file;
use crate::name::file_name_of;
use crate::{FileChunker, FileError, FileMetadata, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// A local file offered to a peer.
///
/// Size and hash are captured once, when the file is opened; those are the
/// values announced in the manifest.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    path: PathBuf,
    metadata: FileMetadata,
}

impl OutgoingFile {
    /// Stat and hash a file.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the path is not a readable regular file
    /// and [`FileError::InvalidName`] if it has no usable name.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| FileError::io(&path, e))?;
        if !meta.is_file() {
            return Err(FileError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let name = file_name_of(&path)?;
        let size = meta.len();
        let hash = hash_file(&path, Some(size)).await?;

        tracing::debug!(
            "Prepared {} ({} bytes, blake3 {})",
            name,
            size,
            hex::encode(&hash[..8])
        );

        Ok(Self {
            path,
            metadata: FileMetadata {
                name,
                size,
                hash: Some(hash),
            },
        })
    }

    /// Local path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata announced in the manifest
    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Open a sequential chunk reader over the announced size.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the file cannot be opened.
    pub async fn reader(&self, chunker: FileChunker) -> Result<ChunkReader> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| FileError::io(&self.path, e))?;
        Ok(ChunkReader {
            file,
            path: self.path.clone(),
            size: self.metadata.size,
            offset: 0,
            chunk_size: chunker.chunk_size(),
        })
    }
}

/// Reads a file front to back in chunk-sized pieces.
#[derive(Debug)]
pub struct ChunkReader {
    file: tokio::fs::File,
    path: PathBuf,
    size: u64,
    offset: u64,
    chunk_size: usize,
}

impl ChunkReader {
    /// Offset of the next chunk
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next chunk as `(offset, bytes)`, or `None` at the declared end.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Truncated`] if the file shrank below its
    /// announced size and [`FileError::Io`] on read failure.
    pub async fn next_chunk(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        if self.offset >= self.size {
            return Ok(None);
        }
        let want = (self.size - self.offset).min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| FileError::io(&self.path, e))?;
            if n == 0 {
                return Err(FileError::Truncated {
                    path: self.path.clone(),
                    declared: self.size,
                    read: self.offset + filled as u64,
                });
            }
            filled += n;
        }
        let offset = self.offset;
        self.offset += want as u64;
        Ok(Some((offset, buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;

    #[tokio::test]
    async fn test_open_captures_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"hello quickshare").await.unwrap();

        let file = OutgoingFile::open(&path).await.unwrap();
        assert_eq!(file.metadata().name, "notes.txt");
        assert_eq!(file.metadata().size, 16);
        assert_eq!(file.metadata().hash, Some(hash_bytes(b"hello quickshare")));
    }

    #[tokio::test]
    async fn test_open_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OutgoingFile::open(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_reader_yields_ordered_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let file = OutgoingFile::open(&path).await.unwrap();
        let mut reader = file.reader(FileChunker::with_chunk_size(1000)).await.unwrap();

        let mut collected = Vec::new();
        let mut offsets = Vec::new();
        while let Some((offset, chunk)) = reader.next_chunk().await.unwrap() {
            offsets.push(offset);
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(offsets, vec![0, 1000, 2000]);
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn test_reader_detects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrinks.bin");
        tokio::fs::write(&path, vec![1u8; 100]).await.unwrap();
        let file = OutgoingFile::open(&path).await.unwrap();
        tokio::fs::write(&path, vec![1u8; 40]).await.unwrap();

        let mut reader = file.reader(FileChunker::with_chunk_size(64)).await.unwrap();
        let err = reader.next_chunk().await.unwrap_err();
        assert!(matches!(err, FileError::Truncated { read: 40, .. }));
    }

    #[tokio::test]
    async fn test_empty_file_has_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        tokio::fs::write(&path, b"").await.unwrap();
        let file = OutgoingFile::open(&path).await.unwrap();
        let mut reader = file.reader(FileChunker::new()).await.unwrap();
        assert!(reader.next_chunk().await.unwrap().is_none());
    }
}
