//! BLAKE3 content hashing for file integrity.

use crate::{FileError, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 128 * 1024;

/// Incremental whole-file hasher.
///
/// Incoming files are written strictly in order, so the receiver hashes
/// each chunk as it lands instead of re-reading the file at the end.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    hasher: blake3::Hasher,
    bytes: u64,
}

impl ContentHasher {
    /// Create an empty hasher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next bytes of the file
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes hashed so far
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Hash of everything fed so far
    #[must_use]
    pub fn finalize(&self) -> [u8; 32] {
        *self.hasher.finalize().as_bytes()
    }
}

/// Hash an in-memory buffer
#[must_use]
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash the first `limit` bytes of a file (the whole file if `None`).
///
/// # Errors
///
/// Returns [`FileError::Io`] if the file cannot be opened or read.
pub async fn hash_file(path: &Path, limit: Option<u64>) -> Result<[u8; 32]> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| FileError::io(path, e))?;
    let mut reader = file.take(limit.unwrap_or(u64::MAX));
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| FileError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_matches_oneshot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut hasher = ContentHasher::new();
        for chunk in data.chunks(333) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.bytes(), 10_000);
        assert_eq!(hasher.finalize(), hash_bytes(&data));
    }

    #[tokio::test]
    async fn test_hash_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data = vec![0x5Au8; 300_000];
        tokio::fs::write(&path, &data).await.unwrap();

        assert_eq!(hash_file(&path, None).await.unwrap(), hash_bytes(&data));
        assert_eq!(
            hash_file(&path, Some(1000)).await.unwrap(),
            hash_bytes(&data[..1000])
        );
    }

    #[tokio::test]
    async fn test_hash_missing_file() {
        let err = hash_file(Path::new("/nonexistent/quickshare"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Io { .. }));
    }
}
