//! Incoming files: staged, offset-checked writes with atomic promotion.
//!
//! Bytes land in `<name>.part` inside the destination directory. The part
//! file is promoted with a single rename once the declared size is reached
//! and the declared hash (if any) matches. On cancellation or integrity
//! failure the part file stays where it is, holding exactly the bytes that
//! were written.

use crate::hasher::ContentHasher;
use crate::name::validate_file_name;
use crate::{FileError, FileMetadata, PART_SUFFIX, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// A file being received.
#[derive(Debug)]
pub struct IncomingFile {
    file: File,
    dest_dir: PathBuf,
    part_path: PathBuf,
    metadata: FileMetadata,
    written: u64,
    hasher: ContentHasher,
}

impl IncomingFile {
    /// Create the part file for `metadata` inside `dest_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::InvalidName`] for unsafe names and
    /// [`FileError::Io`] if the directory or part file cannot be created.
    pub async fn create(dest_dir: impl AsRef<Path>, metadata: FileMetadata) -> Result<Self> {
        let dest_dir = dest_dir.as_ref().to_path_buf();
        validate_file_name(&metadata.name)?;
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| FileError::io(&dest_dir, e))?;

        let part_path =
            find_available_path(dest_dir.join(format!("{}{PART_SUFFIX}", metadata.name))).await;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .await
            .map_err(|e| FileError::io(&part_path, e))?;

        tracing::debug!(
            "Receiving {} ({} bytes) into {}",
            metadata.name,
            metadata.size,
            part_path.display()
        );

        Ok(Self {
            file,
            dest_dir,
            part_path,
            metadata,
            written: 0,
            hasher: ContentHasher::new(),
        })
    }

    /// Declared metadata
    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Bytes written so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Whether the declared size has been reached
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.written == self.metadata.size
    }

    /// Path of the part file
    #[must_use]
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Write a chunk at `offset`.
    ///
    /// Chunks must continue exactly where the previous one ended and must
    /// not run past the declared size. A refused chunk writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::OffsetMismatch`] on a gap or overlap,
    /// [`FileError::Overflow`] past the declared size, and [`FileError::Io`]
    /// on write failure.
    pub async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<u64> {
        if offset != self.written {
            return Err(FileError::OffsetMismatch {
                expected: self.written,
                actual: offset,
            });
        }
        let end = offset + data.len() as u64;
        if end > self.metadata.size {
            return Err(FileError::Overflow {
                declared: self.metadata.size,
                attempted: end,
            });
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| FileError::io(&self.part_path, e))?;
        self.file
            .write_all(data)
            .await
            .map_err(|e| FileError::io(&self.part_path, e))?;

        self.hasher.update(data);
        self.written = end;
        Ok(self.written)
    }

    /// Verify and promote the part file to its final name.
    ///
    /// Returns the final path, which gets a ` (N)` suffix if the name is
    /// already taken.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Incomplete`] before the declared size is
    /// reached and [`FileError::IntegrityFailure`] on hash mismatch; in both
    /// cases the part file is left on disk.
    pub async fn finish(mut self) -> Result<PathBuf> {
        self.flush().await?;

        if !self.is_complete() {
            return Err(FileError::Incomplete {
                declared: self.metadata.size,
                written: self.written,
            });
        }

        if let Some(expected) = self.metadata.hash {
            let actual = self.hasher.finalize();
            if actual != expected {
                tracing::warn!(
                    "Integrity check failed for {}, keeping {}",
                    self.metadata.name,
                    self.part_path.display()
                );
                return Err(FileError::IntegrityFailure {
                    path: self.part_path.clone(),
                    expected: hex::encode(expected),
                    actual: hex::encode(actual),
                });
            }
        }

        let Self {
            file,
            dest_dir,
            part_path,
            metadata,
            ..
        } = self;
        drop(file);

        let final_path = find_available_path(dest_dir.join(&metadata.name)).await;
        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| FileError::io(&part_path, e))?;

        tracing::info!("Received {} -> {}", metadata.name, final_path.display());
        Ok(final_path)
    }

    /// Stop receiving and keep the part file as-is.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if buffered data cannot be flushed.
    pub async fn abandon(mut self) -> Result<PathBuf> {
        self.flush().await?;
        tracing::debug!(
            "Keeping partial {} ({} of {} bytes)",
            self.part_path.display(),
            self.written,
            self.metadata.size
        );
        Ok(self.part_path)
    }

    async fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| FileError::io(&self.part_path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| FileError::io(&self.part_path, e))
    }
}

/// First path of the form `stem (N).ext` that does not exist yet.
///
/// Returns `path` unchanged when it is free.
pub async fn find_available_path(path: PathBuf) -> PathBuf {
    if !exists(&path).await {
        return path;
    }

    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    // Split at the first dot that is not a leading one, so "a.tar.gz" keeps
    // ".tar.gz" and ".hidden" keeps its name intact.
    let (stem, extension) = match file_name.char_indices().skip(1).find(|&(_, c)| c == '.') {
        Some((pos, _)) => (file_name[..pos].to_string(), file_name[pos..].to_string()),
        None => (file_name.clone(), String::new()),
    };

    let mut counter = 1u32;
    loop {
        let candidate = parent.join(format!("{stem} ({counter}){extension}"));
        if !exists(&candidate).await {
            return candidate;
        }
        counter += 1;
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;

    fn meta(name: &str, data: &[u8], with_hash: bool) -> FileMetadata {
        FileMetadata {
            name: name.to_string(),
            size: data.len() as u64,
            hash: with_hash.then(|| hash_bytes(data)),
        }
    }

    #[tokio::test]
    async fn test_receive_and_promote() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![7u8; 10_000];
        let mut file = IncomingFile::create(dir.path(), meta("a.bin", &data, true))
            .await
            .unwrap();

        assert!(file.part_path().ends_with("a.bin.part"));
        for (i, chunk) in data.chunks(4096).enumerate() {
            file.write_chunk((i * 4096) as u64, chunk).await.unwrap();
        }
        assert!(file.is_complete());

        let part = file.part_path().to_path_buf();
        let final_path = file.finish().await.unwrap();
        assert_eq!(final_path, dir.path().join("a.bin"));
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), data);
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_gap_and_overlap_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![1u8; 100];
        let mut file = IncomingFile::create(dir.path(), meta("g.bin", &data, false))
            .await
            .unwrap();

        file.write_chunk(0, &data[..50]).await.unwrap();
        assert!(matches!(
            file.write_chunk(60, &data[60..]).await,
            Err(FileError::OffsetMismatch {
                expected: 50,
                actual: 60
            })
        ));
        assert!(matches!(
            file.write_chunk(40, &data[40..]).await,
            Err(FileError::OffsetMismatch { .. })
        ));
        assert_eq!(file.bytes_written(), 50);
    }

    #[tokio::test]
    async fn test_overflow_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = IncomingFile::create(dir.path(), meta("o.bin", &[0u8; 10], false))
            .await
            .unwrap();
        assert!(matches!(
            file.write_chunk(0, &[0u8; 11]).await,
            Err(FileError::Overflow {
                declared: 10,
                attempted: 11
            })
        ));
        assert_eq!(file.bytes_written(), 0);
    }

    #[tokio::test]
    async fn test_integrity_failure_keeps_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let declared = vec![1u8; 5000];
        let actual = vec![2u8; 5000];
        let mut file = IncomingFile::create(dir.path(), meta("bad.bin", &declared, true))
            .await
            .unwrap();
        file.write_chunk(0, &actual).await.unwrap();

        let part = file.part_path().to_path_buf();
        let err = file.finish().await.unwrap_err();
        assert!(matches!(err, FileError::IntegrityFailure { .. }));
        assert_eq!(tokio::fs::read(&part).await.unwrap(), actual);
        assert!(!dir.path().join("bad.bin").exists());
    }

    #[tokio::test]
    async fn test_finish_incomplete_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = IncomingFile::create(dir.path(), meta("i.bin", &[0u8; 10], false))
            .await
            .unwrap();
        file.write_chunk(0, &[0u8; 4]).await.unwrap();
        assert!(matches!(
            file.finish().await,
            Err(FileError::Incomplete {
                declared: 10,
                written: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_abandon_keeps_partial_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = IncomingFile::create(dir.path(), meta("c.bin", &[0u8; 100], false))
            .await
            .unwrap();
        file.write_chunk(0, &[9u8; 30]).await.unwrap();
        let part = file.abandon().await.unwrap();
        assert_eq!(tokio::fs::read(&part).await.unwrap(), vec![9u8; 30]);
    }

    #[tokio::test]
    async fn test_name_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("dup.tar.gz"), b"old").await.unwrap();

        let file = IncomingFile::create(dir.path(), meta("dup.tar.gz", b"", false))
            .await
            .unwrap();
        let final_path = file.finish().await.unwrap();
        assert_eq!(final_path, dir.path().join("dup (1).tar.gz"));
        assert_eq!(tokio::fs::read(dir.path().join("dup.tar.gz")).await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_existing_part_file_not_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("p.bin.part"), b"earlier").await.unwrap();
        let file = IncomingFile::create(dir.path(), meta("p.bin", b"x", false))
            .await
            .unwrap();
        assert_eq!(file.part_path(), dir.path().join("p (1).bin.part"));
    }

    #[tokio::test]
    async fn test_unsafe_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = IncomingFile::create(dir.path(), meta("../escape", b"x", false))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::InvalidName { .. }));
    }
}
