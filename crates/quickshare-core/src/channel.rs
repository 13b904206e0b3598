//! Encrypted frame channel used after the handshake.
//!
//! Control and Chunk frames keep the plain frame layout, but the body is
//! the sealed bincode body. The tag byte is the AEAD associated data, so a
//! frame cannot be relabelled in transit. Handshake frames are never
//! accepted once the channel is up.

use crate::error::TransferError;
use crate::frame::{FrameCodec, FrameKind, FrameReader, WireFrame, write_raw};
use quickshare_crypto::{Opener, Sealer, SessionCrypto};
use tokio::io::{AsyncRead, AsyncWrite};

/// Sealing half of a secure channel.
pub struct SecureWriter<W> {
    writer: W,
    codec: FrameCodec,
    sealer: Sealer,
}

impl<W: AsyncWrite + Unpin> SecureWriter<W> {
    /// Wrap the write half of a connection.
    pub fn new(writer: W, codec: FrameCodec, sealer: Sealer) -> Self {
        Self {
            writer,
            codec,
            sealer,
        }
    }

    /// Seal and send a Control or Chunk frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Protocol`] for handshake frames, otherwise
    /// any sealing or write failure.
    pub async fn send(&mut self, frame: &WireFrame) -> Result<(), TransferError> {
        let kind = frame.kind();
        if kind == FrameKind::Handshake {
            return Err(TransferError::protocol("handshake frame on secure channel"));
        }
        let sealed = self
            .sealer
            .seal(&FrameCodec::encode_body(frame), &[kind as u8])?;
        write_raw(&mut self.writer, &self.codec, kind, &sealed).await?;
        Ok(())
    }

    /// Frames sealed so far
    pub fn frames_sent(&self) -> u64 {
        self.sealer.counter()
    }
}

/// Opening half of a secure channel.
pub struct SecureReader<R> {
    reader: FrameReader<R>,
    opener: Opener,
}

impl<R: AsyncRead + Unpin> SecureReader<R> {
    /// Continue reading from a frame reader that carried the handshake.
    ///
    /// Reusing the reader keeps any sealed frames the peer pipelined behind
    /// its confirmation.
    pub fn new(reader: FrameReader<R>, opener: Opener) -> Self {
        Self { reader, opener }
    }

    /// Receive and open the next frame.
    ///
    /// Returns `Ok(None)` on clean end of stream. Cancel-safe.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Protocol`] for handshake frames,
    /// [`TransferError::Crypto`] if the frame does not authenticate, and
    /// framing errors otherwise.
    pub async fn recv(&mut self) -> Result<Option<WireFrame>, TransferError> {
        let Some(raw) = self.reader.read_raw().await? else {
            return Ok(None);
        };
        if raw.kind == FrameKind::Handshake {
            return Err(TransferError::protocol("handshake frame on secure channel"));
        }
        let plaintext = self.opener.open(&raw.body, &[raw.kind as u8])?;
        let frame = self.reader.codec().decode_body(raw.kind, &plaintext)?;
        Ok(Some(frame))
    }

    /// Frames opened so far
    pub fn frames_received(&self) -> u64 {
        self.opener.counter()
    }
}

/// Build both halves of a channel from a completed handshake.
pub fn secure_channel<R, W>(
    reader: FrameReader<R>,
    writer: W,
    crypto: SessionCrypto,
) -> (SecureReader<R>, SecureWriter<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let codec = *reader.codec();
    let (sealer, opener) = crypto.split();
    (
        SecureReader::new(reader, opener),
        SecureWriter::new(writer, codec, sealer),
    )
}
