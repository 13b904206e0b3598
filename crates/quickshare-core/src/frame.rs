//! Frame encoding and decoding for the Quickshare wire protocol.
//!
//! Every frame is length-prefixed:
//!
//! ```text
//! +----------------+---------+----------------------+
//! | length: u32 BE | tag: u8 | body (length - 1)    |
//! +----------------+---------+----------------------+
//! ```
//!
//! The body is the bincode encoding (varint integers) of the frame's
//! struct. After the handshake, Control and Chunk bodies are sealed and the
//! same layout carries ciphertext; see [`crate::channel`].
//!
//! Decoding is resumable: callers keep an accumulating buffer, feed it to
//! [`FrameCodec::decode`], and drain `consumed` bytes whenever a frame comes
//! out. Length limits are checked from the prefix alone, before anything is
//! allocated.

use crate::error::{ErrorKind, FrameError};
use bincode::Options;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Length prefix plus tag byte
pub const FRAME_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + 1;

/// Default limit on `tag + body`
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Default limit on a chunk payload
pub const DEFAULT_MAX_CHUNK_PAYLOAD: usize = quickshare_files::MAX_CHUNK_SIZE;

const READ_RESERVE: usize = 16 * 1024;

/// Frame tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Key agreement and confirmation
    Handshake = 0x01,
    /// Transfer negotiation and teardown
    Control = 0x02,
    /// File payload
    Chunk = 0x03,
}

impl TryFrom<u8> for FrameKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::Control),
            0x03 => Ok(Self::Chunk),
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

/// Handshake frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeFrame {
    /// Handshake protocol version
    pub version: u32,
    /// Message carried
    pub step: HandshakeStep,
}

/// Handshake messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeStep {
    /// Ephemeral key, nonce, and who is speaking
    Hello {
        /// X25519 public key
        public_key: Vec<u8>,
        /// Per-handshake nonce
        nonce: Vec<u8>,
        /// Sender's endpoint id
        endpoint_id: String,
        /// Sender's display name
        device_name: String,
    },
    /// Key confirmation
    Confirm {
        /// Confirmation tag
        tag: Vec<u8>,
    },
    /// Handshake abandoned
    Abort {
        /// Human-readable reason
        reason: String,
    },
}

/// One entry of the manifest offered to the receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// File name (single path component)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// BLAKE3 content hash
    pub hash: Option<Vec<u8>>,
}

/// How the receiver saw the transfer end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishOutcome {
    /// Every item arrived and verified
    Completed,
    /// Receiver gave up
    Failed(ErrorKind),
}

/// Transfer control frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlFrame {
    /// Sender's manifest
    Introduction {
        /// Offered items
        items: Vec<ManifestEntry>,
    },
    /// Receiver's decision on the manifest
    Response {
        /// Whether the transfer may proceed
        accepted: bool,
    },
    /// Either side abandons the transfer
    Cancel {
        /// Human-readable reason
        reason: String,
    },
    /// Receiver's final verdict
    Finished {
        /// Result of the transfer
        outcome: FinishOutcome,
    },
}

/// File payload frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFrame {
    /// Manifest index of the item
    pub item_index: u32,
    /// Byte offset of the payload within the item
    pub offset: u64,
    /// File bytes
    pub payload: Vec<u8>,
}

/// Any frame on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Handshake frame
    Handshake(HandshakeFrame),
    /// Control frame
    Control(ControlFrame),
    /// Chunk frame
    Chunk(ChunkFrame),
}

impl WireFrame {
    /// Tag used on the wire
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            WireFrame::Handshake(_) => FrameKind::Handshake,
            WireFrame::Control(_) => FrameKind::Control,
            WireFrame::Chunk(_) => FrameKind::Chunk,
        }
    }
}

/// Result of a decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A complete frame occupying the first `consumed` bytes
    Frame {
        /// Decoded frame
        frame: T,
        /// Bytes to drain from the buffer
        consumed: usize,
    },
    /// At least `needed` more bytes are required
    NeedMoreData {
        /// Minimum additional bytes
        needed: usize,
    },
}

/// A frame split into tag and undecoded body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// Tag
    pub kind: FrameKind,
    /// Body bytes (plaintext or sealed)
    pub body: &'a [u8],
}

/// Owned counterpart of [`RawFrame`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    /// Tag
    pub kind: FrameKind,
    /// Body bytes (plaintext or sealed)
    pub body: Vec<u8>,
}

/// Stateless length-prefixed frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: usize,
    max_chunk_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_CHUNK_PAYLOAD)
    }
}

impl FrameCodec {
    /// Create a codec with explicit limits.
    #[must_use]
    pub fn new(max_frame_size: usize, max_chunk_payload: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.max(1),
            max_chunk_payload,
        }
    }

    /// Limit on `tag + body`
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Limit on a chunk payload
    #[must_use]
    pub fn max_chunk_payload(&self) -> usize {
        self.max_chunk_payload
    }

    /// Encode a frame. Deterministic: equal frames give equal bytes.
    #[must_use]
    pub fn encode(&self, frame: &WireFrame) -> Vec<u8> {
        Self::encode_raw(frame.kind(), &Self::encode_body(frame))
    }

    /// Serialize the body of a frame without the header.
    #[must_use]
    pub fn encode_body(frame: &WireFrame) -> Vec<u8> {
        let options = body_options(u64::MAX);
        let encoded = match frame {
            WireFrame::Handshake(f) => options.serialize(f),
            WireFrame::Control(f) => options.serialize(f),
            WireFrame::Chunk(f) => options.serialize(f),
        };
        // Writing derived structs into a Vec with no size limit cannot fail
        encoded.unwrap_or_default()
    }

    /// Frame an already-encoded body.
    ///
    /// `body` must be shorter than `u32::MAX` bytes.
    #[must_use]
    pub fn encode_raw(kind: FrameKind, body: &[u8]) -> Vec<u8> {
        let len = (body.len() + 1) as u32;
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        out.extend_from_slice(&len.to_be_bytes());
        out.push(kind as u8);
        out.extend_from_slice(body);
        out
    }

    /// Decode the frame at the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed`-kind [`FrameError`] for an oversized or zero
    /// length prefix, an unknown tag, a body that does not deserialize
    /// exactly, or an oversized chunk payload.
    pub fn decode(&self, buf: &[u8]) -> Result<Decoded<WireFrame>, FrameError> {
        match self.decode_raw(buf)? {
            Decoded::Frame { frame, consumed } => Ok(Decoded::Frame {
                frame: self.decode_body(frame.kind, frame.body)?,
                consumed,
            }),
            Decoded::NeedMoreData { needed } => Ok(Decoded::NeedMoreData { needed }),
        }
    }

    /// Split the frame at the front of `buf` into tag and body.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Oversized`], [`FrameError::Empty`], or
    /// [`FrameError::UnknownTag`].
    pub fn decode_raw<'a>(&self, buf: &'a [u8]) -> Result<Decoded<RawFrame<'a>>, FrameError> {
        let Some(prefix) = buf.first_chunk::<LENGTH_PREFIX_SIZE>() else {
            return Ok(Decoded::NeedMoreData {
                needed: LENGTH_PREFIX_SIZE - buf.len(),
            });
        };

        let len = u32::from_be_bytes(*prefix) as usize;
        if len == 0 {
            return Err(FrameError::Empty);
        }
        if len > self.max_frame_size {
            return Err(FrameError::Oversized {
                len,
                max: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX_SIZE + len;
        if buf.len() < total {
            return Ok(Decoded::NeedMoreData {
                needed: total - buf.len(),
            });
        }

        let kind = FrameKind::try_from(buf[LENGTH_PREFIX_SIZE])?;
        Ok(Decoded::Frame {
            frame: RawFrame {
                kind,
                body: &buf[FRAME_HEADER_SIZE..total],
            },
            consumed: total,
        })
    }

    /// Deserialize a plaintext body.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidBody`] or [`FrameError::ChunkTooLarge`].
    pub fn decode_body(&self, kind: FrameKind, body: &[u8]) -> Result<WireFrame, FrameError> {
        let options = body_options(self.max_frame_size as u64);
        let invalid = |e: bincode::Error| FrameError::InvalidBody(e.to_string());
        match kind {
            FrameKind::Handshake => options
                .deserialize(body)
                .map(WireFrame::Handshake)
                .map_err(invalid),
            FrameKind::Control => options
                .deserialize(body)
                .map(WireFrame::Control)
                .map_err(invalid),
            FrameKind::Chunk => {
                let chunk: ChunkFrame = options.deserialize(body).map_err(invalid)?;
                if chunk.payload.len() > self.max_chunk_payload {
                    return Err(FrameError::ChunkTooLarge {
                        len: chunk.payload.len(),
                        max: self.max_chunk_payload,
                    });
                }
                Ok(WireFrame::Chunk(chunk))
            }
        }
    }
}

fn body_options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .with_limit(limit)
        .reject_trailing_bytes()
}

/// Reads frames off a byte stream with a reusable buffer.
///
/// `read_raw` and `read_frame` are cancel-safe: dropping the future before
/// it completes loses no bytes.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    codec: FrameCodec,
    buf: Vec<u8>,
    consumed: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream.
    pub fn new(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner,
            codec,
            buf: Vec::with_capacity(READ_RESERVE),
            consumed: 0,
        }
    }

    /// Codec in use
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Read the next frame without decoding its body.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    ///
    /// # Errors
    ///
    /// Returns a framing error, or [`FrameError::Io`] with
    /// `UnexpectedEof` if the stream ends inside a frame.
    pub async fn read_raw(&mut self) -> Result<Option<OwnedFrame>, FrameError> {
        if self.consumed > 0 {
            self.buf.drain(..self.consumed);
            self.consumed = 0;
        }

        loop {
            match self.codec.decode_raw(&self.buf)? {
                Decoded::Frame { frame, consumed } => {
                    let owned = OwnedFrame {
                        kind: frame.kind,
                        body: frame.body.to_vec(),
                    };
                    self.consumed = consumed;
                    return Ok(Some(owned));
                }
                Decoded::NeedMoreData { needed } => {
                    self.buf.reserve(needed.max(READ_RESERVE));
                    let read = self.inner.read_buf(&mut self.buf).await?;
                    if read == 0 {
                        if self.buf.is_empty() {
                            return Ok(None);
                        }
                        return Err(FrameError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "stream ended inside a frame",
                        )));
                    }
                }
            }
        }
    }

    /// Read and decode the next plaintext frame.
    ///
    /// # Errors
    ///
    /// See [`FrameReader::read_raw`] and [`FrameCodec::decode_body`].
    pub async fn read_frame(&mut self) -> Result<Option<WireFrame>, FrameError> {
        match self.read_raw().await? {
            Some(raw) => self.codec.decode_body(raw.kind, &raw.body).map(Some),
            None => Ok(None),
        }
    }

    /// Recover the stream. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Write one plaintext frame.
///
/// # Errors
///
/// Returns [`FrameError::Oversized`] if the frame exceeds the codec limit,
/// or [`FrameError::Io`] if the write fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codec: &FrameCodec,
    frame: &WireFrame,
) -> Result<(), FrameError> {
    write_raw(writer, codec, frame.kind(), &FrameCodec::encode_body(frame)).await
}

/// Write one frame with an already-encoded body.
///
/// # Errors
///
/// See [`write_frame`].
pub async fn write_raw<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codec: &FrameCodec,
    kind: FrameKind,
    body: &[u8],
) -> Result<(), FrameError> {
    let len = body.len() + 1;
    if len > codec.max_frame_size() {
        return Err(FrameError::Oversized {
            len,
            max: codec.max_frame_size(),
        });
    }
    writer.write_all(&FrameCodec::encode_raw(kind, body)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> WireFrame {
        WireFrame::Handshake(HandshakeFrame {
            version: 1,
            step: HandshakeStep::Hello {
                public_key: vec![7; 32],
                nonce: vec![9; 32],
                endpoint_id: "Ab12".into(),
                device_name: "laptop".into(),
            },
        })
    }

    fn chunk(len: usize) -> WireFrame {
        WireFrame::Chunk(ChunkFrame {
            item_index: 2,
            offset: 65536,
            payload: vec![0xAB; len],
        })
    }

    #[test]
    fn test_header_layout() {
        let frame = WireFrame::Control(ControlFrame::Response { accepted: true });
        let bytes = FrameCodec::default().encode(&frame);

        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - LENGTH_PREFIX_SIZE);
        assert_eq!(bytes[4], FrameKind::Control as u8);
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let codec = FrameCodec::default();
        let frames = [
            hello(),
            WireFrame::Control(ControlFrame::Introduction {
                items: vec![ManifestEntry {
                    name: "report.pdf".into(),
                    size: 1234,
                    hash: Some(vec![1; 32]),
                }],
            }),
            WireFrame::Control(ControlFrame::Finished {
                outcome: FinishOutcome::Failed(ErrorKind::IntegrityFailure),
            }),
            chunk(100),
        ];

        for frame in frames {
            let bytes = codec.encode(&frame);
            assert_eq!(
                codec.decode(&bytes).unwrap(),
                Decoded::Frame {
                    frame,
                    consumed: bytes.len()
                }
            );
        }
    }

    #[test]
    fn test_encode_deterministic() {
        let codec = FrameCodec::default();
        assert_eq!(codec.encode(&hello()), codec.encode(&hello()));
    }

    #[test]
    fn test_need_more_data() {
        let codec = FrameCodec::default();
        let bytes = codec.encode(&chunk(10));

        assert_eq!(
            codec.decode(&[]).unwrap(),
            Decoded::NeedMoreData { needed: 4 }
        );
        assert_eq!(
            codec.decode(&bytes[..2]).unwrap(),
            Decoded::NeedMoreData { needed: 2 }
        );
        assert_eq!(
            codec.decode(&bytes[..bytes.len() - 3]).unwrap(),
            Decoded::NeedMoreData { needed: 3 }
        );
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let codec = FrameCodec::default();
        let mut buf = codec.encode(&hello());
        let first_len = buf.len();
        buf.extend(codec.encode(&chunk(3)));

        let Decoded::Frame { consumed, .. } = codec.decode(&buf).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(consumed, first_len);
        assert!(matches!(
            codec.decode(&buf[consumed..]).unwrap(),
            Decoded::Frame {
                frame: WireFrame::Chunk(_),
                ..
            }
        ));
    }

    #[test]
    fn test_oversized_prefix_rejected_before_body() {
        let codec = FrameCodec::new(1024, 512);
        let prefix = 1025u32.to_be_bytes();
        assert!(matches!(
            codec.decode(&prefix),
            Err(FrameError::Oversized { len: 1025, max: 1024 })
        ));
        let prefix = u32::MAX.to_be_bytes();
        assert!(codec.decode(&prefix).is_err());
    }

    #[test]
    fn test_zero_length_rejected() {
        let codec = FrameCodec::default();
        assert!(matches!(codec.decode(&[0, 0, 0, 0]), Err(FrameError::Empty)));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let codec = FrameCodec::default();
        assert!(matches!(
            codec.decode(&[0, 0, 0, 1, 0x7F]),
            Err(FrameError::UnknownTag(0x7F))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let codec = FrameCodec::default();
        let mut body = FrameCodec::encode_body(&WireFrame::Control(ControlFrame::Response {
            accepted: false,
        }));
        body.push(0);
        let bytes = FrameCodec::encode_raw(FrameKind::Control, &body);
        assert!(matches!(codec.decode(&bytes), Err(FrameError::InvalidBody(_))));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let codec = FrameCodec::default();
        let bytes = FrameCodec::encode_raw(FrameKind::Chunk, &[2]);
        assert!(matches!(codec.decode(&bytes), Err(FrameError::InvalidBody(_))));
    }

    #[test]
    fn test_oversized_chunk_payload_rejected() {
        let codec = FrameCodec::new(DEFAULT_MAX_FRAME_SIZE, 64);
        let bytes = codec.encode(&chunk(65));
        assert!(matches!(
            codec.decode(&bytes),
            Err(FrameError::ChunkTooLarge { len: 65, max: 64 })
        ));
    }

    #[tokio::test]
    async fn test_reader_over_split_stream() {
        let codec = FrameCodec::default();
        let (mut client, server) = tokio::io::duplex(7);
        let frames = vec![hello(), chunk(5000), chunk(0)];

        let to_send = frames.clone();
        let writer = tokio::spawn(async move {
            for frame in &to_send {
                write_frame(&mut client, &codec, frame).await.unwrap();
            }
        });

        let mut reader = FrameReader::new(server, codec);
        for expected in frames {
            assert_eq!(reader.read_frame().await.unwrap(), Some(expected));
        }
        writer.await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_eof_inside_frame() {
        let codec = FrameCodec::default();
        let bytes = codec.encode(&hello());
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server, codec);
        match reader.read_frame().await {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_rejects_oversized() {
        let codec = FrameCodec::new(128, 1024);
        let (mut client, _server) = tokio::io::duplex(1024);
        assert!(matches!(
            write_frame(&mut client, &codec, &chunk(512)).await,
            Err(FrameError::Oversized { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn prop_raw_layer_preserves_body(
            kind in proptest::sample::select(vec![FrameKind::Handshake, FrameKind::Control, FrameKind::Chunk]),
            body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048),
        ) {
            let codec = FrameCodec::default();
            let bytes = FrameCodec::encode_raw(kind, &body);
            match codec.decode_raw(&bytes) {
                Ok(Decoded::Frame { frame, consumed }) => {
                    proptest::prop_assert_eq!(frame.kind, kind);
                    proptest::prop_assert_eq!(frame.body, &body[..]);
                    proptest::prop_assert_eq!(consumed, bytes.len());
                }
                other => proptest::prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn prop_chunk_payload_limit(max in 16usize..256, excess in 1usize..64) {
            let codec = FrameCodec::new(4096, max);
            let within = codec.encode(&chunk(max));
            let accepted = matches!(codec.decode(&within), Ok(Decoded::Frame { .. }));
            proptest::prop_assert!(accepted);

            let over = codec.encode(&chunk(max + excess));
            let rejected = matches!(
                codec.decode(&over),
                Err(FrameError::ChunkTooLarge { len, max: m }) if len == max + excess && m == max
            );
            proptest::prop_assert!(rejected);
        }
    }
}
