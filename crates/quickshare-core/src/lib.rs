//! # Quickshare Core
//!
//! Core protocol implementation for Quickshare, a nearby-device file
//! sharing engine.
//!
//! This crate provides:
//! - Frame encoding and decoding (length-prefixed, resumable)
//! - The handshake driver and the sealed post-handshake channel
//! - Transfer sessions and the sender and receiver loops
//! - The session manager and per-session event streams
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Node                                     │
//! │   (session manager, handles, events, configuration)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Transfer                                 │
//! │   (manifest, consent, chunk stream, verification)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                   Handshake / Channel                            │
//! │   (key agreement, auth code, sealed frames)                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Frames                                   │
//! │   (length-prefixed protocol data units)                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod channel;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod node;
pub mod transfer;

pub use channel::{SecureReader, SecureWriter, secure_channel};
pub use error::{ErrorKind, FrameError, TransferError};
pub use frame::{
    ChunkFrame, ControlFrame, DEFAULT_MAX_FRAME_SIZE, Decoded, FRAME_HEADER_SIZE, FinishOutcome,
    FrameCodec, FrameKind, FrameReader, HandshakeFrame, HandshakeStep, ManifestEntry, WireFrame,
};
pub use handshake::{
    AutoConfirm, HandshakeOptions, HandshakeOutcome, LocalIdentity, PeerIdentity, PinConfirmer,
    perform_handshake,
};
pub use node::{
    DEFAULT_PORT, NodeConfig, NodeError, SessionEvent, SessionEvents, SessionHandle, SessionId,
    SessionManager, TransferConfig, TransferProgress,
};
pub use transfer::{Direction, TransferSession, TransferState};

/// Protocol version carried in the handshake
pub const PROTOCOL_VERSION: u32 = quickshare_crypto::handshake::HANDSHAKE_VERSION;
