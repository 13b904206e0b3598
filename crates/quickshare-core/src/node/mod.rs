//! Node orchestration layer for Quickshare
//!
//! This module provides the application-facing API:
//! - Node and transfer configuration
//! - The session manager (listener, outbound connects, session arena)
//! - Session handles, consent and cancellation
//! - Per-session event streams and progress snapshots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SessionManager                          │
//! │  (listener, endpoint reservations, session arena)       │
//! ├─────────────────────────────────────────────────────────┤
//! │  SessionHandle  │  EventHub  │  TransferProgress         │
//! ├─────────────────────────────────────────────────────────┤
//! │  Handshake  │  Secure channel  │  Transfer loops         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use quickshare_core::node::{NodeConfig, SessionManager};
//! use quickshare_discovery::Endpoint;
//! use std::path::PathBuf;
//!
//! async fn share(endpoint: Endpoint) -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::bind(NodeConfig::default()).await?;
//!
//!     let session = manager
//!         .send_files(&endpoint, vec![PathBuf::from("document.pdf")])
//!         .await?;
//!     println!("Auth code: {}", session.auth_code());
//!
//!     let state = session.wait().await;
//!     println!("Transfer ended: {}", state);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod progress;
pub mod session;
pub mod session_manager;

pub use config::{DEFAULT_PORT, NodeConfig, TransferConfig};
pub use error::{NodeError, Result};
pub use events::{EventHub, SessionEvent, SessionEvents};
pub use progress::TransferProgress;
pub use session::{SessionHandle, SessionId};
pub use session_manager::SessionManager;
