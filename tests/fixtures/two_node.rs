//! Two-node test fixture for integration testing
//!
//! Provides a sender and a receiver bound to loopback, each with its own
//! temporary directory:
//! - Source files are written into the sender's directory
//! - Received files land in the receiver's download directory
//!
//! # Example
//!
//! ```no_run
//! use quickshare_integration_tests::TwoNodeFixture;
//!
//! # async fn example() -> Result<(), quickshare_core::NodeError> {
//! let fixture = TwoNodeFixture::new().await?;
//! let path = fixture.write_source("hello.txt", b"hi")?;
//!
//! let session = fixture
//!     .sender
//!     .send_files(&fixture.receiver_endpoint(), vec![path])
//!     .await?;
//! session.wait().await;
//! # Ok(())
//! # }
//! ```

use quickshare_core::node::{NodeConfig, NodeError, SessionManager};
use quickshare_discovery::{Capabilities, Endpoint, EndpointId};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Sender and receiver on loopback
pub struct TwoNodeFixture {
    /// Sending node, endpoint id `SEND`
    pub sender: SessionManager,
    /// Receiving node, endpoint id `RECV`
    pub receiver: SessionManager,
    source_dir: TempDir,
    download_dir: TempDir,
}

impl TwoNodeFixture {
    /// Fixture whose receiver accepts every offer
    ///
    /// # Errors
    ///
    /// Returns an error if a temporary directory or listener cannot be
    /// created.
    pub async fn new() -> Result<Self, NodeError> {
        Self::with_config(|_| {}, |receiver| receiver.transfer.auto_accept = true).await
    }

    /// Fixture with adjusted configurations
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub async fn with_config(
        adjust_sender: impl FnOnce(&mut NodeConfig),
        adjust_receiver: impl FnOnce(&mut NodeConfig),
    ) -> Result<Self, NodeError> {
        let source_dir = tempfile::tempdir()?;
        let download_dir = tempfile::tempdir()?;

        let mut sender_config = node_config("SEND", source_dir.path());
        adjust_sender(&mut sender_config);
        let mut receiver_config = node_config("RECV", download_dir.path());
        adjust_receiver(&mut receiver_config);

        Ok(Self {
            sender: SessionManager::bind(sender_config).await?,
            receiver: SessionManager::bind(receiver_config).await?,
            source_dir,
            download_dir,
        })
    }

    /// How the sender reaches the receiver
    #[must_use]
    pub fn receiver_endpoint(&self) -> Endpoint {
        endpoint_of(&self.receiver)
    }

    /// Write a file into the sender's directory
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_source(&self, name: &str, contents: &[u8]) -> Result<PathBuf, NodeError> {
        let path = self.source_dir.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Where a received file named `name` ends up
    #[must_use]
    pub fn received(&self, name: &str) -> PathBuf {
        self.download_dir.path().join(name)
    }

    /// The receiver's download directory
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        self.download_dir.path()
    }
}

/// Loopback configuration with a fixed endpoint id
///
/// # Panics
///
/// Panics if `id` is not a valid endpoint id.
#[must_use]
pub fn node_config(id: &str, download_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig {
        listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        endpoint_id: EndpointId::parse(id).expect("test endpoint id"),
        device_name: format!("test-{}", id.to_lowercase()),
        ..NodeConfig::default()
    };
    config.transfer.download_dir = download_dir.to_path_buf();
    config
}

/// Endpoint record for a node bound on loopback
#[must_use]
pub fn endpoint_of(manager: &SessionManager) -> Endpoint {
    let info = manager.endpoint_info();
    Endpoint {
        id: info.id,
        name: info.name,
        addr: SocketAddr::from((Ipv4Addr::LOCALHOST, manager.local_addr().port())),
        capabilities: Capabilities::default(),
    }
}

/// Deterministic, non-repeating-looking test content
#[must_use]
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}
