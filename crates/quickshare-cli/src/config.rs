//! Configuration system for the Quickshare CLI.

use anyhow::Context;
use quickshare_core::node::DEFAULT_PORT;
use quickshare_crypto::Trust;
use quickshare_discovery::EndpointId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Quickshare configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Device identity and trust
    #[serde(default)]
    pub device: DeviceConfig,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device identity and trust
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name shown to peers
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Stable 4-character endpoint id; random per run when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    /// Trust policy: implicit, pin, or preshared
    #[serde(default = "default_trust")]
    pub trust: String,
    /// 32-byte shared secret (hex) for the preshared policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address for incoming sessions
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bound on connect plus handshake, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Largest frame accepted from a peer
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-read timeout while transferring, in seconds
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,
    /// Time allowed to accept or reject an offer, in seconds
    #[serde(default = "default_consent_timeout")]
    pub consent_timeout_secs: u64,
    /// Accept every offer without asking
    #[serde(default)]
    pub auto_accept: bool,
    /// Where received files go
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Re-announce interval in seconds
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,
    /// Silence before a peer is reported lost, in seconds
    #[serde(default = "default_endpoint_timeout")]
    pub endpoint_timeout_secs: u64,
    /// Multicast group and port
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn default_trust() -> String {
    "implicit".to_string()
}

fn default_listen_addr() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_max_frame_size() -> usize {
    quickshare_core::DEFAULT_MAX_FRAME_SIZE
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_chunk_timeout() -> u64 {
    30
}

fn default_consent_timeout() -> u64 {
    60
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_announce_interval() -> u64 {
    2
}

fn default_endpoint_timeout() -> u64 {
    10
}

fn default_multicast_group() -> String {
    quickshare_discovery::DiscoveryConfig::default()
        .multicast_group
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            endpoint_id: None,
            trust: default_trust(),
            preshared_key: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            handshake_timeout_secs: default_handshake_timeout(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_timeout_secs: default_chunk_timeout(),
            consent_timeout_secs: default_consent_timeout(),
            auto_accept: false,
            download_dir: default_download_dir(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_interval_secs: default_announce_interval(),
            endpoint_timeout_secs: default_endpoint_timeout(),
            multicast_group: default_multicast_group(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("quickshare/config.toml")
    }

    /// Load config from the default path, or create one there.
    ///
    /// A freshly created config pins a random endpoint id so the device
    /// keeps its identity across runs.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let mut config = Self::default();
            config.device.endpoint_id = Some(EndpointId::random().to_string());
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.network
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", self.network.listen_addr))
    }

    /// Resolve the trust policy
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown policy or a missing or malformed
    /// preshared key.
    pub fn trust(&self) -> anyhow::Result<Trust> {
        match self.device.trust.to_lowercase().as_str() {
            "implicit" => Ok(Trust::Implicit),
            "pin" => Ok(Trust::Pin),
            "preshared" => {
                let encoded = self
                    .device
                    .preshared_key
                    .as_deref()
                    .context("trust = \"preshared\" requires preshared_key")?;
                let bytes = Zeroizing::new(
                    hex::decode(encoded.trim()).context("preshared_key is not valid hex")?,
                );
                let key: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("preshared_key must be 32 bytes"))?;
                Ok(Trust::PreShared(key))
            }
            other => anyhow::bail!(
                "Invalid trust policy: {}. Must be one of: implicit, pin, preshared",
                other
            ),
        }
    }

    /// Build the node configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any field cannot be converted.
    pub fn node_config(&self) -> anyhow::Result<quickshare_core::NodeConfig> {
        let endpoint_id = match &self.device.endpoint_id {
            Some(id) => EndpointId::parse(id).with_context(|| format!("invalid endpoint id: {id}"))?,
            None => EndpointId::random(),
        };

        Ok(quickshare_core::NodeConfig {
            listen_addr: self.parse_listen_addr()?,
            endpoint_id,
            device_name: self.device.name.clone(),
            trust: self.trust()?,
            handshake_timeout: Duration::from_secs(self.network.handshake_timeout_secs),
            max_frame_size: self.network.max_frame_size,
            transfer: quickshare_core::TransferConfig {
                chunk_size: self.transfer.chunk_size,
                chunk_timeout: Duration::from_secs(self.transfer.chunk_timeout_secs),
                consent_timeout: Duration::from_secs(self.transfer.consent_timeout_secs),
                auto_accept: self.transfer.auto_accept,
                download_dir: self.transfer.download_dir.clone(),
            },
        })
    }

    /// Build the discovery configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the multicast group cannot be parsed.
    pub fn discovery_config(&self) -> anyhow::Result<quickshare_discovery::DiscoveryConfig> {
        let multicast_group: SocketAddrV4 =
            self.discovery.multicast_group.parse().with_context(|| {
                format!(
                    "invalid multicast group: {}",
                    self.discovery.multicast_group
                )
            })?;

        Ok(quickshare_discovery::DiscoveryConfig {
            announce_interval: Duration::from_secs(self.discovery.announce_interval_secs),
            endpoint_timeout: Duration::from_secs(self.discovery.endpoint_timeout_secs),
            multicast_group,
            ..quickshare_discovery::DiscoveryConfig::default()
        })
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Node-level checks: device name, chunk size against frame size, timeouts
        self.node_config()?.validate()?;

        let discovery = self.discovery_config()?;
        if !discovery.multicast_group.ip().is_multicast() {
            anyhow::bail!(
                "{} is not a multicast address",
                discovery.multicast_group.ip()
            );
        }
        if discovery.announce_interval.is_zero() {
            anyhow::bail!("Announce interval must be greater than zero");
        }
        if discovery.endpoint_timeout <= discovery.announce_interval {
            anyhow::bail!("Endpoint timeout must be longer than the announce interval");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
