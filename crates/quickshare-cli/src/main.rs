//! Quickshare CLI
//!
//! Nearby-device file sharing over the local network

mod config;
mod progress;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use console::{Term, style};
use quickshare_core::{
    ManifestEntry, NodeError, PeerIdentity, PinConfirmer, SessionEvent, SessionHandle, SessionManager,
    TransferState,
};
use quickshare_crypto::AuthCode;
use quickshare_discovery::{BrowseStream, Discovery, DiscoveryEvent, Endpoint};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{ProgressDisplay, format_bytes, format_duration, summary};

/// Quickshare - send files to nearby devices
#[derive(Parser)]
#[command(name = "quickshare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send files to a nearby device
    Send {
        /// Files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Device name or endpoint id (defaults to the first device found)
        #[arg(short, long)]
        to: Option<String>,

        /// Seconds to look for the device
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Receive files from nearby devices
    Receive {
        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Accept every offer without asking
        #[arg(long)]
        auto_accept: bool,
    },

    /// List nearby devices
    Peers {
        /// Seconds to watch the network
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // RUST_LOG wins, then --verbose, then --log-level, then the config file
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    match cli.command {
        Commands::Send { files, to, timeout } => {
            send_files(files, to, Duration::from_secs(timeout), &config).await?;
        }
        Commands::Receive {
            output,
            auto_accept,
        } => {
            receive_files(output, auto_accept, &config).await?;
        }
        Commands::Peers { duration } => {
            list_peers(Duration::from_secs(duration), &config).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Asks the user to compare auth codes
struct TerminalConfirmer;

#[async_trait]
impl PinConfirmer for TerminalConfirmer {
    async fn confirm(&self, peer: &PeerIdentity, code: &AuthCode) -> bool {
        println!(
            "Auth code for {} ({}): {}",
            peer.device_name,
            peer.endpoint_id,
            style(code).cyan().bold()
        );
        ask("Does it match the code on the other device?").await
    }
}

/// Yes/no prompt on the terminal. Anything but "y" or "yes" is a no.
async fn ask(question: &str) -> bool {
    let question = format!("{question} [y/N] ");
    let answer = tokio::task::spawn_blocking(move || {
        let term = Term::stdout();
        term.write_str(&question).ok()?;
        term.read_line().ok()
    })
    .await;

    match answer {
        Ok(Some(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
        _ => false,
    }
}

async fn bind(node_config: quickshare_core::NodeConfig) -> anyhow::Result<SessionManager> {
    let pin = matches!(node_config.trust, quickshare_crypto::Trust::Pin);
    let manager = if pin {
        SessionManager::bind_with_confirmer(node_config, Arc::new(TerminalConfirmer)).await?
    } else {
        SessionManager::bind(node_config).await?
    };
    Ok(manager)
}

/// Send files to a nearby device
async fn send_files(
    files: Vec<PathBuf>,
    to: Option<String>,
    timeout: Duration,
    config: &Config,
) -> anyhow::Result<()> {
    let mut total = 0;
    for file in &files {
        let meta = std::fs::metadata(file).with_context(|| format!("File not found: {}", file.display()))?;
        if !meta.is_file() {
            anyhow::bail!("Not a regular file: {}", file.display());
        }
        total += meta.len();
    }

    // The sender does not need the well-known port
    let mut node_config = config.node_config()?;
    node_config.listen_addr.set_port(0);
    let manager = bind(node_config).await?;

    println!(
        "Looking for {} ({} to wait)...",
        to.as_deref().unwrap_or("a nearby device"),
        format_duration(timeout)
    );
    let discovery = Discovery::multicast(config.discovery_config()?)?;
    let endpoint = find_endpoint(&discovery, to.as_deref(), timeout).await?;
    drop(discovery);

    println!(
        "Sending {} file(s), {}, to {} ({})",
        files.len(),
        format_bytes(total),
        style(&endpoint.name).bold(),
        endpoint.addr
    );
    tracing::info!("Sending {} file(s) to {}", files.len(), endpoint.id);

    let session = start_session(&manager, &endpoint, files).await?;
    println!("Auth code: {}", style(session.auth_code()).cyan().bold());
    println!("Waiting for {} to accept...", endpoint.name);

    let state = tokio::select! {
        state = follow_session(&session, total, false) => state,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            session.wait().await
        }
    };

    match state {
        TransferState::Completed => Ok(()),
        other => anyhow::bail!("Transfer ended: {}", other),
    }
}

/// Attempts at reaching the receiver before giving up
const SEND_ATTEMPTS: u32 = 3;

async fn start_session(
    manager: &SessionManager,
    endpoint: &Endpoint,
    files: Vec<PathBuf>,
) -> anyhow::Result<SessionHandle> {
    let mut attempt = 1;
    loop {
        match manager.send_files(endpoint, files.clone()).await {
            Ok(session) => return Ok(session),
            Err(e) => match retry_delay(&e, attempt) {
                Some(delay) => {
                    tracing::warn!("Attempt {} to reach {} failed: {}", attempt, endpoint.name, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    let hint = failure_hint(&e, attempt);
                    return Err(anyhow::Error::new(e)).with_context(|| {
                        format!("Could not start a session with {} ({})", endpoint.name, hint)
                    });
                }
            },
        }
    }
}

/// Backoff before the next attempt, or `None` to give up
fn retry_delay(err: &NodeError, attempt: u32) -> Option<Duration> {
    (err.should_retry() && attempt < SEND_ATTEMPTS)
        .then(|| Duration::from_millis(500 * u64::from(attempt)))
}

fn failure_hint(err: &NodeError, attempts: u32) -> String {
    if attempts > 1 {
        format!("gave up after {attempts} attempts")
    } else if err.is_transient() {
        "the device may be busy, try again shortly".to_string()
    } else if err.is_permanent() {
        "retrying will not help".to_string()
    } else {
        "not retried".to_string()
    }
}

async fn find_endpoint(
    discovery: &Discovery,
    target: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<Endpoint> {
    let mut events = discovery.browse()?;
    tokio::time::timeout(timeout, next_match(&mut events, target))
        .await
        .map_err(|_| anyhow::anyhow!("No matching device found within {}", format_duration(timeout)))?
}

async fn next_match(events: &mut BrowseStream, target: Option<&str>) -> anyhow::Result<Endpoint> {
    while let Some(event) = events.next().await {
        if let DiscoveryEvent::Found(endpoint) = event? {
            tracing::debug!("Found {} ({})", endpoint.name, endpoint.id);
            let wanted = match target {
                Some(t) => endpoint.name == t || endpoint.id.as_str() == t,
                None => true,
            };
            if wanted {
                return Ok(endpoint);
            }
        }
    }
    anyhow::bail!("Discovery stopped")
}

/// List nearby devices
async fn list_peers(duration: Duration, config: &Config) -> anyhow::Result<()> {
    let discovery = Discovery::multicast(config.discovery_config()?)?;
    let mut events = discovery.browse()?;
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    println!("Watching for {}...", format_duration(duration));
    let mut seen = 0usize;
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(DiscoveryEvent::Found(endpoint))) => {
                    seen += 1;
                    println!(
                        "{} {} ({}) at {}",
                        style("+").green().bold(),
                        style(&endpoint.name).bold(),
                        endpoint.id,
                        endpoint.addr
                    );
                }
                Some(Ok(DiscoveryEvent::Lost(id))) => {
                    println!("{} {}", style("-").red().bold(), id);
                }
                Some(Err(e)) => return Err(e).context("Discovery failed"),
                None => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if seen == 0 {
        println!("No devices found");
    }
    Ok(())
}

/// Receive files from nearby devices
async fn receive_files(
    output: Option<PathBuf>,
    auto_accept: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut node_config = config.node_config()?;
    if let Some(dir) = output {
        node_config.transfer.download_dir = dir;
    }
    node_config.transfer.auto_accept |= auto_accept;

    let download_dir = node_config.transfer.download_dir.clone();
    std::fs::create_dir_all(&download_dir)
        .with_context(|| format!("Cannot create {}", download_dir.display()))?;

    let auto_accept = node_config.transfer.auto_accept;
    let manager = bind(node_config).await?;
    let discovery = Discovery::multicast(config.discovery_config()?)?;
    let info = manager.endpoint_info();
    discovery.start_advertising(info.clone()).await?;

    println!(
        "Visible as {} ({}) on port {}",
        style(&info.name).bold(),
        info.id,
        info.port
    );
    println!("Saving to {}", download_dir.display());
    println!("Press Ctrl+C to stop");

    loop {
        let session = tokio::select! {
            incoming = manager.accept_incoming() => incoming,
            failure = discovery.advertising_failed() => {
                return Err(anyhow::Error::new(failure)).context("No longer visible to nearby devices");
            }
            _ = tokio::signal::ctrl_c() => break,
        };
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Incoming session failed: {}", e);
                continue;
            }
        };

        println!(
            "\n{} ({}) connected, auth code {}",
            style(&session.peer().device_name).bold(),
            session.peer().endpoint_id,
            style(session.auth_code()).cyan().bold()
        );

        tokio::select! {
            state = follow_session(&session, 0, auto_accept) => {
                tracing::info!("Session {} ended: {}", session.id(), state);
            }
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
                session.wait().await;
                break;
            }
        }
    }

    println!("\nShutting down...");
    discovery.stop_advertising().await;
    Ok(())
}

/// Drive one session's events to the terminal until it ends.
///
/// With `auto_accept` the receiver has already consented, so offers are
/// only printed.
async fn follow_session(session: &SessionHandle, total: u64, auto_accept: bool) -> TransferState {
    let mut events = session.subscribe();
    let mut display: Option<ProgressDisplay> = None;
    let mut bytes_total = total;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::ManifestOffered(items) => {
                bytes_total = items.iter().map(|item| item.size).sum();
                print_manifest(&items);
                if auto_accept {
                    continue;
                }
                let decision = if ask("Accept?").await {
                    session.accept()
                } else {
                    session.reject()
                };
                if let Err(e) = decision {
                    tracing::debug!("Decision not delivered: {}", e);
                }
            }
            SessionEvent::StateChanged(TransferState::Transferring) => {
                display = Some(ProgressDisplay::new(bytes_total, "Transferring"));
            }
            SessionEvent::ProgressUpdate(progress) => {
                if let Some(display) = &display {
                    display.update(&progress);
                }
            }
            SessionEvent::Error(kind, message) => {
                tracing::warn!("Session {} error ({}): {}", session.id(), kind, message);
            }
            SessionEvent::StateChanged(state) if state.is_terminal() => {
                report(display.as_ref(), state, bytes_total);
                return state;
            }
            SessionEvent::StateChanged(_) => {}
        }
    }

    session.state()
}

fn print_manifest(items: &[ManifestEntry]) {
    println!("Offered {} file(s):", items.len());
    for item in items {
        println!("  {} ({})", item.name, format_bytes(item.size));
    }
}

fn report(display: Option<&ProgressDisplay>, state: TransferState, bytes: u64) {
    let line = match state {
        TransferState::Completed => {
            let elapsed = display.map(ProgressDisplay::elapsed).unwrap_or_default();
            format!("{} {}", style("Completed").green().bold(), summary(bytes, elapsed))
        }
        TransferState::Cancelled => style("Cancelled").yellow().bold().to_string(),
        other => format!("{}", style(other).red().bold()),
    };

    match display {
        Some(display) if state == TransferState::Completed => display.finish_with_message(line),
        Some(display) => display.abandon(line),
        None => println!("{line}"),
    }
}
