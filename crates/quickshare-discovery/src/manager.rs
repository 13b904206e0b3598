//! Advertising and browsing on top of a [`DiscoveryBackend`].

use crate::backend::{Announcement, DiscoveryBackend, Sighting};
use crate::multicast::MulticastBackend;
use crate::record::ServiceRecord;
use crate::tracker::EndpointTracker;
use crate::{DiscoveryError, DiscoveryEvent, EndpointId, EndpointInfo};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::Stream;

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How often the local endpoint is re-announced
    pub announce_interval: Duration,
    /// Silence after which an endpoint is reported lost
    pub endpoint_timeout: Duration,
    /// How often browsers look for silent endpoints
    pub expiry_check_interval: Duration,
    /// Multicast group and port
    pub multicast_group: SocketAddrV4,
    /// Local interface used to join the group
    pub interface: Ipv4Addr,
    /// Multicast TTL
    pub multicast_ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_interval: Duration::from_secs(2),
            endpoint_timeout: Duration::from_secs(10),
            expiry_check_interval: Duration::from_secs(1),
            multicast_group: SocketAddrV4::new(Ipv4Addr::new(239, 255, 42, 99), 53171),
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_ttl: 1,
        }
    }
}

struct Advertiser {
    info: EndpointInfo,
    record: ServiceRecord,
    task: JoinHandle<()>,
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Failure = Option<Arc<DiscoveryError>>;

/// Advertises the local endpoint and browses for others.
///
/// Browse streams end when the `Discovery` they came from is dropped.
/// Advertising survives send errors and ends on its own only when the
/// backend closes; [`advertising_failed`](Self::advertising_failed) reports
/// that.
pub struct Discovery {
    backend: Arc<dyn DiscoveryBackend>,
    config: DiscoveryConfig,
    advertiser: Mutex<Option<Advertiser>>,
    local_id: watch::Sender<Option<EndpointId>>,
    failure: Arc<watch::Sender<Failure>>,
}

impl Discovery {
    /// Create discovery over any backend.
    #[must_use]
    pub fn new(backend: Arc<dyn DiscoveryBackend>, config: DiscoveryConfig) -> Self {
        let (local_id, _) = watch::channel(None);
        let (failure, _) = watch::channel(None);
        Self {
            backend,
            config,
            advertiser: Mutex::new(None),
            local_id,
            failure: Arc::new(failure),
        }
    }

    /// Create discovery over UDP multicast.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Socket`] if the multicast socket cannot be
    /// set up.
    pub fn multicast(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let backend = MulticastBackend::bind(&config)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Start announcing `info`.
    ///
    /// Calling again with the same info is a no-op. Different info replaces
    /// the current advertisement.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be built or the first
    /// announcement cannot be sent.
    pub async fn start_advertising(&self, info: EndpointInfo) -> Result<(), DiscoveryError> {
        let mut current = self.advertiser.lock().await;
        if current
            .as_ref()
            .is_some_and(|adv| adv.info == info && !adv.task.is_finished())
        {
            return Ok(());
        }

        let record = ServiceRecord::from_info(&info)?;
        let hello = Announcement::hello(record.clone());
        let previous_id = self.local_id.send_replace(Some(info.id.clone()));
        if let Err(e) = self.backend.announce(&hello).await {
            self.local_id.send_replace(previous_id);
            return Err(e);
        }

        if let Some(previous) = current.take() {
            if previous.info.id != info.id {
                self.say_goodbye(&previous.record).await;
            }
        }

        self.failure.send_replace(None);
        let task = tokio::spawn(announce_loop(
            Arc::clone(&self.backend),
            hello,
            self.config.announce_interval,
            Arc::clone(&self.failure),
        ));
        tracing::info!("Advertising {} as {:?} on port {}", info.id, info.name, info.port);
        *current = Some(Advertiser { info, record, task });
        Ok(())
    }

    /// Stop announcing and tell peers we are gone.
    ///
    /// Does nothing when not advertising.
    pub async fn stop_advertising(&self) {
        let Some(advertiser) = self.advertiser.lock().await.take() else {
            return;
        };
        advertiser.task.abort();
        self.say_goodbye(&advertiser.record).await;
        self.local_id.send_replace(None);
        tracing::info!("Stopped advertising {}", advertiser.info.id);
    }

    /// What is currently advertised, if anything
    pub async fn advertising(&self) -> Option<EndpointInfo> {
        let mut current = self.advertiser.lock().await;
        if current.as_ref().is_some_and(|adv| adv.task.is_finished()) {
            *current = None;
        }
        current.as_ref().map(|adv| adv.info.clone())
    }

    /// Resolves once advertising has stopped because the backend closed.
    ///
    /// Pending while advertising is healthy or was never started. Returns
    /// at once if the most recent advertisement already failed.
    pub async fn advertising_failed(&self) -> Arc<DiscoveryError> {
        let mut failure = self.failure.subscribe();
        loop {
            if let Some(err) = failure.borrow_and_update().clone() {
                return err;
            }
            if failure.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    async fn say_goodbye(&self, record: &ServiceRecord) {
        if let Err(e) = self
            .backend
            .announce(&Announcement::goodbye(record.clone()))
            .await
        {
            tracing::warn!("Failed to send goodbye: {}", e);
        }
    }

    /// Browse for endpoints.
    ///
    /// Each call starts an independent browse with its own view of the
    /// network, so a dropped stream can be replaced by calling again. The
    /// local endpoint is never reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend can no longer receive.
    pub fn browse(&self) -> Result<BrowseStream, DiscoveryError> {
        let sightings = self.backend.subscribe()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut tracker = EndpointTracker::new(self.config.endpoint_timeout);
        let mut local_id = self.local_id.subscribe();
        tracker.ignore(local_id.borrow_and_update().clone());

        let task = tokio::spawn(browse_loop(
            sightings,
            tracker,
            local_id,
            self.config.expiry_check_interval,
            tx,
        ));
        Ok(BrowseStream { rx, task })
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn announce_loop(
    backend: Arc<dyn DiscoveryBackend>,
    hello: Announcement,
    period: Duration,
    failure: Arc<watch::Sender<Failure>>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failing = false;
    loop {
        ticker.tick().await;
        match backend.announce(&hello).await {
            Ok(()) => {
                if failing {
                    tracing::info!("Announcements resumed");
                    failing = false;
                }
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("Advertising stopped: {}", e);
                failure.send_replace(Some(Arc::new(e)));
                return;
            }
            Err(e) => {
                if failing {
                    tracing::debug!("Announcement failed again: {}", e);
                } else {
                    tracing::warn!("Announcement failed, retrying: {}", e);
                    failing = true;
                }
            }
        }
    }
}

type EventSender = mpsc::UnboundedSender<Result<DiscoveryEvent, DiscoveryError>>;

async fn browse_loop(
    mut sightings: broadcast::Receiver<Sighting>,
    mut tracker: EndpointTracker,
    mut local_id: watch::Receiver<Option<EndpointId>>,
    expiry_check: Duration,
    tx: EventSender,
) {
    let mut ticker = tokio::time::interval(expiry_check);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let events = tokio::select! {
            () = tx.closed() => return,
            received = sightings.recv() => match received {
                Ok(sighting) => {
                    if local_id.has_changed().unwrap_or(false) {
                        tracker.ignore(local_id.borrow_and_update().clone());
                    }
                    apply_sighting(&mut tracker, sighting).into_iter().collect()
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Browser lagged, skipped {} announcements", skipped);
                    Vec::new()
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = tx.send(Err(DiscoveryError::Closed));
                    return;
                }
            },
            _ = ticker.tick() => tracker.expire(Instant::now()),
            changed = local_id.changed() => {
                if changed.is_err() {
                    return;
                }
                tracker.ignore(local_id.borrow_and_update().clone());
                Vec::new()
            }
        };

        for event in events {
            if tx.send(Ok(event)).is_err() {
                return;
            }
        }
    }
}

fn apply_sighting(tracker: &mut EndpointTracker, sighting: Sighting) -> Option<DiscoveryEvent> {
    if sighting.goodbye {
        let id = sighting.record.endpoint_id().ok()?;
        return tracker.remove(&id);
    }
    match sighting.record.to_endpoint(sighting.source) {
        Ok(endpoint) => tracker.observe(endpoint, Instant::now()),
        Err(e) => {
            tracing::debug!("Ignoring record from {}: {}", sighting.source, e);
            None
        }
    }
}

/// Live stream of [`DiscoveryEvent`]s from one browse.
///
/// Yields `Err` once if the backend fails, then ends.
#[derive(Debug)]
pub struct BrowseStream {
    rx: mpsc::UnboundedReceiver<Result<DiscoveryEvent, DiscoveryError>>,
    task: JoinHandle<()>,
}

impl Stream for BrowseStream {
    type Item = Result<DiscoveryEvent, DiscoveryError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for BrowseStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
