//! Per-browse view of which endpoints are present.

use crate::{DiscoveryEvent, Endpoint, EndpointId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks live endpoints and turns sightings into events.
///
/// `Found` is emitted when an endpoint is first seen or its details change.
/// `Lost` is emitted once per disappearance, either on goodbye or after
/// `timeout` without an announcement.
#[derive(Debug)]
pub struct EndpointTracker {
    timeout: Duration,
    entries: HashMap<EndpointId, Entry>,
    ignore: Option<EndpointId>,
}

#[derive(Debug)]
struct Entry {
    endpoint: Endpoint,
    last_seen: Instant,
}

impl EndpointTracker {
    /// Create a tracker expiring endpoints after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: HashMap::new(),
            ignore: None,
        }
    }

    /// Never report this endpoint (our own announcements).
    pub fn ignore(&mut self, id: Option<EndpointId>) {
        if let Some(id) = &id {
            self.entries.remove(id);
        }
        self.ignore = id;
    }

    /// Record a sighting at `now`.
    pub fn observe(&mut self, endpoint: Endpoint, now: Instant) -> Option<DiscoveryEvent> {
        if self.ignore.as_ref() == Some(&endpoint.id) {
            return None;
        }

        match self.entries.get_mut(&endpoint.id) {
            Some(entry) if entry.endpoint == endpoint => {
                entry.last_seen = now;
                None
            }
            Some(entry) => {
                entry.endpoint = endpoint.clone();
                entry.last_seen = now;
                Some(DiscoveryEvent::Found(endpoint))
            }
            None => {
                self.entries.insert(
                    endpoint.id.clone(),
                    Entry {
                        endpoint: endpoint.clone(),
                        last_seen: now,
                    },
                );
                Some(DiscoveryEvent::Found(endpoint))
            }
        }
    }

    /// Forget an endpoint that said goodbye.
    pub fn remove(&mut self, id: &EndpointId) -> Option<DiscoveryEvent> {
        self.entries
            .remove(id)
            .map(|_| DiscoveryEvent::Lost(id.clone()))
    }

    /// Drop every endpoint silent for longer than the timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let timeout = self.timeout;
        let stale: Vec<EndpointId> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.remove(&id))
            .collect()
    }

    /// Endpoints currently present
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.entries.values().map(|entry| &entry.endpoint)
    }

    /// Number of endpoints currently present
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no endpoints are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
