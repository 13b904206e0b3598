//! Transfer progress reporting
//!
//! Snapshots carried by [`SessionEvent::ProgressUpdate`](crate::node::SessionEvent),
//! with speed and ETA derived from bytes moved since the transfer started.

use std::time::Duration;

/// Snapshot of a transfer's progress
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Bytes delivered so far
    pub bytes_done: u64,

    /// Declared bytes across all items
    pub bytes_total: u64,

    /// Items fully delivered
    pub items_done: usize,

    /// Items in the manifest
    pub items_total: usize,

    /// Average speed in bytes/second
    pub speed: f64,

    /// Estimated time remaining
    pub eta: Option<Duration>,
}

impl TransferProgress {
    /// Create a snapshot, deriving the ETA from `speed`
    #[must_use]
    pub fn new(
        bytes_done: u64,
        bytes_total: u64,
        items_done: usize,
        items_total: usize,
        speed: f64,
    ) -> Self {
        let eta = if speed > 0.0 && bytes_done < bytes_total {
            let remaining = (bytes_total - bytes_done) as f64;
            Some(Duration::from_secs_f64(remaining / speed))
        } else {
            None
        };

        Self {
            bytes_done,
            bytes_total,
            items_done,
            items_total,
            speed,
            eta,
        }
    }

    /// Progress percentage (0.0 to 100.0)
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return if self.is_complete() { 100.0 } else { 0.0 };
        }
        (self.bytes_done as f64 / self.bytes_total as f64) * 100.0
    }

    /// Check if every item was delivered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.items_done == self.items_total && self.bytes_done >= self.bytes_total
    }

    /// Get human-readable ETA string
    pub fn eta_string(&self) -> String {
        match self.eta {
            Some(duration) => {
                let seconds = duration.as_secs();
                if seconds < 60 {
                    format!("{seconds}s")
                } else if seconds < 3600 {
                    format!("{}m {}s", seconds / 60, seconds % 60)
                } else {
                    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
                }
            }
            None if self.is_complete() => "Complete".to_string(),
            None => "Calculating...".to_string(),
        }
    }

    /// Get human-readable speed string
    pub fn speed_string(&self) -> String {
        const KIB: f64 = 1024.0;
        if self.speed < KIB {
            format!("{:.2} B/s", self.speed)
        } else if self.speed < KIB * KIB {
            format!("{:.2} KiB/s", self.speed / KIB)
        } else if self.speed < KIB * KIB * KIB {
            format!("{:.2} MiB/s", self.speed / (KIB * KIB))
        } else {
            format!("{:.2} GiB/s", self.speed / (KIB * KIB * KIB))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_new() {
        let progress = TransferProgress::new(500, 1000, 0, 2, 100.0);

        assert_eq!(progress.bytes_done, 500);
        assert_eq!(progress.items_total, 2);
        assert_eq!(progress.percent(), 50.0);
        // (1000 - 500) / 100 = 5 seconds
        assert_eq!(progress.eta.unwrap().as_secs(), 5);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_complete() {
        let progress = TransferProgress::new(1000, 1000, 2, 2, 100.0);

        assert!(progress.is_complete());
        assert_eq!(progress.percent(), 100.0);
        assert!(progress.eta.is_none());
        assert_eq!(progress.eta_string(), "Complete");
    }

    #[test]
    fn test_empty_transfer_percent() {
        assert_eq!(TransferProgress::new(0, 0, 1, 1, 0.0).percent(), 100.0);
        assert_eq!(TransferProgress::new(0, 0, 0, 1, 0.0).percent(), 0.0);
    }

    #[test]
    fn test_eta_string() {
        let mut progress = TransferProgress::new(0, 1000, 0, 1, 0.0);
        assert_eq!(progress.eta_string(), "Calculating...");

        progress.eta = Some(Duration::from_secs(45));
        assert_eq!(progress.eta_string(), "45s");

        progress.eta = Some(Duration::from_secs(125));
        assert_eq!(progress.eta_string(), "2m 5s");

        progress.eta = Some(Duration::from_secs(3725));
        assert_eq!(progress.eta_string(), "1h 2m");
    }

    #[test]
    fn test_speed_string() {
        let at = |speed| TransferProgress::new(0, 1, 0, 1, speed).speed_string();
        assert_eq!(at(512.0), "512.00 B/s");
        assert_eq!(at(2048.0), "2.00 KiB/s");
        assert_eq!(at(3.0 * 1024.0 * 1024.0), "3.00 MiB/s");
    }
}
