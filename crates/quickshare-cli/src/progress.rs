//! Transfer progress display with progress bars.

use indicatif::{ProgressBar, ProgressStyle};
use quickshare_core::TransferProgress;
use std::time::Duration;

/// Progress bar for one session
pub struct ProgressDisplay {
    bar: ProgressBar,
    label: String,
}

impl ProgressDisplay {
    /// Create a new progress bar
    #[must_use]
    pub fn new(total_bytes: u64, label: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);

        // The template is a literal; a parse failure falls back to the default bar
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label.to_string());

        Self {
            bar,
            label: label.to_string(),
        }
    }

    /// Update from a session snapshot
    pub fn update(&self, progress: &TransferProgress) {
        if self.bar.length() != Some(progress.bytes_total) {
            self.bar.set_length(progress.bytes_total);
        }
        self.bar.set_position(progress.bytes_done);
        self.bar.set_message(format!(
            "{} ({}/{} files)",
            self.label, progress.items_done, progress.items_total
        ));
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }

    /// Time since the bar was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.bar.elapsed()
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format speed in human-readable format (bytes/sec)
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Summary line for a finished transfer
#[must_use]
pub fn summary(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
    format!(
        "{} in {} ({})",
        format_bytes(bytes),
        format_duration(elapsed),
        format_speed(speed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024.0), "1.00 KB/s");
        assert_eq!(format_speed(1_048_576.0), "1.00 MB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            summary(2 * 1024 * 1024, Duration::from_secs(2)),
            "2.00 MB in 2s (1.00 MB/s)"
        );
        assert_eq!(summary(10, Duration::ZERO), "10.00 B in 0s (0.00 B/s)");
    }

    #[test]
    fn test_display_tracks_snapshot() {
        let display = ProgressDisplay::new(0, "photo.jpg");
        display.update(&TransferProgress::new(512, 1024, 0, 1, 0.0));
        assert_eq!(display.bar.length(), Some(1024));
        assert_eq!(display.bar.position(), 512);
    }
}
