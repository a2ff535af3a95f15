//! Progress tracking for long-running artifact downloads.
//!
//! This module defines the data structures and helpers responsible for
//! calculating percentages, download speed, estimated remaining time, and
//! the human-readable throughput strings that surface in the executor's
//! log lines.

use std::time::{Duration, Instant};

/// Snapshot of download progress handed to progress callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Bytes written so far (including any resumed prefix)
    pub bytes_downloaded: u64,
    /// Total expected bytes, if known
    pub total_bytes: Option<u64>,
    /// Completion percentage (0-100), if the total is known
    pub percent: Option<f64>,
    /// Current transfer rate in bytes per second
    pub bytes_per_sec: f64,
    /// Estimated remaining time, if computable
    pub eta: Option<Duration>,
}

/// Running transfer state that produces [`DownloadProgress`] snapshots
#[derive(Debug, Clone)]
pub struct ProgressState {
    bytes_downloaded: u64,
    total_bytes: Option<u64>,
    started: Instant,
}

impl ProgressState {
    /// Start tracking a transfer.
    ///
    /// `resumed_from` counts bytes already on disk from a prior attempt so
    /// percentages stay truthful; the transfer rate is computed over bytes
    /// moved in this attempt only.
    pub fn new(total_bytes: Option<u64>, resumed_from: u64) -> Self {
        Self {
            bytes_downloaded: resumed_from,
            total_bytes,
            started: Instant::now(),
        }
    }

    /// Record newly written bytes and produce a progress snapshot
    pub fn update(&mut self, new_bytes: u64) -> DownloadProgress {
        self.bytes_downloaded = self.bytes_downloaded.saturating_add(new_bytes);
        self.snapshot()
    }

    /// Current progress snapshot
    pub fn snapshot(&self) -> DownloadProgress {
        let percent = self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_downloaded as f64 / total as f64 * 100.0).min(100.0)
            }
        });

        let elapsed = self.started.elapsed().as_secs_f64();
        let bytes_per_sec = if elapsed > 0.0 {
            self.bytes_downloaded as f64 / elapsed
        } else {
            0.0
        };

        let eta = self.total_bytes.and_then(|total| {
            let remaining = total.saturating_sub(self.bytes_downloaded);
            if remaining == 0 || bytes_per_sec <= 0.0 {
                None
            } else {
                Some(Duration::from_secs_f64(remaining as f64 / bytes_per_sec))
            }
        });

        DownloadProgress {
            bytes_downloaded: self.bytes_downloaded,
            total_bytes: self.total_bytes,
            percent,
            bytes_per_sec,
            eta,
        }
    }

    /// Bytes written so far
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded
    }
}

/// Format a byte rate as `"{value} {KB|MB}/s"` with the unit chosen so the
/// numeral stays in a readable 0.1-999 range.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let kb = bytes_per_sec / 1024.0;
    if kb >= 1000.0 {
        format!("{:.1} MB/s", kb / 1024.0)
    } else {
        format!("{kb:.1} KB/s")
    }
}

/// Human-readable duration: "42s", "3m", "1.5h"
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
