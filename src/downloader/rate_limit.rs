//! Byte-throughput rate limiting and per-chunk pacing
//!
//! Bounds download throughput to a configured bytes-per-second ceiling and
//! optionally enforces a minimum delay between chunk writes.

use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::downloader::config::DEFAULT_CHUNK_SIZE;
use crate::downloader::options::RateLimitConfig;

/// Paces chunk writes so that sustained throughput stays under
/// `max_bytes_per_second` and consecutive chunks are spaced at least
/// `min_chunk_delay_ms` apart.
///
/// The limiter is owned by a single transfer; it is not shared across
/// concurrent downloads.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    last_call: Option<Instant>,
}

impl RateLimiter {
    /// Create a rate limiter from a config.
    ///
    /// A config with neither `max_bytes_per_second` nor
    /// `min_chunk_delay_ms` produces a limiter whose [`throttle`] is a
    /// no-op.
    ///
    /// [`throttle`]: RateLimiter::throttle
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last_call: None,
        }
    }

    /// Whether any pacing is configured at all
    pub fn is_limited(&self) -> bool {
        self.config.max_bytes_per_second.is_some() || self.config.min_chunk_delay_ms.is_some()
    }

    /// Chunk size writes should be sized to: configured value or 64 KiB
    pub fn optimal_chunk_size(&self) -> usize {
        self.config.chunk_size_bytes.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Configured throughput ceiling, if any
    pub fn max_bytes_per_second(&self) -> Option<u64> {
        self.config.max_bytes_per_second
    }

    /// Suspend the caller long enough to keep throughput within limits.
    ///
    /// The delay is the larger of:
    /// - the time needed so `chunk_bytes` does not push throughput over
    ///   `max_bytes_per_second`: `chunk_bytes / max_bps * 1000 - elapsed_ms`
    /// - the remaining minimum chunk spacing: `min_chunk_delay_ms - elapsed_ms`
    ///
    /// The first call after construction never delays, a zero-byte chunk
    /// never delays, and an unconfigured limiter returns immediately. The
    /// last-call timestamp is re-anchored to the time throttling completed,
    /// not the time it was requested, so repeated calls do not accumulate
    /// drift.
    pub async fn throttle(&mut self, chunk_bytes: u64) {
        if !self.is_limited() || chunk_bytes == 0 {
            return;
        }

        let now = Instant::now();
        let last = match self.last_call {
            Some(last) => last,
            None => {
                // No prior timestamp to compare against.
                self.last_call = Some(now);
                return;
            }
        };

        let elapsed_ms = now.duration_since(last).as_secs_f64() * 1000.0;
        let mut delay_ms: f64 = 0.0;

        if let Some(max_bps) = self.config.max_bytes_per_second {
            if max_bps > 0 {
                let budget_ms = chunk_bytes as f64 / max_bps as f64 * 1000.0;
                delay_ms = delay_ms.max(budget_ms - elapsed_ms);
            }
        }

        if let Some(min_delay) = self.config.min_chunk_delay_ms {
            delay_ms = delay_ms.max(min_delay as f64 - elapsed_ms);
        }

        if delay_ms > 0.0 {
            sleep(Duration::from_secs_f64(delay_ms / 1000.0)).await;
        }

        self.last_call = Some(Instant::now());
    }
}
