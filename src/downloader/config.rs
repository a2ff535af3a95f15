//! Download configuration constants

use std::time::Duration;

/// Default maximum number of retries for failed downloads.
/// 3 retries with exponential backoff allows recovery from transient network
/// issues while avoiding long stalls on persistent failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default end-to-end timeout for a single download operation.
/// Large artifacts over slow links need generous budgets; callers with
/// tighter SLAs override this per download.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Initial backoff delay in milliseconds.
/// 1 second is long enough for rate limit windows to reset but short enough
/// to not overly delay recovery from transient errors.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
/// 30 seconds caps exponential backoff to prevent excessive wait times.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Default streaming chunk size (64 KiB) when no rate limit config
/// overrides it.
pub const DEFAULT_CHUNK_SIZE: usize = 65_536;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS * 2u64.pow(retry_count.min(10));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}
