//! Download orchestration and rate limiting
//!
//! This module provides the core download execution engine with
//! comprehensive error handling, retry logic, resume support, and rate
//! limiting capabilities.
//!
//! # Overview
//!
//! The downloader produces a verified local file for a given
//! [`crate::ArtifactConfig`]:
//!
//! 1. **Options**: Describe transport behavior with [`options::DownloadOptions`]
//! 2. **Execution**: Fetch the artifact using [`executor::ArtifactDownloader`]
//! 3. **Rate Limiting**: Byte pacing via [`rate_limit::RateLimiter`]
//! 4. **Progress Tracking**: Percent/speed/ETA via [`progress::DownloadProgress`]
//! 5. **Verification**: Finished files are handed to a [`crate::verify::Verifier`]
//!
//! # Quick Start
//!
//! ```no_run
//! use model_artifact_cache::{ArtifactConfig, ArtifactFormat};
//! use model_artifact_cache::downloader::{ArtifactDownloader, DownloadOptions, RateLimitConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ArtifactConfig::new(
//!     "test-model",
//!     "1.0.0",
//!     "https://example.com/test-model.onnx",
//!     "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
//!     1_024_000,
//!     ArtifactFormat::Onnx,
//! );
//!
//! let options = DownloadOptions::default()
//!     .with_resume(true)
//!     .with_rate_limit(RateLimitConfig {
//!         max_bytes_per_second: Some(1_048_576),
//!         ..Default::default()
//!     });
//!
//! let downloader = ArtifactDownloader::new();
//! let path = downloader.download(&config, "./downloads".as_ref(), &options).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! All operations return `Result<T, DownloadError>`. Errors are categorized
//! by type:
//! - Network errors and 5xx/429 responses (retried automatically with backoff)
//! - Other 4xx responses (failed immediately)
//! - Timeouts (partial file kept or deleted per the resume policy)
//! - Integrity failures (never retried; surfaced to the caller)

pub mod config;
pub mod executor;
pub mod options;
pub mod progress;
pub mod rate_limit;

pub use executor::ArtifactDownloader;
pub use options::{DownloadOptions, ProxyAuth, ProxyConfig, ProxyProtocol, RateLimitConfig};
pub use progress::DownloadProgress;
pub use rate_limit::RateLimiter;

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Malformed artifact config, rejected before any I/O
    #[error("invalid artifact config: {0}")]
    InvalidConfig(String),

    /// Transient network error (connect failure, reset, DNS)
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("HTTP status error {status}: {body}")]
    HttpStatus {
        /// Response status code
        status: u16,
        /// Response body text, if readable
        body: String,
    },

    /// End-to-end timeout budget exhausted
    #[error("download timed out after {elapsed_ms} ms")]
    Timeout {
        /// Milliseconds elapsed when the operation was aborted
        elapsed_ms: u64,
    },

    /// All retries exhausted on transient failures
    #[error("max retries ({attempts}) exceeded: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Last underlying error message
        last: String,
    },

    /// Verifier rejected the downloaded file
    #[error("integrity verification failed: {}", .0.join("; "))]
    Integrity(Vec<String>),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),
}

impl DownloadError {
    /// Whether this error class is worth retrying.
    ///
    /// Network errors and 5xx/429 responses are transient; everything else
    /// (other 4xx, integrity, IO, config) fails immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
