//! Download option structures: retries, timeouts, proxying, rate limits

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::downloader::config::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
use crate::downloader::progress::DownloadProgress;

/// Throughput and pacing limits for a download
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sustained throughput ceiling in bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes_per_second: Option<u64>,
    /// Minimum spacing between chunk writes in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_chunk_delay_ms: Option<u64>,
    /// Streaming chunk size in bytes (default 64 KiB)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size_bytes: Option<usize>,
}

/// Proxy transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyProtocol {
    /// Plain HTTP proxy
    #[serde(rename = "http")]
    Http,
    /// HTTPS proxy
    #[serde(rename = "https")]
    Https,
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
        };
        write!(f, "{s}")
    }
}

/// Basic auth credentials for a proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    /// Proxy username
    pub username: String,
    /// Proxy password
    pub password: String,
}

/// Proxy routing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host name or address
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Transport protocol used to reach the proxy
    pub protocol: ProxyProtocol,
    /// Optional basic auth credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Proxy endpoint URL, without credentials: `{protocol}://{host}:{port}`
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Callback invoked after each chunk write with running progress
pub type ProgressCallback = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Options controlling a single download operation
#[derive(Clone)]
pub struct DownloadOptions {
    /// Maximum retries on transient failures
    pub max_retries: u32,
    /// End-to-end budget for the whole operation, retries included
    pub timeout: Duration,
    /// Continue from an existing partial file instead of restarting
    pub resume_download: bool,
    /// Optional proxy routing
    pub proxy: Option<ProxyConfig>,
    /// Optional throughput limits
    pub rate_limit: Option<RateLimitConfig>,
    /// Optional progress callback
    pub on_progress: Option<ProgressCallback>,
}

impl DownloadOptions {
    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the end-to-end timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable resume of partial downloads
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume_download = resume;
        self
    }

    /// Route the download through a proxy
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Apply throughput limits
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Attach a progress callback
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DownloadProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            resume_download: false,
            proxy: None,
            rate_limit: None,
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("resume_download", &self.resume_download)
            .field("proxy", &self.proxy)
            .field("rate_limit", &self.rate_limit)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}
