//! # Model Artifact Cache Library
//!
//! A library for acquiring large binary model artifacts from remote URLs,
//! verifying their integrity, and maintaining a local on-disk cache so
//! repeated requests avoid redundant downloads.
//!
//! ## Features
//!
//! - **Bandwidth-Aware Downloads**: Byte-throughput rate limiting and
//!   per-chunk pacing
//! - **Retry and Resume**: Exponential backoff on transient failures and
//!   byte-range resume of interrupted transfers
//! - **Proxy Routing**: Optional HTTP/HTTPS proxy with basic auth
//! - **Content-Keyed Cache**: `(name, version)` keyed on-disk store with an
//!   explicit validity state machine and metadata tracking
//! - **Cleanup Policy**: Age-based, size-based, and corruption-based eviction
//! - **Pluggable Verification**: Integrity checking behind a trait boundary
//!
//! ## Quick Start
//!
//! ```no_run
//! use model_artifact_cache::{ArtifactConfig, ArtifactFormat};
//! use model_artifact_cache::cache::{CacheOptions, ModelCache};
//! use model_artifact_cache::downloader::{ArtifactDownloader, DownloadOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ArtifactConfig::new(
//!     "all-minilm-l6-v2",
//!     "1.0.0",
//!     "https://example.com/models/all-minilm-l6-v2.onnx",
//!     "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
//!     90_000_000,
//!     ArtifactFormat::Onnx,
//! );
//!
//! let cache = ModelCache::new(CacheOptions::new("./model-cache"));
//! cache.initialize().await?;
//!
//! // Check the cache first; download and store on a miss.
//! let lookup = cache.check_cache(&config).await;
//! if !lookup.hit() {
//!     let downloader = ArtifactDownloader::new();
//!     let started = std::time::Instant::now();
//!     let file = downloader
//!         .download(&config, "./downloads".as_ref(), &DownloadOptions::default())
//!         .await?;
//!     cache.store_with_duration(&config, &file, started.elapsed()).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several core modules:
//!
//! - [`downloader`] - Download execution with rate limiting, proxying,
//!   retry, and resume
//! - [`cache`] - On-disk cache with validity state machine and cleanup
//! - [`verify`] - Integrity verification trait boundary
//!
//! ## Cache Validity
//!
//! Every cache entry is in exactly one of five states, ordered by
//! trustworthiness: `Missing`, `Invalid`, `Outdated`, `Corrupted`, `Valid`.
//! Only `Valid` entries count as cache hits; every other state carries a
//! concrete reason so callers never silently receive a stale or corrupt
//! file.

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// On-disk cache with validity state machine and cleanup policy
pub mod cache;

/// Download execution with rate limiting, retry, and resume
pub mod downloader;

/// Integrity verification trait boundary
pub mod verify;

// Re-export commonly used types
pub use cache::{CacheLookup, CacheOptions, CacheStatus, ModelCache};
pub use downloader::{ArtifactDownloader, DownloadError, DownloadOptions};
pub use verify::{Sha256Verifier, Verifier, VerifyReport};

/// Serialized binary format of a model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactFormat {
    /// ONNX graph
    #[serde(rename = "onnx")]
    Onnx,
    /// PyTorch checkpoint
    #[serde(rename = "pytorch")]
    Pytorch,
    /// TensorFlow saved model
    #[serde(rename = "tensorflow")]
    Tensorflow,
    /// JSON document (tokenizer vocabularies, small configs)
    #[serde(rename = "json")]
    Json,
}

impl ArtifactFormat {
    /// File extension used for cached artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Onnx => "onnx",
            ArtifactFormat::Pytorch => "pytorch",
            ArtifactFormat::Tensorflow => "tensorflow",
            ArtifactFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onnx" => Ok(ArtifactFormat::Onnx),
            "pytorch" => Ok(ArtifactFormat::Pytorch),
            "tensorflow" => Ok(ArtifactFormat::Tensorflow),
            "json" => Ok(ArtifactFormat::Json),
            _ => Err(format!("Invalid artifact format: {s}")),
        }
    }
}

/// Tokenizer companion artifact referenced by a model config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenizerConfig {
    /// Remote URL of the tokenizer artifact
    pub url: String,
    /// Expected hex checksum, if published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Serialized format of the tokenizer artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ArtifactFormat>,
}

/// Platform and memory requirements published alongside an artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ArtifactRequirements {
    /// Platforms the artifact is built for (e.g., "linux-x64")
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Minimum memory needed to load the artifact, in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_memory_bytes: Option<u64>,
}

/// Immutable description of a remote model artifact, supplied by the
/// caller or an artifact registry. Identity key is `(name, version)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactConfig {
    /// Artifact name (e.g., "all-minilm-l6-v2")
    pub name: String,
    /// Semver-like version string (e.g., "1.0.0")
    pub version: String,
    /// Remote URL the artifact is downloaded from
    pub url: String,
    /// Expected hex digest of the artifact bytes (SHA-256)
    pub checksum: String,
    /// Expected artifact size in bytes
    pub size: u64,
    /// Serialized format
    pub format: ArtifactFormat,
    /// Embedding dimensions, for embedding models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    /// Companion tokenizer artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<TokenizerConfig>,
    /// Platform/memory requirements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<ArtifactRequirements>,
}

impl ArtifactConfig {
    /// Create a config with the required fields; optional fields default to
    /// `None`.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        url: impl Into<String>,
        checksum: impl Into<String>,
        size: u64,
        format: ArtifactFormat,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            url: url.into(),
            checksum: checksum.into(),
            size,
            format,
            dimensions: None,
            tokenizer: None,
            requirements: None,
        }
    }

    /// Cache key uniquely identifying this artifact: `{name}-{version}`
    pub fn cache_key(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// File name the artifact is cached under: `{name}-{version}.{format}`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.cache_key(), self.format.extension())
    }

    /// Validate config integrity before any I/O is attempted
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Artifact name cannot be empty".to_string());
        }

        if self.version.is_empty() {
            return Err("Artifact version cannot be empty".to_string());
        }

        if self.url.is_empty() {
            return Err("Artifact URL cannot be empty".to_string());
        }

        if self.checksum.len() != 64 || !self.checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "Checksum must be a 64-character hex digest, got {:?}",
                self.checksum
            ));
        }

        if self.size == 0 {
            return Err("Artifact size must be positive".to_string());
        }

        // Cache keys become file names; path separators would escape the
        // cache directory.
        if self.name.contains(['/', '\\']) || self.version.contains(['/', '\\']) {
            return Err("Artifact name and version cannot contain path separators".to_string());
        }

        Ok(())
    }
}
