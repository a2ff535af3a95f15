//! Cache metadata persistence
//!
//! Two document kinds live on disk: one `CacheMetadata` JSON file per
//! cached artifact (under `metadata/`), and a single `CacheIndex`
//! (`cache-metadata.json`) holding the aggregate stats plus a per-model
//! index. Both are schema-versioned and written atomically
//! (temp file + fsync + rename); the shared index additionally takes an
//! advisory file lock so concurrent processes serialize their
//! read-modify-write cycles.

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::ArtifactConfig;

/// Current metadata schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed metadata file size (10 MB) to prevent memory exhaustion
pub const MAX_METADATA_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Errors related to metadata persistence
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Metadata file too large
    #[error("metadata file too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}

/// Usage counters for a cached artifact
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UsageStats {
    /// How many times the artifact was loaded from the cache
    pub load_count: u64,
    /// Last load time (Unix timestamp in milliseconds)
    pub last_used: i64,
}

/// Per-artifact metadata, written at store time and owned by the cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheMetadata {
    schema_version: String,
    /// Snapshot of the artifact config at store time
    pub config: ArtifactConfig,
    /// Store time (Unix timestamp in milliseconds)
    pub downloaded_at: i64,
    /// Last successful verification time (Unix timestamp in milliseconds)
    pub last_verified: i64,
    /// Whether the artifact passed verification at store time
    pub verified: bool,
    /// How long the originating download took
    pub download_duration_ms: u64,
    /// Usage counters
    #[serde(default)]
    pub usage: UsageStats,
}

impl CacheMetadata {
    /// Create metadata for a freshly stored, verified artifact
    pub fn new(config: ArtifactConfig, download_duration_ms: u64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            config,
            downloaded_at: now,
            last_verified: now,
            verified: true,
            download_duration_ms,
            usage: UsageStats {
                load_count: 0,
                last_used: now,
            },
        }
    }

    /// Whether this document's schema is one this build understands
    pub fn is_supported_schema(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }

    /// Entry age in whole days at `now_ms`
    pub fn age_days(&self, now_ms: i64) -> i64 {
        (now_ms - self.downloaded_at).max(0) / 86_400_000
    }

    /// Record a cache load
    pub fn touch_usage(&mut self) {
        self.usage.load_count += 1;
        self.usage.last_used = chrono::Utc::now().timestamp_millis();
    }

    /// Load metadata from a file
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let contents = read_capped(path)?;
        serde_json::from_str(&contents).map_err(|e| MetadataError::Deserialization(e.to_string()))
    }

    /// Save metadata atomically
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MetadataError::Serialization(e.to_string()))?;
        write_atomic(path, &json)
    }
}

/// Derived summary of the whole cache, persisted inside the index
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AggregateCacheStats {
    /// Number of cached artifacts
    pub total_models: u64,
    /// Total bytes of cached artifacts
    pub total_size: u64,
    /// Artifacts whose last verification passed
    pub valid_models: u64,
    /// Artifacts whose last verification failed
    pub invalid_models: u64,
    /// Last cleanup time (Unix timestamp in milliseconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cleanup: Option<i64>,
}

/// Per-model entry in the cache index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    /// Artifact size in bytes
    pub size: u64,
    /// Store time (Unix timestamp in milliseconds)
    pub stored_at: i64,
    /// Verification outcome at last store/reconcile
    pub verified: bool,
}

/// The shared `cache-metadata.json` document: aggregate stats plus the
/// per-model index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheIndex {
    schema_version: String,
    /// Aggregate summary, kept consistent with `models`
    pub stats: AggregateCacheStats,
    /// Per-model index keyed by cache key (`{name}-{version}`)
    pub models: BTreeMap<String, IndexEntry>,
}

impl CacheIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            stats: AggregateCacheStats::default(),
            models: BTreeMap::new(),
        }
    }

    /// Record a stored artifact and refresh the aggregate stats
    pub fn record_store(&mut self, key: &str, size: u64, verified: bool) {
        self.models.insert(
            key.to_string(),
            IndexEntry {
                size,
                stored_at: chrono::Utc::now().timestamp_millis(),
                verified,
            },
        );
        self.recount();
    }

    /// Record a removed artifact and refresh the aggregate stats.
    /// Returns whether the key was present.
    pub fn record_remove(&mut self, key: &str) -> bool {
        let removed = self.models.remove(key).is_some();
        self.recount();
        removed
    }

    /// Recompute the aggregate stats from the index map.
    ///
    /// The index is small (one entry per cached model), so a full recount
    /// on every mutation keeps the stats impossible to drift.
    fn recount(&mut self) {
        self.stats.total_models = self.models.len() as u64;
        self.stats.total_size = self.models.values().map(|e| e.size).sum();
        self.stats.valid_models = self.models.values().filter(|e| e.verified).count() as u64;
        self.stats.invalid_models = self.models.values().filter(|e| !e.verified).count() as u64;
    }

    /// Load the index from a file, holding a shared advisory lock
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let lock_file = open_lock_file(path)?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| MetadataError::Lock(format!("Failed to acquire read lock: {e}")))?;

        let contents = read_capped(path)?;
        let index: CacheIndex = serde_json::from_str(&contents)
            .map_err(|e| MetadataError::Deserialization(e.to_string()))?;

        if index.schema_version != SCHEMA_VERSION {
            return Err(MetadataError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: index.schema_version,
            });
        }

        Ok(index)
    }

    /// Save the index atomically, holding an exclusive advisory lock
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        debug!(
            path = %path.display(),
            models = self.models.len(),
            total_size = self.stats.total_size,
            "Saving cache index"
        );

        let lock_file = open_lock_file(path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| MetadataError::Lock(format!("Failed to acquire write lock: {e}")))?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MetadataError::Serialization(e.to_string()))?;
        write_atomic(path, &json)
    }
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, MetadataError> {
    let lock_path = path.with_extension("lock");
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| MetadataError::Lock(format!("Failed to create lock file: {e}")))
}

fn read_capped(path: &Path) -> Result<String, MetadataError> {
    let metadata = std::fs::metadata(path).map_err(|e| MetadataError::Io(e.to_string()))?;
    if metadata.len() > MAX_METADATA_FILE_SIZE {
        return Err(MetadataError::TooLarge {
            size: metadata.len(),
            max: MAX_METADATA_FILE_SIZE,
        });
    }
    std::fs::read_to_string(path).map_err(|e| MetadataError::Io(e.to_string()))
}

/// Write `json` to `path` via temp file + flush + fsync + atomic rename
fn write_atomic(path: &Path, json: &str) -> Result<(), MetadataError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MetadataError::Io(e.to_string()))?;
    }

    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| MetadataError::Io(format!("Failed to create temp file: {e}")))?;

    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| MetadataError::Io(format!("Failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| MetadataError::Io(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| MetadataError::Io(format!("Failed to sync temp file: {e}")))?;

    temp_file
        .persist(path)
        .map_err(|e| MetadataError::Io(format!("Failed to persist temp file: {e}")))?;

    // Fsync parent directory so the rename is durable.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
