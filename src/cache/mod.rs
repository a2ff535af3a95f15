//! On-disk model artifact cache
//!
//! [`ModelCache`] is an explicit service object (construct one per cache
//! directory, no global state) keyed by `{name}-{version}`. The disk layout
//! is:
//!
//! ```text
//! {cache_dir}/temp/                              staging for in-flight copies
//! {cache_dir}/models/{name}-{version}.{format}   artifact files
//! {cache_dir}/metadata/{name}-{version}.json     per-artifact metadata
//! {cache_dir}/quarantine/                        artifacts failing reconcile
//! {cache_dir}/cache-metadata.json                aggregate stats + index
//! ```
//!
//! Every lookup resolves to one of five validity states (see
//! [`CacheStatus`]); only `Valid` is a hit. Mutating operations on the same
//! cache key are serialized by per-key async locks, and the shared index
//! file is read-modify-written under a dedicated lock.

pub mod metadata;
pub mod status;

pub use metadata::{AggregateCacheStats, CacheIndex, CacheMetadata, IndexEntry, UsageStats};
pub use status::{CacheLookup, CacheStatus};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::verify::{Sha256Verifier, Verifier};
use crate::ArtifactConfig;

/// Errors from cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Operation attempted before `initialize()` completed
    #[error("cache is not initialized")]
    NotReady,

    /// Artifact config failed validation
    #[error("invalid artifact config: {0}")]
    InvalidConfig(String),

    /// Source file handed to `store` does not exist
    #[error("source file not found: {0}")]
    MissingSource(PathBuf),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(String),

    /// Metadata or index persistence failure
    #[error("metadata error: {0}")]
    Metadata(String),
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Root directory of the cache tree
    pub cache_dir: PathBuf,
    /// Evict entries older than this during cleanup
    pub max_age_days: Option<i64>,
    /// Evict least-recently-used entries during cleanup until total size
    /// fits under this bound
    pub max_cache_size_bytes: Option<u64>,
    /// Run a cleanup pass after every successful `store`
    pub auto_cleanup: bool,
}

impl CacheOptions {
    /// Options with no eviction bounds for the given cache directory
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_age_days: None,
            max_cache_size_bytes: None,
            auto_cleanup: false,
        }
    }

    /// Set the age bound for cleanup
    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = Some(days);
        self
    }

    /// Set the total-size bound for cleanup
    pub fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = Some(bytes);
        self
    }

    /// Run cleanup automatically after each store
    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }
}

/// Cache lifecycle. Operations other than `initialize` require `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
}

/// On-disk model artifact cache service
pub struct ModelCache {
    options: CacheOptions,
    verifier: Arc<dyn Verifier>,
    state: RwLock<LifecycleState>,
    // Per-key write locks; entries are created on first use and never
    // removed, bounded by the number of distinct keys touched.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // Serializes read-modify-write cycles on the shared index file within
    // this process; fd-lock covers other processes.
    index_lock: Mutex<()>,
}

impl ModelCache {
    /// Create a cache with the built-in SHA-256 verifier. The cache is not
    /// usable until [`initialize`](Self::initialize) completes.
    pub fn new(options: CacheOptions) -> Self {
        Self {
            options,
            verifier: Arc::new(Sha256Verifier::new()),
            state: RwLock::new(LifecycleState::Uninitialized),
            key_locks: Mutex::new(HashMap::new()),
            index_lock: Mutex::new(()),
        }
    }

    /// Replace the integrity verifier
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Create the cache directory tree and load (or rebuild) the index.
    /// Idempotent; concurrent callers after the first are no-ops.
    pub async fn initialize(&self) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Ready {
            return Ok(());
        }
        *state = LifecycleState::Initializing;

        for dir in [
            self.options.cache_dir.clone(),
            self.temp_dir(),
            self.models_dir(),
            self.metadata_dir(),
            self.quarantine_dir(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| CacheError::Io(format!("Failed to create {}: {e}", dir.display())))?;
        }

        let _index_guard = self.index_lock.lock().await;
        let index_path = self.index_path();
        let index = match CacheIndex::load(&index_path) {
            Ok(index) => index,
            Err(e) => {
                if index_path.exists() {
                    warn!(error = %e, "Cache index unreadable, rebuilding from disk");
                }
                self.rebuild_index().await?
            }
        };
        index
            .save(&index_path)
            .map_err(|e| CacheError::Metadata(e.to_string()))?;

        info!(
            cache_dir = %self.options.cache_dir.display(),
            models = index.stats.total_models,
            total_size = index.stats.total_size,
            "Cache initialized"
        );

        *state = LifecycleState::Ready;
        Ok(())
    }

    /// Look up an artifact and classify its validity.
    ///
    /// This is a pure read: it never mutates the cache and never returns an
    /// error. Filesystem failures fold into `Missing` with a reason, so a
    /// broken cache degrades into re-downloading rather than failing the
    /// caller.
    pub async fn check_cache(&self, config: &ArtifactConfig) -> CacheLookup {
        if !self.is_ready().await {
            return CacheLookup::Missing {
                reason: "cache is not initialized".to_string(),
            };
        }

        if let Err(e) = config.validate() {
            return CacheLookup::Missing {
                reason: format!("invalid artifact config: {e}"),
            };
        }

        self.inspect_entry(config).await
    }

    /// Copy a verified artifact file into the cache and record its
    /// metadata.
    ///
    /// Idempotent per key: re-storing replaces the entry. The copy goes
    /// through `temp/` and is renamed into place, so a crash mid-store never
    /// leaves a half-written file under `models/`. Returns the cached
    /// artifact path.
    pub async fn store(
        &self,
        config: &ArtifactConfig,
        source: &Path,
    ) -> Result<PathBuf, CacheError> {
        self.store_with_duration(config, source, Duration::ZERO).await
    }

    /// Same as [`store`](Self::store), recording how long the originating
    /// download took in the entry's metadata.
    pub async fn store_with_duration(
        &self,
        config: &ArtifactConfig,
        source: &Path,
        download_duration: Duration,
    ) -> Result<PathBuf, CacheError> {
        self.ensure_ready().await?;
        config.validate().map_err(CacheError::InvalidConfig)?;

        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(CacheError::MissingSource(source.to_path_buf()));
        }

        let key = config.cache_key();
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let model_path = self.model_path(config);
        let staging_path = self.temp_dir().join(format!("{}.staging", config.file_name()));

        fs::copy(source, &staging_path)
            .await
            .map_err(|e| CacheError::Io(format!("Failed to stage artifact: {e}")))?;
        fs::rename(&staging_path, &model_path)
            .await
            .map_err(|e| CacheError::Io(format!("Failed to move artifact into cache: {e}")))?;

        let size = fs::metadata(&model_path)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?
            .len();

        let metadata = CacheMetadata::new(config.clone(), download_duration.as_millis() as u64);
        metadata
            .save(&self.metadata_path(config))
            .map_err(|e| CacheError::Metadata(e.to_string()))?;

        {
            let _index_guard = self.index_lock.lock().await;
            let mut index = self.load_index()?;
            index.record_store(&key, size, true);
            index
                .save(&self.index_path())
                .map_err(|e| CacheError::Metadata(e.to_string()))?;
        }

        info!(key = %key, size, path = %model_path.display(), "Artifact stored in cache");

        drop(_guard);

        // Cleanup takes per-key locks itself, so it must run after this
        // store's key lock is released.
        if self.options.auto_cleanup {
            if let Err(e) = self.cleanup().await {
                warn!(error = %e, "Auto-cleanup after store failed");
            }
        }

        Ok(model_path)
    }

    /// Record that a cached artifact was loaded. Best-effort: failures are
    /// logged, never surfaced.
    pub async fn update_usage_stats(&self, config: &ArtifactConfig) {
        if !self.is_ready().await {
            return;
        }

        let key = config.cache_key();
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let path = self.metadata_path(config);
        match CacheMetadata::load(&path) {
            Ok(mut metadata) => {
                metadata.touch_usage();
                if let Err(e) = metadata.save(&path) {
                    warn!(key = %key, error = %e, "Failed to persist usage stats");
                }
            }
            Err(e) => {
                debug!(key = %key, error = %e, "No metadata to update usage stats on");
            }
        }
    }

    /// Aggregate cache statistics. Never errors; an unreadable index yields
    /// zeroed stats.
    pub async fn get_stats(&self) -> AggregateCacheStats {
        if !self.is_ready().await {
            return AggregateCacheStats::default();
        }

        let _index_guard = self.index_lock.lock().await;
        match self.load_index() {
            Ok(index) => index.stats,
            Err(e) => {
                warn!(error = %e, "Failed to read cache index for stats");
                AggregateCacheStats::default()
            }
        }
    }

    /// Evict entries in three passes and return the number removed.
    ///
    /// Pass 1 removes entries older than `max_age_days`. Pass 2 removes
    /// least-recently-used entries until total size fits under
    /// `max_cache_size_bytes`. Pass 3 removes entries whose metadata is
    /// unreadable or whose artifact fails verification. An empty cache
    /// returns 0; cleanup never adds entries.
    pub async fn cleanup(&self) -> Result<u64, CacheError> {
        self.ensure_ready().await?;

        let keys = {
            let _index_guard = self.index_lock.lock().await;
            let index = self.load_index()?;
            index.models.keys().cloned().collect::<Vec<_>>()
        };

        let mut removed: u64 = 0;
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Pass 1: age.
        if let Some(max_age) = self.options.max_age_days {
            for key in &keys {
                if let Some(metadata) = self.load_entry_metadata(key) {
                    if metadata.age_days(now_ms) > max_age {
                        debug!(key = %key, age_days = metadata.age_days(now_ms), "Evicting aged entry");
                        if self.remove_entry(key, &metadata.config).await? {
                            removed += 1;
                        }
                    }
                }
            }
        }

        // Pass 2: total size, LRU by last_used. Entries with unreadable
        // metadata sort first and go before anything with known usage.
        if let Some(max_size) = self.options.max_cache_size_bytes {
            loop {
                let (total_size, remaining) = {
                    let _index_guard = self.index_lock.lock().await;
                    let index = self.load_index()?;
                    (
                        index.stats.total_size,
                        index.models.keys().cloned().collect::<Vec<_>>(),
                    )
                };
                if total_size <= max_size || remaining.is_empty() {
                    break;
                }

                let victim = remaining
                    .iter()
                    .map(|key| {
                        let last_used = self
                            .load_entry_metadata(key)
                            .map(|m| m.usage.last_used)
                            .unwrap_or(0);
                        (key.clone(), last_used)
                    })
                    .min_by_key(|(_, last_used)| *last_used);

                match victim {
                    Some((key, last_used)) => {
                        debug!(key = %key, last_used, total_size, "Evicting LRU entry for size bound");
                        let config = self.load_entry_metadata(&key).map(|m| m.config);
                        if self.remove_entry_by_key(&key, config.as_ref()).await? {
                            removed += 1;
                        }
                    }
                    None => break,
                }
            }
        }

        // Pass 3: corruption.
        let remaining = {
            let _index_guard = self.index_lock.lock().await;
            self.load_index()?.models.keys().cloned().collect::<Vec<_>>()
        };
        for key in &remaining {
            match self.load_entry_metadata(key) {
                Some(metadata) => {
                    let model_path = self.models_dir().join(metadata.config.file_name());
                    let report = self.verifier.verify(&model_path, &metadata.config).await;
                    if !report.valid {
                        warn!(key = %key, errors = ?report.errors, "Evicting corrupted entry");
                        if self.remove_entry(key, &metadata.config).await? {
                            removed += 1;
                        }
                    }
                }
                None => {
                    warn!(key = %key, "Evicting entry with unreadable metadata");
                    if self.remove_entry_by_key(key, None).await? {
                        removed += 1;
                    }
                }
            }
        }

        {
            let _index_guard = self.index_lock.lock().await;
            let mut index = self.load_index()?;
            index.stats.last_cleanup = Some(chrono::Utc::now().timestamp_millis());
            index
                .save(&self.index_path())
                .map_err(|e| CacheError::Metadata(e.to_string()))?;
        }

        info!(removed, "Cache cleanup finished");
        Ok(removed)
    }

    /// Remove an artifact and its metadata. Returns whether anything
    /// existed. Missing files are not errors.
    pub async fn remove_model(&self, config: &ArtifactConfig) -> Result<bool, CacheError> {
        self.ensure_ready().await?;
        config.validate().map_err(CacheError::InvalidConfig)?;

        self.remove_entry(&config.cache_key(), config).await
    }

    /// Destroy the whole cache tree and reinitialize it empty
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.ensure_ready().await?;

        {
            let mut state = self.state.write().await;
            *state = LifecycleState::Uninitialized;
        }

        fs::remove_dir_all(&self.options.cache_dir)
            .await
            .map_err(|e| CacheError::Io(format!("Failed to remove cache tree: {e}")))?;

        info!(cache_dir = %self.options.cache_dir.display(), "Cache cleared");
        self.initialize().await
    }

    /// Re-verify an entry and quarantine it if the artifact is corrupted.
    ///
    /// This is the one operation that moves files in response to a failed
    /// check: a corrupted artifact and its metadata are moved into
    /// `quarantine/` (timestamped, for offline inspection) and dropped from
    /// the index. Returns the status observed before any quarantine.
    pub async fn reconcile(&self, config: &ArtifactConfig) -> Result<CacheStatus, CacheError> {
        self.ensure_ready().await?;
        config.validate().map_err(CacheError::InvalidConfig)?;

        let key = config.cache_key();
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let lookup = self.inspect_entry(config).await;
        let observed = lookup.status();

        if let CacheLookup::Corrupted { file_path, errors } = &lookup {
            warn!(key = %key, errors = ?errors, "Quarantining corrupted entry");
            let stamp = chrono::Utc::now().timestamp_millis();

            let quarantined = self
                .quarantine_dir()
                .join(format!("{stamp}-{}", config.file_name()));
            fs::rename(file_path, &quarantined)
                .await
                .map_err(|e| CacheError::Io(format!("Failed to quarantine artifact: {e}")))?;

            let metadata_path = self.metadata_path(config);
            if fs::try_exists(&metadata_path).await.unwrap_or(false) {
                let dest = self.quarantine_dir().join(format!("{stamp}-{key}.json"));
                if let Err(e) = fs::rename(&metadata_path, &dest).await {
                    warn!(key = %key, error = %e, "Failed to quarantine metadata file");
                }
            }

            let _index_guard = self.index_lock.lock().await;
            let mut index = self.load_index()?;
            index.record_remove(&key);
            index
                .save(&self.index_path())
                .map_err(|e| CacheError::Metadata(e.to_string()))?;
        }

        Ok(observed)
    }

    // ----- internals -----

    async fn is_ready(&self) -> bool {
        *self.state.read().await == LifecycleState::Ready
    }

    async fn ensure_ready(&self) -> Result<(), CacheError> {
        if self.is_ready().await {
            Ok(())
        } else {
            Err(CacheError::NotReady)
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Classify an entry without mutating anything
    async fn inspect_entry(&self, config: &ArtifactConfig) -> CacheLookup {
        let model_path = self.model_path(config);

        match fs::try_exists(&model_path).await {
            Ok(true) => {}
            Ok(false) => {
                return CacheLookup::Missing {
                    reason: format!("no cached artifact for {}", config.cache_key()),
                };
            }
            Err(e) => {
                return CacheLookup::Missing {
                    reason: format!("cache directory unreadable: {e}"),
                };
            }
        }

        let metadata = match CacheMetadata::load(&self.metadata_path(config)) {
            Ok(metadata) => metadata,
            Err(e) => {
                return CacheLookup::Invalid {
                    reason: format!("cache metadata unreadable: {e}"),
                };
            }
        };

        if !metadata.is_supported_schema() {
            return CacheLookup::Invalid {
                reason: "cache metadata has an unsupported schema version".to_string(),
            };
        }

        if metadata.config.version != config.version {
            return CacheLookup::Outdated {
                file_path: model_path,
                reason: format!(
                    "cached version {} does not match requested {}",
                    metadata.config.version, config.version
                ),
                metadata,
            };
        }

        if metadata.config.checksum != config.checksum {
            return CacheLookup::Outdated {
                file_path: model_path,
                reason: "artifact was republished with a different checksum".to_string(),
                metadata,
            };
        }

        if let Some(max_age) = self.options.max_age_days {
            let age = metadata.age_days(chrono::Utc::now().timestamp_millis());
            if age > max_age {
                return CacheLookup::Outdated {
                    file_path: model_path,
                    reason: format!("entry is {age} days old (max {max_age})"),
                    metadata,
                };
            }
        }

        let report = self.verifier.verify(&model_path, config).await;
        if !report.valid {
            return CacheLookup::Corrupted {
                file_path: model_path,
                errors: report.errors,
            };
        }

        CacheLookup::Valid {
            file_path: model_path,
            metadata,
        }
    }

    /// Remove an entry under its key lock; tolerates already-missing files
    async fn remove_entry(
        &self,
        key: &str,
        config: &ArtifactConfig,
    ) -> Result<bool, CacheError> {
        self.remove_entry_by_key(key, Some(config)).await
    }

    async fn remove_entry_by_key(
        &self,
        key: &str,
        config: Option<&ArtifactConfig>,
    ) -> Result<bool, CacheError> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let mut existed = false;

        if let Some(config) = config {
            existed |= remove_file_if_present(&self.model_path(config)).await?;
            existed |= remove_file_if_present(&self.metadata_path(config)).await?;
        } else {
            // No parseable metadata to derive file names from; the index key
            // plus a directory scan finds the orphaned artifact file.
            let metadata_path = self.metadata_dir().join(format!("{key}.json"));
            existed |= remove_file_if_present(&metadata_path).await?;
            if let Ok(mut entries) = fs::read_dir(self.models_dir()).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    let stem = name.rsplit_once('.').map(|(stem, _)| stem);
                    if stem == Some(key) {
                        existed |= remove_file_if_present(&entry.path()).await?;
                    }
                }
            }
        }

        let _index_guard = self.index_lock.lock().await;
        let mut index = self.load_index()?;
        let in_index = index.record_remove(key);
        index
            .save(&self.index_path())
            .map_err(|e| CacheError::Metadata(e.to_string()))?;

        Ok(existed || in_index)
    }

    fn load_entry_metadata(&self, key: &str) -> Option<CacheMetadata> {
        let path = self.metadata_dir().join(format!("{key}.json"));
        CacheMetadata::load(&path).ok().filter(|m| m.is_supported_schema())
    }

    fn load_index(&self) -> Result<CacheIndex, CacheError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(CacheIndex::new());
        }
        CacheIndex::load(&path).map_err(|e| CacheError::Metadata(e.to_string()))
    }

    /// Rebuild the index by scanning metadata files on disk
    async fn rebuild_index(&self) -> Result<CacheIndex, CacheError> {
        let mut index = CacheIndex::new();

        let mut entries = match fs::read_dir(self.metadata_dir()).await {
            Ok(entries) => entries,
            Err(_) => return Ok(index),
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(metadata) = CacheMetadata::load(&path) else {
                warn!(path = %path.display(), "Skipping unreadable metadata during index rebuild");
                continue;
            };
            let model_path = self.models_dir().join(metadata.config.file_name());
            let Ok(file_meta) = fs::metadata(&model_path).await else {
                continue;
            };
            index.record_store(
                &metadata.config.cache_key(),
                file_meta.len(),
                metadata.verified,
            );
        }

        Ok(index)
    }

    fn temp_dir(&self) -> PathBuf {
        self.options.cache_dir.join("temp")
    }

    fn models_dir(&self) -> PathBuf {
        self.options.cache_dir.join("models")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.options.cache_dir.join("metadata")
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.options.cache_dir.join("quarantine")
    }

    fn index_path(&self) -> PathBuf {
        self.options.cache_dir.join("cache-metadata.json")
    }

    fn model_path(&self, config: &ArtifactConfig) -> PathBuf {
        self.models_dir().join(config.file_name())
    }

    fn metadata_path(&self, config: &ArtifactConfig) -> PathBuf {
        self.metadata_dir().join(format!("{}.json", config.cache_key()))
    }
}

async fn remove_file_if_present(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::Io(format!(
            "Failed to remove {}: {e}",
            path.display()
        ))),
    }
}
