//! Integration tests for cache cleanup and eviction policy

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use model_artifact_cache::cache::{CacheMetadata, CacheOptions, CacheStatus, ModelCache};
use model_artifact_cache::{ArtifactConfig, ArtifactFormat};

fn config_for(bytes: &[u8], name: &str) -> ArtifactConfig {
    ArtifactConfig::new(
        name,
        "1.0.0",
        format!("https://example.com/{name}.onnx"),
        hex::encode(Sha256::digest(bytes)),
        bytes.len() as u64,
        ArtifactFormat::Onnx,
    )
}

fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::File::create(path).unwrap().write_all(bytes).unwrap();
}

async fn store(cache: &ModelCache, dir: &TempDir, name: &str, bytes: &[u8]) -> ArtifactConfig {
    let config = config_for(bytes, name);
    let source = dir.path().join(format!("{name}.src"));
    write_file(&source, bytes);
    cache.store(&config, &source).await.unwrap();
    config
}

fn metadata_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("metadata/{name}-1.0.0.json"))
}

#[tokio::test]
async fn test_cleanup_on_empty_cache_returns_zero() {
    let dir = TempDir::new().unwrap();
    let cache = ModelCache::new(CacheOptions::new(dir.path().join("cache")));
    cache.initialize().await.unwrap();

    assert_eq!(cache.cleanup().await.unwrap(), 0);
    assert_eq!(cache.get_stats().await.total_models, 0);
}

#[tokio::test]
async fn test_cleanup_without_bounds_keeps_healthy_entries() {
    let dir = TempDir::new().unwrap();
    let cache = ModelCache::new(CacheOptions::new(dir.path().join("cache")));
    cache.initialize().await.unwrap();

    let config = store(&cache, &dir, "model-a", b"aaaa").await;

    assert_eq!(cache.cleanup().await.unwrap(), 0);
    assert!(cache.check_cache(&config).await.hit());
}

#[tokio::test]
async fn test_age_pass_evicts_old_entries() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    let cache = ModelCache::new(CacheOptions::new(&root).with_max_age_days(30));
    cache.initialize().await.unwrap();

    let old = store(&cache, &dir, "old-model", b"old bytes").await;
    let fresh = store(&cache, &dir, "fresh-model", b"fresh bytes").await;

    // Backdate the old entry past the age bound.
    let path = metadata_path(&root, "old-model");
    let mut metadata = CacheMetadata::load(&path).unwrap();
    metadata.downloaded_at -= 40 * 86_400_000;
    metadata.save(&path).unwrap();

    assert_eq!(cache.cleanup().await.unwrap(), 1);
    assert_eq!(cache.check_cache(&old).await.status(), CacheStatus::Missing);
    assert!(cache.check_cache(&fresh).await.hit());
}

#[tokio::test]
async fn test_size_pass_evicts_least_recently_used_first() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    // Bound fits exactly one of the two 8-byte entries.
    let cache = ModelCache::new(CacheOptions::new(&root).with_max_cache_size(12));
    cache.initialize().await.unwrap();

    let cold = store(&cache, &dir, "cold-model", b"11111111").await;
    let hot = store(&cache, &dir, "hot-model", b"22222222").await;

    // Make the usage ordering unambiguous.
    let path = metadata_path(&root, "cold-model");
    let mut metadata = CacheMetadata::load(&path).unwrap();
    metadata.usage.last_used -= 3_600_000;
    metadata.save(&path).unwrap();
    cache.update_usage_stats(&hot).await;

    assert_eq!(cache.cleanup().await.unwrap(), 1);
    assert_eq!(cache.check_cache(&cold).await.status(), CacheStatus::Missing);
    assert!(cache.check_cache(&hot).await.hit());

    let stats = cache.get_stats().await;
    assert_eq!(stats.total_models, 1);
    assert!(stats.total_size <= 12);
}

#[tokio::test]
async fn test_corruption_pass_evicts_failing_entries() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    let cache = ModelCache::new(CacheOptions::new(&root));
    cache.initialize().await.unwrap();

    let healthy = store(&cache, &dir, "healthy-model", b"healthy bytes").await;
    let doomed = store(&cache, &dir, "doomed-model", b"doomed bytes").await;

    write_file(&root.join("models/doomed-model-1.0.0.onnx"), b"flipped bits");

    assert_eq!(cache.cleanup().await.unwrap(), 1);
    assert_eq!(cache.check_cache(&doomed).await.status(), CacheStatus::Missing);
    assert!(cache.check_cache(&healthy).await.hit());
}

#[tokio::test]
async fn test_cleanup_never_increases_stats() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    let cache = ModelCache::new(
        CacheOptions::new(&root)
            .with_max_age_days(30)
            .with_max_cache_size(1024),
    );
    cache.initialize().await.unwrap();

    store(&cache, &dir, "model-a", b"aaaa").await;
    store(&cache, &dir, "model-b", b"bbbb").await;

    let before = cache.get_stats().await;
    cache.cleanup().await.unwrap();
    let after = cache.get_stats().await;

    assert!(after.total_models <= before.total_models);
    assert!(after.total_size <= before.total_size);
    assert!(after.last_cleanup.is_some());
}

#[tokio::test]
async fn test_auto_cleanup_runs_after_store() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("cache");
    // Bound of one entry: each new store evicts the least recently used.
    let cache = ModelCache::new(
        CacheOptions::new(&root)
            .with_max_cache_size(10)
            .with_auto_cleanup(true),
    );
    cache.initialize().await.unwrap();

    let first = store(&cache, &dir, "first-model", b"12345678").await;

    // Backdate the first entry so LRU ordering is unambiguous.
    let path = metadata_path(&root, "first-model");
    let mut metadata = CacheMetadata::load(&path).unwrap();
    metadata.usage.last_used -= 3_600_000;
    metadata.save(&path).unwrap();

    let second = store(&cache, &dir, "second-model", b"87654321").await;

    let stats = cache.get_stats().await;
    assert_eq!(stats.total_models, 1);
    assert!(stats.total_size <= 10);
    assert_eq!(cache.check_cache(&first).await.status(), CacheStatus::Missing);
    assert!(cache.check_cache(&second).await.hit());
}
