//! Integration tests for download rate limiting behavior

use std::time::{Duration, Instant};

use model_artifact_cache::downloader::{RateLimitConfig, RateLimiter};

#[test]
fn test_unconfigured_limiter_is_not_limited() {
    let limiter = RateLimiter::new(RateLimitConfig::default());
    assert!(!limiter.is_limited());
    assert_eq!(limiter.max_bytes_per_second(), None);
}

#[test]
fn test_either_knob_enables_limiting() {
    let by_throughput = RateLimiter::new(RateLimitConfig {
        max_bytes_per_second: Some(1_048_576),
        ..Default::default()
    });
    assert!(by_throughput.is_limited());

    let by_spacing = RateLimiter::new(RateLimitConfig {
        min_chunk_delay_ms: Some(100),
        ..Default::default()
    });
    assert!(by_spacing.is_limited());
}

#[tokio::test]
async fn test_sustained_throughput_stays_under_ceiling() {
    // 4 KiB/s ceiling, 1 KiB chunks: five chunks need at least ~1s
    // (the first chunk is free, the next four cost 250 ms each).
    let mut limiter = RateLimiter::new(RateLimitConfig {
        max_bytes_per_second: Some(4096),
        chunk_size_bytes: Some(1024),
        ..Default::default()
    });

    let start = Instant::now();
    for _ in 0..5 {
        limiter.throttle(1024).await;
    }
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_slow_caller_is_not_delayed_further() {
    let mut limiter = RateLimiter::new(RateLimitConfig {
        max_bytes_per_second: Some(10_240),
        ..Default::default()
    });

    limiter.throttle(1024).await; // anchor

    // The caller itself took longer than the throughput budget; the
    // limiter must not add more delay on top.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let start = Instant::now();
    limiter.throttle(1024).await;
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn test_min_chunk_spacing_applies_without_throughput_ceiling() {
    let mut limiter = RateLimiter::new(RateLimitConfig {
        min_chunk_delay_ms: Some(200),
        ..Default::default()
    });

    let start = Instant::now();
    limiter.throttle(1).await;
    limiter.throttle(1).await;
    limiter.throttle(1).await;
    // Two enforced gaps of 200 ms each.
    assert!(start.elapsed() >= Duration::from_millis(350));
}

#[tokio::test]
async fn test_larger_of_both_delays_wins() {
    // 1 KiB at 1 KiB/s budgets 1000 ms; the 100 ms spacing floor is
    // dominated by the throughput delay.
    let mut limiter = RateLimiter::new(RateLimitConfig {
        max_bytes_per_second: Some(1024),
        min_chunk_delay_ms: Some(100),
        ..Default::default()
    });

    let start = Instant::now();
    limiter.throttle(1024).await;
    limiter.throttle(1024).await;
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_unlimited_throttle_adds_no_measurable_overhead() {
    let mut limiter = RateLimiter::new(RateLimitConfig::default());

    let start = Instant::now();
    for _ in 0..1000 {
        limiter.throttle(65_536).await;
    }
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_chunk_size_defaults_and_override() {
    assert_eq!(
        RateLimiter::new(RateLimitConfig::default()).optimal_chunk_size(),
        65_536
    );
    assert_eq!(
        RateLimiter::new(RateLimitConfig {
            chunk_size_bytes: Some(16_384),
            ..Default::default()
        })
        .optimal_chunk_size(),
        16_384
    );
}
