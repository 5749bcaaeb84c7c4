//! Integration tests for per-webhook rate limiting.
//!
//! The limiter is a token bucket sized from the webhook's per-minute limit;
//! an exhausted bucket defers the attempt rather than counting it.

use std::time::Duration;

use strata_webhooks::rate_limiter::{RateLimiter, RateLimiterRegistry};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Throttling
// ---------------------------------------------------------------------------

#[test]
fn rate_limiter_throttles_beyond_limit() {
    let mut limiter = RateLimiter::per_minute(5);

    for i in 0..5 {
        assert!(limiter.try_acquire(), "send {i} should be allowed");
    }

    assert!(!limiter.try_acquire());
}

#[test]
fn rate_limiter_one_per_minute_allows_single_send() {
    let mut limiter = RateLimiter::per_minute(1);

    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());
    assert!(!limiter.try_acquire());
}

#[test]
fn rate_limiter_allows_burst_up_to_limit() {
    let mut limiter = RateLimiter::per_minute(20);

    let mut sent = 0;
    while limiter.try_acquire() && sent < 40 {
        sent += 1;
    }

    assert_eq!(sent, 20);
}

// ---------------------------------------------------------------------------
// Refill
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limiter_refills_over_time() {
    // 1200/min = 20 tokens per second.
    let mut limiter = RateLimiter::per_minute(1200);
    while limiter.try_acquire() {}
    assert!(!limiter.try_acquire());

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(limiter.try_acquire());
}

#[tokio::test]
async fn rate_limiter_caps_refill_at_limit() {
    let mut limiter = RateLimiter::per_minute(3);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // Never exceeds the configured burst, no matter how long it idles.
    assert!(limiter.available_tokens() <= 3.0);
}

#[test]
fn rate_limiter_reports_available_tokens() {
    let mut limiter = RateLimiter::per_minute(10);

    assert!(limiter.available_tokens() >= 9.9);
    limiter.try_acquire();
    limiter.try_acquire();

    let available = limiter.available_tokens();
    assert!((7.9..=10.0).contains(&available));
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_isolates_webhooks() {
    let registry = RateLimiterRegistry::new();
    let hook_a = Uuid::new_v4();
    let hook_b = Uuid::new_v4();

    assert!(registry.try_acquire(hook_a, 1).await);
    assert!(registry.try_acquire(hook_b, 1).await);

    // Each webhook exhausted its own bucket; neither affects the other.
    assert!(!registry.try_acquire(hook_a, 1).await);
    assert!(!registry.try_acquire(hook_b, 1).await);
}

#[tokio::test]
async fn registry_applies_new_limit_immediately() {
    let registry = RateLimiterRegistry::new();
    let hook = Uuid::new_v4();

    assert!(registry.try_acquire(hook, 1).await);
    assert!(!registry.try_acquire(hook, 1).await);

    // Operator raises the webhook's limit; the bucket is rebuilt.
    assert!(registry.try_acquire(hook, 5).await);
    assert!(registry.try_acquire(hook, 5).await);
}

#[tokio::test]
async fn registry_remove_resets_bucket() {
    let registry = RateLimiterRegistry::new();
    let hook = Uuid::new_v4();

    assert!(registry.try_acquire(hook, 1).await);
    assert!(!registry.try_acquire(hook, 1).await);

    registry.remove(hook).await;

    assert!(registry.try_acquire(hook, 1).await);
}

#[tokio::test]
async fn registry_tracks_and_clears_buckets() {
    let registry = RateLimiterRegistry::new();

    for _ in 0..5 {
        registry.try_acquire(Uuid::new_v4(), 10).await;
    }
    assert_eq!(registry.count().await, 5);

    registry.clear().await;
    assert_eq!(registry.count().await, 0);
}

// ---------------------------------------------------------------------------
// Deferral scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_sends_within_a_minute_defer_the_second() {
    // A webhook limited to 1/minute: the first send goes out immediately,
    // the second is deferred (and will carry the same attempt number when
    // the sweep re-executes it).
    let registry = RateLimiterRegistry::new();
    let hook = Uuid::new_v4();

    assert!(registry.try_acquire(hook, 1).await, "first send is immediate");
    assert!(
        !registry.try_acquire(hook, 1).await,
        "second send within the window is deferred"
    );
}
