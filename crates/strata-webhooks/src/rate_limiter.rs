//! Per-webhook delivery rate limiting.
//!
//! Token bucket keyed by webhook id, sized from the webhook's configured
//! per-minute limit: capacity = limit, refill = limit/60 tokens per second.
//! Checks are non-blocking; an exhausted bucket defers the attempt instead
//! of waiting.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;
use uuid::Uuid;

/// Token bucket for a single webhook.
#[derive(Debug)]
pub struct RateLimiter {
    /// Configured per-minute limit this bucket was built for.
    limit_per_minute: u32,
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a bucket allowing `limit` sends per minute (bursts up to `limit`).
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        let capacity = f64::from(limit);
        Self {
            limit_per_minute: limit,
            capacity,
            refill_per_sec: capacity / 60.0,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// The per-minute limit this bucket enforces.
    #[must_use]
    pub fn limit_per_minute(&self) -> u32 {
        self.limit_per_minute
    }

    /// Try to take one token. Returns false when the limit is exhausted.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (after refill).
    pub fn available_tokens(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// Registry of per-webhook rate limiters.
///
/// Buckets are created lazily on first use and rebuilt when the webhook's
/// configured limit changes.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<Uuid, RateLimiter>>,
}

impl RateLimiterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take a send token for a webhook with the given per-minute limit.
    pub async fn try_acquire(&self, webhook_id: Uuid, limit_per_minute: u32) -> bool {
        let mut limiters = self.limiters.lock().await;
        let limiter = limiters
            .entry(webhook_id)
            .or_insert_with(|| RateLimiter::per_minute(limit_per_minute));

        if limiter.limit_per_minute() != limit_per_minute {
            *limiter = RateLimiter::per_minute(limit_per_minute);
        }

        limiter.try_acquire()
    }

    /// Drop the bucket for a webhook (deleted or reconfigured).
    pub async fn remove(&self, webhook_id: Uuid) {
        self.limiters.lock().await.remove(&webhook_id);
    }

    /// Number of tracked buckets.
    pub async fn count(&self) -> usize {
        self.limiters.lock().await.len()
    }

    /// Drop all buckets.
    pub async fn clear(&self) {
        self.limiters.lock().await.clear();
    }
}
