//! Retry policy for transient storage errors.
//!
//! Wraps individual storage calls with a small exponential backoff so that a
//! blip in database connectivity does not surface as a delivery failure.
//! This is a separate concern from webhook delivery retries: storage retries
//! happen within one call, in milliseconds, and never create delivery rows.

use std::future::Future;
use std::time::Duration;

/// Retry policy applied to storage access.
#[derive(Debug, Clone)]
pub struct StorageRetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
}

impl Default for StorageRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
        }
    }
}

impl StorageRetryPolicy {
    /// Create a policy with explicit settings.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_factor,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    /// Delay before the given retry (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.powi(retry as i32);
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * factor)
    }

    /// Whether an error is worth retrying.
    ///
    /// Connection-class failures (I/O, pool exhaustion, serialization
    /// conflicts, deadlocks) are transient; query-shape errors and missing
    /// rows are not.
    #[must_use]
    pub fn is_retryable(error: &sqlx::Error) -> bool {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| {
                    // 08xxx: connection exceptions; 40001: serialization
                    // failure; 40P01: deadlock detected.
                    code.starts_with("08") || code == "40001" || code == "40P01"
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Run a storage operation, retrying transient failures per this policy.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or immediately for
    /// non-retryable errors.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.max_retries && Self::is_retryable(&e) => {
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        op = op_name,
                        retry = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
