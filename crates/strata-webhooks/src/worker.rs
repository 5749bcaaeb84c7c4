//! Delivery worker
//!
//! Background worker that sweeps due retries, re-executes deferred attempts,
//! catches up on unprocessed events, releases stale claims, and shuts down
//! gracefully.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::services::dispatcher::Dispatcher;
use strata_db::models::WebhookDelivery;
use strata_db::StorageRetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to sweep for due retries and deferred attempts (in seconds).
    pub sweep_interval_secs: u64,

    /// How often to catch up on unprocessed events (in seconds).
    pub dispatch_interval_secs: u64,

    /// Only dispatch unprocessed events older than this (in seconds).
    pub dispatch_grace_secs: i64,

    /// How often to release stale claims (in seconds).
    pub stale_release_interval_secs: u64,

    /// Age at which an in-flight claim counts as abandoned (in seconds).
    pub stale_after_secs: i64,

    /// Maximum rows claimed per sweep.
    pub batch_size: i64,

    /// Number of concurrent delivery executions.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            dispatch_interval_secs: 5,
            dispatch_grace_secs: 30,
            stale_release_interval_secs: 300,
            stale_after_secs: 300,
            batch_size: 100,
            concurrency: 32,
        }
    }
}

/// Background worker driving the retry state machine.
pub struct DeliveryWorker {
    pool: PgPool,
    dispatcher: Arc<Dispatcher>,
    config: WorkerConfig,
    storage_retry: StorageRetryPolicy,
    shutdown: Arc<AtomicBool>,
}

impl DeliveryWorker {
    /// Create a new worker.
    #[must_use]
    pub fn new(pool: PgPool, dispatcher: Arc<Dispatcher>, config: WorkerConfig) -> Self {
        Self {
            pool,
            dispatcher,
            config,
            storage_retry: StorageRetryPolicy::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the worker loop. Returns when shutdown is requested.
    pub async fn run(&self) {
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size,
            "Starting delivery worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut sweep_interval = interval(Duration::from_secs(self.config.sweep_interval_secs));
        let mut dispatch_interval =
            interval(Duration::from_secs(self.config.dispatch_interval_secs));
        let mut stale_interval =
            interval(Duration::from_secs(self.config.stale_release_interval_secs));

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        info!("Worker shutdown requested, stopping sweep loop");
                        break;
                    }
                    self.sweep(&semaphore).await;
                }
                _ = dispatch_interval.tick() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        info!("Worker shutdown requested, stopping sweep loop");
                        break;
                    }
                    self.dispatch_catch_up().await;
                }
                _ = stale_interval.tick() => {
                    self.release_stale_claims().await;
                }
            }
        }

        // Wait for in-flight deliveries to complete
        info!("Waiting for in-flight deliveries to complete...");
        let _ = semaphore.acquire_many(self.config.concurrency as u32).await;
        info!("Worker stopped");
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Claim everything due and execute it under the concurrency bound.
    async fn sweep(&self, semaphore: &Arc<Semaphore>) {
        // Deferred attempts first: they carry their original attempt_number
        // and were never executed.
        let deferred = match self
            .storage_retry
            .run("claim_due_deferred", || {
                WebhookDelivery::claim_due_deferred(&self.pool, self.config.batch_size)
            })
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to claim deferred deliveries");
                Vec::new()
            }
        };

        // Due retries: each claim atomically closes the failed attempt and
        // spawns its successor row, already in_flight.
        let retries = match self
            .storage_retry
            .run("claim_due_retries", || {
                WebhookDelivery::claim_due_retries(&self.pool, self.config.batch_size)
            })
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to claim due retries");
                Vec::new()
            }
        };

        if deferred.is_empty() && retries.is_empty() {
            return;
        }

        debug!(
            deferred = deferred.len(),
            retries = retries.len(),
            "Claimed deliveries for execution"
        );

        for delivery in deferred.into_iter().chain(retries) {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let dispatcher = self.dispatcher.clone();

            tokio::spawn(async move {
                let _permit = permit; // Hold permit until the send completes
                dispatcher.execute_claimed(&delivery).await;
            });
        }
    }

    /// Fan out events that never went through synchronous dispatch.
    async fn dispatch_catch_up(&self) {
        match self
            .dispatcher
            .dispatch_pending(self.config.dispatch_grace_secs, self.config.batch_size)
            .await
        {
            Ok(count) if count > 0 => {
                info!(count = count, "Dispatched unprocessed events");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to dispatch unprocessed events");
            }
        }
    }

    /// Release claims abandoned by a crashed worker.
    async fn release_stale_claims(&self) {
        match WebhookDelivery::release_stale(&self.pool, self.config.stale_after_secs).await {
            Ok(count) if count > 0 => {
                warn!(count = count, "Released stale delivery claims");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to release stale delivery claims");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.concurrency, 32);
        assert!(config.stale_after_secs > 0);
    }
}
