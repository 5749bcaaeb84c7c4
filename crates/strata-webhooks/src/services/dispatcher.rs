//! Event fan-out.
//!
//! Matches captured events against active, subscribed webhooks, creates one
//! attempt-1 delivery row per match, marks the event processed once every
//! row exists, and executes the attempts concurrently under a bounded
//! semaphore so one slow endpoint cannot starve the rest.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Semaphore;

use crate::error::WebhookError;
use crate::services::transport::Transport;
use strata_db::models::{CreateWebhookDelivery, Webhook, WebhookDelivery, WebhookEvent};
use strata_db::StorageRetryPolicy;

/// Fan-out dispatcher for captured events.
#[derive(Clone)]
pub struct Dispatcher {
    pool: PgPool,
    transport: Arc<Transport>,
    send_permits: Arc<Semaphore>,
    storage_retry: StorageRetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher with a bound on concurrently executing sends.
    #[must_use]
    pub fn new(pool: PgPool, transport: Arc<Transport>, send_concurrency: usize) -> Self {
        Self {
            pool,
            transport,
            send_permits: Arc::new(Semaphore::new(send_concurrency.max(1))),
            storage_retry: StorageRetryPolicy::default(),
        }
    }

    /// Set the storage retry policy.
    #[must_use]
    pub fn with_storage_retry(mut self, policy: StorageRetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    /// Fan an event out to every matching webhook.
    ///
    /// Returns the number of delivery rows created. The event is marked
    /// processed once all rows exist — fan-out completion is decoupled from
    /// delivery outcomes. Already-processed events are a no-op.
    pub async fn dispatch_event(&self, event: &WebhookEvent) -> Result<usize, WebhookError> {
        if event.processed {
            return Ok(0);
        }

        let webhooks = self
            .storage_retry
            .run("find_matching", || {
                Webhook::find_matching(&self.pool, event.tenant_id, &event.event_type)
            })
            .await?;

        if webhooks.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.id,
                event_type = %event.event_type,
                "No active webhooks match event type"
            );
            WebhookEvent::mark_processed(&self.pool, event.id).await?;
            return Ok(0);
        }

        // Create every attempt-1 row before executing anything: fan-out
        // must complete even if the first send is slow.
        let mut created: Vec<(WebhookDelivery, Webhook)> = Vec::with_capacity(webhooks.len());
        let mut failures = 0usize;
        for webhook in webhooks {
            match WebhookDelivery::create(
                &self.pool,
                CreateWebhookDelivery {
                    webhook_id: webhook.id,
                    event_id: event.id,
                },
            )
            .await
            {
                Ok(Some(delivery)) => created.push((delivery, webhook)),
                Ok(None) => {
                    // A chain already exists for this pair (earlier partial
                    // fan-out); nothing to add.
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        target: "webhook_delivery",
                        event_id = %event.id,
                        webhook_id = %webhook.id,
                        error = %e,
                        "Failed to create delivery row"
                    );
                }
            }
        }

        if failures == 0 {
            if let Err(e) = WebhookEvent::mark_processed(&self.pool, event.id).await {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.id,
                    error = %e,
                    "Failed to mark event processed"
                );
            }
        }
        // With failures the event stays unprocessed; the catch-up sweep
        // re-dispatches it and the idempotent row creation fills the gaps.

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.id,
            event_type = %event.event_type,
            deliveries = created.len(),
            "Event fanned out"
        );

        let count = created.len();
        let mut handles = Vec::with_capacity(count);
        for (delivery, _webhook) in created {
            let permit = match self.send_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let pool = self.pool.clone();
            let transport = self.transport.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match WebhookDelivery::claim(&pool, delivery.id).await {
                    Ok(true) => transport.deliver(&delivery).await,
                    Ok(false) => {
                        // Another worker (stale-claim release path) owns it.
                    }
                    Err(e) => {
                        tracing::error!(
                            target: "webhook_delivery",
                            delivery_id = %delivery.id,
                            error = %e,
                            "Failed to claim delivery for dispatch"
                        );
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(count)
    }

    /// Catch-up sweep over unprocessed events.
    ///
    /// Covers a crash between event capture and fan-out. The grace window
    /// keeps the sweep from racing a synchronous dispatch still in progress.
    pub async fn dispatch_pending(
        &self,
        grace_secs: i64,
        batch: i64,
    ) -> Result<usize, WebhookError> {
        let events = self
            .storage_retry
            .run("find_unprocessed", || {
                WebhookEvent::find_unprocessed(&self.pool, grace_secs, batch)
            })
            .await?;

        let mut total = 0usize;
        for event in events {
            match self.dispatch_event(&event).await {
                Ok(count) => total += count,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        event_id = %event.id,
                        error = %e,
                        "Failed to dispatch unprocessed event"
                    );
                }
            }
        }

        Ok(total)
    }

    /// Execute an already-claimed delivery (used by the retry worker).
    pub async fn execute_claimed(&self, delivery: &WebhookDelivery) {
        self.transport.deliver(delivery).await;
    }
}
