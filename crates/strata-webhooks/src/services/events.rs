//! Event capture.
//!
//! Records immutable domain events, independent of who will receive them.
//! Matching and fan-out happen in the dispatcher.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{EmitEvent, WebhookEventType};
use strata_db::models::{CreateWebhookEvent, WebhookEvent};

/// Service for capturing domain events.
#[derive(Clone)]
pub struct EventService {
    pool: PgPool,
}

impl EventService {
    /// Create a new event service.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Capture an event. Pure append; no matching happens here.
    pub async fn emit(&self, request: EmitEvent) -> Result<WebhookEvent, WebhookError> {
        if WebhookEventType::parse(&request.event_type).is_none() {
            return Err(WebhookError::Validation(format!(
                "Unknown event type: {}",
                request.event_type
            )));
        }

        let event = WebhookEvent::create(
            &self.pool,
            CreateWebhookEvent {
                event_type: request.event_type,
                payload: request.payload,
                resource_type: request.resource_type,
                resource_id: request.resource_id,
                tenant_id: request.tenant_id,
            },
        )
        .await?;

        tracing::debug!(
            target: "webhook_delivery",
            event_id = %event.id,
            event_type = %event.event_type,
            "Event captured"
        );

        Ok(event)
    }

    /// Mark an event as fanned out. Idempotent; returns true on first flip.
    pub async fn mark_processed(&self, event_id: Uuid) -> Result<bool, WebhookError> {
        let flipped = WebhookEvent::mark_processed(&self.pool, event_id).await?;
        Ok(flipped)
    }

    /// Fetch an event by ID.
    pub async fn get(&self, event_id: Uuid) -> Result<WebhookEvent, WebhookError> {
        WebhookEvent::find_by_id(&self.pool, event_id)
            .await?
            .ok_or(WebhookError::EventNotFound)
    }
}
