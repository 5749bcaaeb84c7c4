//! `WebhookEvent` model: an immutable fact captured for fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A captured domain event.
///
/// Append-only: the single permitted mutation is the idempotent `processed`
/// flip performed by the dispatcher once fan-out is complete.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Primary key.
    pub id: Uuid,
    /// Event type string, e.g. `match.found`.
    pub event_type: String,
    /// Arbitrary JSON payload.
    pub payload: serde_json::Value,
    /// Optional type of the resource the event concerns.
    pub resource_type: Option<String>,
    /// Optional identifier of that resource.
    pub resource_id: Option<String>,
    /// Optional tenant scope.
    pub tenant_id: Option<Uuid>,
    /// True once fan-out has created a delivery row for every matching webhook.
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Data needed to capture a new event.
#[derive(Debug, Clone)]
pub struct CreateWebhookEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub tenant_id: Option<Uuid>,
}

impl WebhookEvent {
    /// Append a new event.
    pub async fn create(
        pool: &sqlx::PgPool,
        data: CreateWebhookEvent,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_events
                (event_type, payload, resource_type, resource_id, tenant_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            ",
        )
        .bind(&data.event_type)
        .bind(&data.payload)
        .bind(&data.resource_type)
        .bind(&data.resource_id)
        .bind(data.tenant_id)
        .fetch_one(pool)
        .await
    }

    /// Find an event by ID.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_events WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Mark an event as processed.
    ///
    /// Idempotent: the conditional `WHERE processed = FALSE` makes a second
    /// call a no-op. Returns true if this call performed the flip.
    pub async fn mark_processed(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_events
            SET processed = TRUE, processed_at = NOW()
            WHERE id = $1 AND processed = FALSE
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Find unprocessed events older than a grace window.
    ///
    /// Used by the worker's catch-up tick; the grace window keeps the sweep
    /// from racing a synchronous fan-out that is still in progress.
    pub async fn find_unprocessed(
        pool: &sqlx::PgPool,
        older_than_secs: i64,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_events
            WHERE processed = FALSE
              AND created_at <= NOW() - ($1 * INTERVAL '1 second')
            ORDER BY created_at
            LIMIT $2
            ",
        )
        .bind(older_than_secs)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
