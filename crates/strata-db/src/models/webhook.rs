//! `Webhook` model: a user's subscription of an HTTP endpoint to event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered webhook subscription.
///
/// The secret is stored encrypted and is immutable after creation; delivery
/// counters are only ever advanced through [`Webhook::record_delivery`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Webhook {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Optional tenant scope; `None` means the webhook receives matching
    /// events from every tenant.
    pub tenant_id: Option<Uuid>,
    /// Destination URL for deliveries.
    pub url: String,
    /// AES-256-GCM encrypted signing secret (base64).
    pub secret_encrypted: String,
    /// Subscribed event type strings.
    pub event_types: Vec<String>,
    /// Whether deliveries are currently enabled.
    pub is_active: bool,
    /// Optional per-minute delivery rate limit.
    pub rate_limit_per_minute: Option<i32>,
    /// Optional extra headers sent with every delivery (string map).
    pub custom_headers: Option<serde_json::Value>,
    /// Executed delivery attempts, all outcomes.
    pub total_deliveries: i64,
    /// Attempts that received a 2xx response.
    pub successful_deliveries: i64,
    /// Attempts that failed terminally (retries exhausted).
    pub failed_deliveries: i64,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create a new webhook.
#[derive(Debug, Clone)]
pub struct CreateWebhook {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub url: String,
    pub secret_encrypted: String,
    pub event_types: Vec<String>,
    pub rate_limit_per_minute: Option<i32>,
    pub custom_headers: Option<serde_json::Value>,
}

/// Partial update of a webhook. The secret has no update path.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhook {
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub rate_limit_per_minute: Option<i32>,
    pub custom_headers: Option<serde_json::Value>,
}

impl Webhook {
    /// Insert a new webhook.
    pub async fn create(
        pool: &sqlx::PgPool,
        data: CreateWebhook,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhooks
                (user_id, tenant_id, url, secret_encrypted, event_types,
                 rate_limit_per_minute, custom_headers)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            ",
        )
        .bind(data.user_id)
        .bind(data.tenant_id)
        .bind(&data.url)
        .bind(&data.secret_encrypted)
        .bind(&data.event_types)
        .bind(data.rate_limit_per_minute)
        .bind(&data.custom_headers)
        .fetch_one(pool)
        .await
    }

    /// Find a webhook by ID.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhooks WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// List webhooks for an owner, optionally filtered by activity flag.
    pub async fn list_by_owner(
        pool: &sqlx::PgPool,
        user_id: Uuid,
        active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhooks
            WHERE user_id = $1
              AND ($2::boolean IS NULL OR is_active = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(user_id)
        .bind(active)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count webhooks for an owner, optionally filtered by activity flag.
    pub async fn count_by_owner(
        pool: &sqlx::PgPool,
        user_id: Uuid,
        active: Option<bool>,
    ) -> Result<i64, sqlx::Error> {
        let result: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM webhooks
            WHERE user_id = $1
              AND ($2::boolean IS NULL OR is_active = $2)
            ",
        )
        .bind(user_id)
        .bind(active)
        .fetch_one(pool)
        .await?;

        Ok(result.0)
    }

    /// Find active webhooks subscribed to an event type within a tenant scope.
    ///
    /// A webhook with no tenant restriction matches events from any tenant;
    /// a tenant-scoped webhook matches only events carrying the same tenant.
    pub async fn find_matching(
        pool: &sqlx::PgPool,
        tenant_id: Option<Uuid>,
        event_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhooks
            WHERE is_active
              AND $1 = ANY(event_types)
              AND (tenant_id IS NULL OR tenant_id = $2)
            ORDER BY created_at
            ",
        )
        .bind(event_type)
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }

    /// Apply a partial update. Returns the updated row, or `None` if the
    /// webhook does not exist.
    pub async fn update(
        pool: &sqlx::PgPool,
        id: Uuid,
        data: UpdateWebhook,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhooks SET
                url = COALESCE($2, url),
                event_types = COALESCE($3, event_types),
                is_active = COALESCE($4, is_active),
                rate_limit_per_minute = COALESCE($5, rate_limit_per_minute),
                custom_headers = COALESCE($6, custom_headers),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(&data.url)
        .bind(&data.event_types)
        .bind(data.is_active)
        .bind(data.rate_limit_per_minute)
        .bind(&data.custom_headers)
        .fetch_optional(pool)
        .await
    }

    /// Delete a webhook. Returns true if a row was removed.
    pub async fn delete(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            DELETE FROM webhooks WHERE id = $1
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the outcome of one executed delivery attempt.
    ///
    /// A single atomic UPDATE so that concurrent transport completions for
    /// the same webhook never lose increments: `total_deliveries` advances on
    /// every executed attempt, `successful_deliveries` on success,
    /// `failed_deliveries` only when the failure is terminal, and
    /// `last_failure_at` on every failure.
    pub async fn record_delivery(
        pool: &sqlx::PgPool,
        id: Uuid,
        success: bool,
        terminal_failure: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE webhooks SET
                total_deliveries = total_deliveries + 1,
                successful_deliveries = successful_deliveries
                    + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_deliveries = failed_deliveries
                    + CASE WHEN $3 THEN 1 ELSE 0 END,
                last_delivery_at = NOW(),
                last_success_at = CASE WHEN $2 THEN NOW() ELSE last_success_at END,
                last_failure_at = CASE WHEN $2 THEN last_failure_at ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(success)
        .bind(terminal_failure)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_webhook_holds_inputs() {
        let data = CreateWebhook {
            user_id: Uuid::new_v4(),
            tenant_id: None,
            url: "https://example.com/hooks".to_string(),
            secret_encrypted: "ciphertext".to_string(),
            event_types: vec!["match.found".to_string()],
            rate_limit_per_minute: Some(60),
            custom_headers: None,
        };

        assert_eq!(data.event_types.len(), 1);
        assert_eq!(data.rate_limit_per_minute, Some(60));
    }

    #[test]
    fn test_update_webhook_default_is_noop() {
        let update = UpdateWebhook::default();
        assert!(update.url.is_none());
        assert!(update.event_types.is_none());
        assert!(update.is_active.is_none());
    }
}
