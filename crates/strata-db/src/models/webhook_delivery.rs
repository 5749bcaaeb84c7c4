//! `WebhookDelivery` model: one attempt to push one event to one webhook.
//!
//! Rows are the audit trail of the delivery state machine. An attempt row is
//! mutated only while non-terminal; later attempts are separate rows with an
//! incremented `attempt_number`, created atomically by the retry claim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status of a delivery attempt.
///
/// `pending` and `retrying` are the non-terminal resting states; `in_flight`
/// is the transient claim marker held only while a worker is executing the
/// attempt. A `retrying` row whose `next_retry_at` has been cleared is the
/// closed record of a failed attempt that already has a successor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Attempt created but not yet executed (or deferred by rate limiting).
    Pending,
    /// Claimed by a worker; execution in progress.
    InFlight,
    /// Delivered: the endpoint answered 2xx.
    Success,
    /// Attempt executed and failed; a retry is or was scheduled.
    Retrying,
    /// Retries exhausted or failed fast; no further attempts.
    Failed,
}

impl DeliveryStatus {
    /// Whether no further transitions can occur from this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed)
    }

    /// Stable string form, matching the database enum labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::InFlight => "in_flight",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// One delivery attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Primary key.
    pub id: Uuid,
    /// Non-owning reference to the webhook.
    pub webhook_id: Uuid,
    /// Non-owning reference to the event.
    pub event_id: Uuid,
    /// 1-based attempt number within the (webhook, event) chain.
    pub attempt_number: i32,
    pub status: DeliveryStatus,
    /// Headers of the request as sent.
    pub request_headers: Option<serde_json::Value>,
    /// Body of the request as sent.
    pub request_body: Option<serde_json::Value>,
    pub response_status: Option<i16>,
    pub response_headers: Option<serde_json::Value>,
    /// Response body, truncated for storage.
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i32>,
    /// When the attempt becomes claimable again; `None` on closed rows.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set only on success.
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create an attempt-1 delivery row.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    pub webhook_id: Uuid,
    pub event_id: Uuid,
}

/// Captured response for the delivery record.
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: Option<i16>,
    pub headers: Option<serde_json::Value>,
    pub body: Option<String>,
}

/// Filter for delivery history queries.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub webhook_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
}

impl WebhookDelivery {
    /// Create an attempt-1 row in `pending` state.
    ///
    /// Idempotent per (webhook, event): if any row already exists for the
    /// pair, nothing is inserted and `None` is returned, so a repeated
    /// fan-out after a partial failure cannot start a second chain.
    pub async fn create(
        pool: &sqlx::PgPool,
        data: CreateWebhookDelivery,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_deliveries (webhook_id, event_id)
            SELECT $1, $2
            WHERE NOT EXISTS (
                SELECT 1 FROM webhook_deliveries
                WHERE webhook_id = $1 AND event_id = $2
            )
            RETURNING *
            ",
        )
        .bind(data.webhook_id)
        .bind(data.event_id)
        .fetch_optional(pool)
        .await
    }

    /// Find a delivery by ID.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_deliveries WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Claim a freshly created `pending` row for immediate execution.
    ///
    /// Compare-and-swap to `in_flight`; returns false if another worker got
    /// there first (or the row is no longer pending).
    pub async fn claim(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'in_flight', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim deferred `pending` rows that are due, up to a batch limit.
    ///
    /// These are attempts whose send was deferred (rate limiting, stale-claim
    /// release); they re-execute at their original `attempt_number`.
    pub async fn claim_due_deferred(
        pool: &sqlx::PgPool,
        batch: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET status = 'in_flight', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'pending'
                  AND next_retry_at IS NOT NULL
                  AND next_retry_at <= NOW()
                ORDER BY next_retry_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(batch)
        .fetch_all(pool)
        .await
    }

    /// Claim due `retrying` rows and spawn their successor attempts.
    ///
    /// Single atomic statement, the sole concurrency-control point of the
    /// scheduler: each due row has its `next_retry_at` cleared (closing it as
    /// the immutable record of the failed attempt) and a successor row with
    /// `attempt_number + 1` is inserted already claimed. Returns the
    /// successor rows, ready for transport.
    pub async fn claim_due_retries(
        pool: &sqlx::PgPool,
        batch: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            WITH due AS (
                SELECT id, webhook_id, event_id, attempt_number
                FROM webhook_deliveries
                WHERE status = 'retrying'
                  AND next_retry_at IS NOT NULL
                  AND next_retry_at <= NOW()
                ORDER BY next_retry_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ),
            closed AS (
                UPDATE webhook_deliveries d
                SET next_retry_at = NULL, updated_at = NOW()
                FROM due
                WHERE d.id = due.id
            )
            INSERT INTO webhook_deliveries
                (webhook_id, event_id, attempt_number, status)
            SELECT webhook_id, event_id, attempt_number + 1,
                   'in_flight'::webhook_delivery_status
            FROM due
            RETURNING *
            ",
        )
        .bind(batch)
        .fetch_all(pool)
        .await
    }

    /// Record a successful attempt on a claimed row.
    pub async fn mark_success(
        pool: &sqlx::PgPool,
        id: Uuid,
        request_headers: Option<&serde_json::Value>,
        request_body: Option<&serde_json::Value>,
        response: &ResponseSnapshot,
        duration_ms: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries SET
                status = 'success',
                request_headers = $2,
                request_body = $3,
                response_status = $4,
                response_headers = $5,
                response_body = $6,
                duration_ms = $7,
                error_message = NULL,
                next_retry_at = NULL,
                delivered_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            ",
        )
        .bind(id)
        .bind(request_headers)
        .bind(request_body)
        .bind(response.status)
        .bind(&response.headers)
        .bind(&response.body)
        .bind(duration_ms)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed attempt that will be retried.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_retrying(
        pool: &sqlx::PgPool,
        id: Uuid,
        request_headers: Option<&serde_json::Value>,
        request_body: Option<&serde_json::Value>,
        response: &ResponseSnapshot,
        error_message: &str,
        duration_ms: Option<i32>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries SET
                status = 'retrying',
                request_headers = $2,
                request_body = $3,
                response_status = $4,
                response_headers = $5,
                response_body = $6,
                error_message = $7,
                duration_ms = $8,
                next_retry_at = $9,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            ",
        )
        .bind(id)
        .bind(request_headers)
        .bind(request_body)
        .bind(response.status)
        .bind(&response.headers)
        .bind(&response.body)
        .bind(error_message)
        .bind(duration_ms)
        .bind(next_retry_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a terminal failure.
    pub async fn mark_failed(
        pool: &sqlx::PgPool,
        id: Uuid,
        request_headers: Option<&serde_json::Value>,
        request_body: Option<&serde_json::Value>,
        response: &ResponseSnapshot,
        error_message: &str,
        duration_ms: Option<i32>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries SET
                status = 'failed',
                request_headers = $2,
                request_body = $3,
                response_status = $4,
                response_headers = $5,
                response_body = $6,
                error_message = $7,
                duration_ms = $8,
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            ",
        )
        .bind(id)
        .bind(request_headers)
        .bind(request_body)
        .bind(response.status)
        .bind(&response.headers)
        .bind(&response.body)
        .bind(error_message)
        .bind(duration_ms)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Defer a claimed attempt without executing it.
    ///
    /// Used when the webhook's rate limit is exhausted: the row returns to
    /// `pending` with an unchanged `attempt_number` and no outcome recorded.
    pub async fn mark_deferred(
        pool: &sqlx::PgPool,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending', next_retry_at = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'in_flight'
            ",
        )
        .bind(id)
        .bind(next_retry_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release claims abandoned by a crashed worker.
    ///
    /// Rows stuck `in_flight` (and orphaned `pending` rows that were created
    /// but never claimed) become due `pending` rows once their `updated_at`
    /// passes the staleness threshold.
    pub async fn release_stale(
        pool: &sqlx::PgPool,
        stale_after_secs: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending', next_retry_at = NOW(), updated_at = NOW()
            WHERE (status = 'in_flight'
                   OR (status = 'pending' AND next_retry_at IS NULL))
              AND updated_at < NOW() - ($1 * INTERVAL '1 second')
            ",
        )
        .bind(stale_after_secs)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// List deliveries matching a filter, newest first.
    pub async fn list(
        pool: &sqlx::PgPool,
        filter: &DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_deliveries
            WHERE ($1::uuid IS NULL OR webhook_id = $1)
              AND ($2::uuid IS NULL OR event_id = $2)
              AND ($3::webhook_delivery_status IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            ",
        )
        .bind(filter.webhook_id)
        .bind(filter.event_id)
        .bind(filter.status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count deliveries matching a filter.
    pub async fn count(
        pool: &sqlx::PgPool,
        filter: &DeliveryFilter,
    ) -> Result<i64, sqlx::Error> {
        let result: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE ($1::uuid IS NULL OR webhook_id = $1)
              AND ($2::uuid IS NULL OR event_id = $2)
              AND ($3::webhook_delivery_status IS NULL OR status = $3)
            ",
        )
        .bind(filter.webhook_id)
        .bind(filter.event_id)
        .bind(filter.status)
        .fetch_one(pool)
        .await?;

        Ok(result.0)
    }

    /// List the full attempt chain for one (webhook, event) pair.
    pub async fn list_chain(
        pool: &sqlx::PgPool,
        webhook_id: Uuid,
        event_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_deliveries
            WHERE webhook_id = $1 AND event_id = $2
            ORDER BY attempt_number
            ",
        )
        .bind(webhook_id)
        .bind(event_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::InFlight.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_status_string_form() {
        assert_eq!(DeliveryStatus::InFlight.as_str(), "in_flight");
        assert_eq!(DeliveryStatus::Retrying.as_str(), "retrying");
    }

    #[test]
    fn test_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&DeliveryStatus::InFlight).unwrap();
        assert_eq!(json, "\"in_flight\"");

        let parsed: DeliveryStatus = serde_json::from_str("\"retrying\"").unwrap();
        assert_eq!(parsed, DeliveryStatus::Retrying);
    }

    #[test]
    fn test_filter_default_matches_everything() {
        let filter = DeliveryFilter::default();
        assert!(filter.webhook_id.is_none());
        assert!(filter.event_id.is_none());
        assert!(filter.status.is_none());
    }
}
