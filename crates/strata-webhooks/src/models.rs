//! Engine-facing types: the event type catalogue, the wire payload, and the
//! request/response shapes of the registry surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strata_db::models::Webhook;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Known domain event types that webhooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventType {
    UserCreated,
    UserUpdated,
    UserDeleted,
    SubscriptionCreated,
    SubscriptionRenewed,
    SubscriptionCanceled,
    InvoicePaid,
    InvoicePaymentFailed,
    MatchFound,
    MatchExpired,
    VideoProcessed,
    VideoFailed,
}

impl WebhookEventType {
    /// All known event types.
    #[must_use]
    pub fn all() -> &'static [WebhookEventType] {
        &[
            WebhookEventType::UserCreated,
            WebhookEventType::UserUpdated,
            WebhookEventType::UserDeleted,
            WebhookEventType::SubscriptionCreated,
            WebhookEventType::SubscriptionRenewed,
            WebhookEventType::SubscriptionCanceled,
            WebhookEventType::InvoicePaid,
            WebhookEventType::InvoicePaymentFailed,
            WebhookEventType::MatchFound,
            WebhookEventType::MatchExpired,
            WebhookEventType::VideoProcessed,
            WebhookEventType::VideoFailed,
        ]
    }

    /// The dotted string form used on the wire and in subscriptions.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEventType::UserCreated => "user.created",
            WebhookEventType::UserUpdated => "user.updated",
            WebhookEventType::UserDeleted => "user.deleted",
            WebhookEventType::SubscriptionCreated => "subscription.created",
            WebhookEventType::SubscriptionRenewed => "subscription.renewed",
            WebhookEventType::SubscriptionCanceled => "subscription.canceled",
            WebhookEventType::InvoicePaid => "invoice.paid",
            WebhookEventType::InvoicePaymentFailed => "invoice.payment_failed",
            WebhookEventType::MatchFound => "match.found",
            WebhookEventType::MatchExpired => "match.expired",
            WebhookEventType::VideoProcessed => "video.processed",
            WebhookEventType::VideoFailed => "video.failed",
        }
    }

    /// Parse the dotted string form. Returns `None` for unknown types.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|et| et.as_str() == s)
    }
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// JSON body POSTed to a webhook endpoint.
///
/// Rebuilt for every attempt so `delivered_at` reflects the actual send; the
/// signature covers these exact bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub event_type: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub data: serde_json::Value,
    pub delivered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Registry requests/responses
// ---------------------------------------------------------------------------

/// Request to register a new webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub event_types: Vec<String>,
    /// Caller-supplied secret; generated when absent.
    pub secret: Option<String>,
    /// Restrict deliveries to events of one tenant.
    pub tenant_id: Option<Uuid>,
    /// Extra headers (string map) sent with every delivery.
    pub custom_headers: Option<serde_json::Value>,
    pub rate_limit_per_minute: Option<i32>,
}

/// Partial update of a webhook. The secret is immutable and has no field here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub rate_limit_per_minute: Option<i32>,
    pub custom_headers: Option<serde_json::Value>,
}

/// A webhook as returned by every read path: the secret is omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub url: String,
    pub event_types: Vec<String>,
    pub is_active: bool,
    pub rate_limit_per_minute: Option<i32>,
    pub custom_headers: Option<serde_json::Value>,
    pub total_deliveries: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Webhook> for WebhookResponse {
    fn from(w: Webhook) -> Self {
        Self {
            id: w.id,
            user_id: w.user_id,
            tenant_id: w.tenant_id,
            url: w.url,
            event_types: w.event_types,
            is_active: w.is_active,
            rate_limit_per_minute: w.rate_limit_per_minute,
            custom_headers: w.custom_headers,
            total_deliveries: w.total_deliveries,
            successful_deliveries: w.successful_deliveries,
            failed_deliveries: w.failed_deliveries,
            last_delivery_at: w.last_delivery_at,
            last_success_at: w.last_success_at,
            last_failure_at: w.last_failure_at,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

/// Creation result: the only place the plaintext secret ever appears.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedWebhook {
    pub webhook: WebhookResponse,
    pub secret: String,
}

/// Paginated webhook listing.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookListResponse {
    pub items: Vec<WebhookResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Request to capture a domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub tenant_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse_roundtrip() {
        for et in WebhookEventType::all() {
            assert_eq!(WebhookEventType::parse(et.as_str()), Some(*et));
        }
    }

    #[test]
    fn test_event_type_parse_unknown() {
        assert_eq!(WebhookEventType::parse("payment.exploded"), None);
        assert_eq!(WebhookEventType::parse(""), None);
    }

    #[test]
    fn test_payload_serializes_nulls_and_iso_timestamp() {
        let payload = DeliveryPayload {
            event_type: "match.found".to_string(),
            resource_type: None,
            resource_id: None,
            data: serde_json::json!({"match_id": "m-7"}),
            delivered_at: "2026-08-06T12:00:00Z".parse().unwrap(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["event_type"], "match.found");
        assert!(value["resource_type"].is_null());
        assert!(value["resource_id"].is_null());
        assert_eq!(value["data"]["match_id"], "m-7");
        // chrono serializes DateTime<Utc> as RFC 3339 / ISO-8601
        assert!(value["delivered_at"]
            .as_str()
            .unwrap()
            .starts_with("2026-08-06T12:00:00"));
    }

    #[test]
    fn test_payload_preserves_resource_fields() {
        let payload = DeliveryPayload {
            event_type: "video.processed".to_string(),
            resource_type: Some("video".to_string()),
            resource_id: Some("v-42".to_string()),
            data: serde_json::json!({}),
            delivered_at: Utc::now(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["resource_type"], "video");
        assert_eq!(value["resource_id"], "v-42");
    }

    #[test]
    fn test_update_request_has_no_secret_field() {
        // The secret is immutable after creation; deserializing a payload
        // that tries to set one must fail to round-trip it.
        let update: UpdateWebhookRequest =
            serde_json::from_str(r#"{"is_active": false}"#).unwrap();
        assert_eq!(update.is_active, Some(false));

        let value = serde_json::to_value(&update).unwrap();
        assert!(value.get("secret").is_none());
    }
}
