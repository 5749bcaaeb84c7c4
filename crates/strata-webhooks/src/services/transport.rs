//! Signed HTTP transport for delivery attempts.
//!
//! Takes a claimed (`in_flight`) delivery row, re-checks the webhook's
//! current state, enforces its rate limit, builds and signs the canonical
//! request, executes it with a bounded timeout, classifies the outcome, and
//! records both the delivery row transition and the webhook's counters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use sqlx::PgPool;

use crate::backoff::BackoffPolicy;
use crate::config::{DEFAULT_DEFER_DELAY_SECS, DEFAULT_MAX_ATTEMPTS};
use crate::crypto;
use crate::error::WebhookError;
use crate::models::DeliveryPayload;
use crate::rate_limiter::RateLimiterRegistry;
use strata_db::models::{ResponseSnapshot, Webhook, WebhookDelivery, WebhookEvent};
use strata_db::StorageRetryPolicy;

/// Maximum stored response body length, in characters.
const RESPONSE_BODY_LIMIT: usize = 4096;

/// What happens to a delivery chain after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePlan {
    /// Schedule another attempt at the given time.
    Retry(chrono::DateTime<chrono::Utc>),
    /// Attempts exhausted; the chain ends here.
    Terminal,
}

/// Decide between retry and terminal failure for a failed attempt.
#[must_use]
pub fn failure_plan(
    attempt_number: i32,
    max_attempts: i32,
    backoff: &BackoffPolicy,
) -> FailurePlan {
    if attempt_number < max_attempts {
        FailurePlan::Retry(backoff.next_retry_at(attempt_number))
    } else {
        FailurePlan::Terminal
    }
}

/// Whether an HTTP status counts as an accepted delivery.
#[must_use]
pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Truncate a response body for storage.
#[must_use]
pub fn truncate_response_body(body: String) -> String {
    if body.len() <= RESPONSE_BODY_LIMIT {
        body
    } else {
        body.chars().take(RESPONSE_BODY_LIMIT).collect()
    }
}

/// Build the signed header set for one attempt.
///
/// Custom headers with names or values that do not parse are skipped with a
/// warning rather than failing the delivery.
#[must_use]
pub fn build_headers(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    custom_headers: Option<&serde_json::Value>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(v) = "application/json".parse::<HeaderValue>() {
        headers.insert("Content-Type", v);
    }
    if let Ok(v) = timestamp.parse::<HeaderValue>() {
        headers.insert("X-Timestamp", v);
    }
    let signature = crypto::compute_signature(secret, timestamp, body);
    if let Ok(v) = signature.parse::<HeaderValue>() {
        headers.insert("X-Signature", v);
    }

    if let Some(serde_json::Value::Object(map)) = custom_headers {
        for (name, value) in map {
            let Some(value) = value.as_str() else {
                tracing::warn!(
                    target: "webhook_delivery",
                    header = %name,
                    "Skipping non-string custom header value"
                );
                continue;
            };
            match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        header = %name,
                        "Skipping unparseable custom header"
                    );
                }
            }
        }
    }

    headers
}

/// Convert a header map to a JSON object for the request/response snapshot.
#[must_use]
pub fn headers_to_json(headers: &HeaderMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            map.insert(name.to_string(), serde_json::Value::String(v.to_string()));
        }
    }
    serde_json::Value::Object(map)
}

/// Executes delivery attempts and records their outcomes.
#[derive(Clone)]
pub struct Transport {
    pool: PgPool,
    http_client: Client,
    request_timeout: Duration,
    encryption_key: Vec<u8>,
    backoff: BackoffPolicy,
    max_attempts: i32,
    defer_delay: Duration,
    rate_limits: Arc<RateLimiterRegistry>,
    storage_retry: StorageRetryPolicy,
}

impl Transport {
    /// Create a transport with a shared HTTP client.
    ///
    /// The client enforces the per-request timeout and follows at most one
    /// redirect.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        pool: PgPool,
        encryption_key: Vec<u8>,
        request_timeout: Duration,
    ) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .user_agent("strata-webhooks/0.1")
            .redirect(reqwest::redirect::Policy::limited(1))
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            pool,
            http_client,
            request_timeout,
            encryption_key,
            backoff: BackoffPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            defer_delay: Duration::from_secs(DEFAULT_DEFER_DELAY_SECS),
            rate_limits: Arc::new(RateLimiterRegistry::new()),
            storage_retry: StorageRetryPolicy::default(),
        })
    }

    /// Set the maximum attempts per delivery chain.
    #[must_use]
    pub fn with_max_attempts(mut self, max: i32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the delivery backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the rate-limit deferral delay.
    #[must_use]
    pub fn with_defer_delay(mut self, delay: Duration) -> Self {
        self.defer_delay = delay;
        self
    }

    /// Set the storage retry policy.
    #[must_use]
    pub fn with_storage_retry(mut self, policy: StorageRetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    /// Execute one claimed delivery attempt end to end.
    ///
    /// The row must be `in_flight`. All failure modes are recorded on the
    /// row or logged; this never propagates an error, so a bad webhook
    /// cannot take down a dispatch or sweep loop.
    pub async fn deliver(&self, delivery: &WebhookDelivery) {
        // Re-check current webhook state at send time.
        let webhook = match self
            .storage_retry
            .run("load_webhook", || {
                Webhook::find_by_id(&self.pool, delivery.webhook_id)
            })
            .await
        {
            Ok(Some(webhook)) => webhook,
            Ok(None) => {
                // Deleted after fan-out: fail fast, no retry slot consumed.
                self.fail_fast(delivery, "Webhook no longer exists").await;
                return;
            }
            Err(e) => {
                // Leave the row in_flight; the stale-claim janitor re-queues it.
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to load webhook for delivery"
                );
                return;
            }
        };

        if !webhook.is_active && delivery.attempt_number > 1 {
            // Deactivation cancels future retries but not a first attempt
            // that was already fanned out.
            self.fail_fast(delivery, "Webhook deactivated").await;
            return;
        }

        let event = match self
            .storage_retry
            .run("load_event", || {
                WebhookEvent::find_by_id(&self.pool, delivery.event_id)
            })
            .await
        {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.fail_fast(delivery, "Event record missing").await;
                return;
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to load event for delivery"
                );
                return;
            }
        };

        // Rate limit at send time; a deferral is not an attempt.
        if let Some(limit) = webhook.rate_limit_per_minute.filter(|l| *l > 0) {
            if !self.rate_limits.try_acquire(webhook.id, limit as u32).await {
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(self.defer_delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(5));
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    webhook_id = %webhook.id,
                    limit_per_minute = limit,
                    retry_at = %retry_at,
                    "Rate limit exhausted, deferring delivery"
                );
                if let Err(e) =
                    WebhookDelivery::mark_deferred(&self.pool, delivery.id, retry_at).await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        error = %e,
                        "Failed to defer rate-limited delivery"
                    );
                }
                return;
            }
        }

        self.execute(delivery, &webhook, &event).await;
    }

    /// Build, sign, send, classify, record.
    async fn execute(&self, delivery: &WebhookDelivery, webhook: &Webhook, event: &WebhookEvent) {
        let payload = DeliveryPayload {
            event_type: event.event_type.clone(),
            resource_type: event.resource_type.clone(),
            resource_id: event.resource_id.clone(),
            data: event.payload.clone(),
            delivered_at: Utc::now(),
        };

        let request_body = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                self.fail_fast(delivery, &format!("Failed to serialize payload: {e}"))
                    .await;
                return;
            }
        };
        let body_bytes = match serde_json::to_vec(&request_body) {
            Ok(b) => b,
            Err(e) => {
                self.fail_fast(delivery, &format!("Failed to serialize payload: {e}"))
                    .await;
                return;
            }
        };

        let secret = match crypto::decrypt_secret(&webhook.secret_encrypted, &self.encryption_key)
        {
            Ok(secret) => secret,
            Err(e) => {
                // Wrong engine key: retrying cannot help.
                self.fail_fast(delivery, &format!("Signing secret unavailable: {e}"))
                    .await;
                return;
            }
        };

        let timestamp = Utc::now().timestamp().to_string();
        let headers = build_headers(
            &secret,
            &timestamp,
            &body_bytes,
            webhook.custom_headers.as_ref(),
        );
        let request_headers = headers_to_json(&headers);

        let start = Instant::now();
        let result = self
            .http_client
            .post(&webhook.url)
            .headers(headers)
            .body(body_bytes)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis() as i32;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let response_headers = headers_to_json(response.headers());
                let body = truncate_response_body(response.text().await.unwrap_or_default());
                let snapshot = ResponseSnapshot {
                    status: Some(status as i16),
                    headers: Some(response_headers),
                    body: Some(body),
                };

                if is_success_status(status) {
                    self.record_success(delivery, webhook, &request_headers, &request_body, &snapshot, duration_ms)
                        .await;
                } else {
                    self.record_failure(
                        delivery,
                        webhook,
                        &format!("HTTP {status}"),
                        &request_headers,
                        &request_body,
                        snapshot,
                        duration_ms,
                    )
                    .await;
                }
            }
            Err(e) => {
                let error_message = if e.is_timeout() {
                    format!("Request timeout ({}s)", self.request_timeout.as_secs())
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };

                self.record_failure(
                    delivery,
                    webhook,
                    &error_message,
                    &request_headers,
                    &request_body,
                    ResponseSnapshot::default(),
                    duration_ms,
                )
                .await;
            }
        }
    }

    /// Successful attempt: terminal `success` row plus webhook counters.
    async fn record_success(
        &self,
        delivery: &WebhookDelivery,
        webhook: &Webhook,
        request_headers: &serde_json::Value,
        request_body: &serde_json::Value,
        response: &ResponseSnapshot,
        duration_ms: i32,
    ) {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            webhook_id = %webhook.id,
            event_id = %delivery.event_id,
            attempt_number = delivery.attempt_number,
            response_status = response.status.unwrap_or_default(),
            duration_ms,
            "Webhook delivery succeeded"
        );

        match WebhookDelivery::mark_success(
            &self.pool,
            delivery.id,
            Some(request_headers),
            Some(request_body),
            response,
            duration_ms,
        )
        .await
        {
            Ok(true) => {
                self.record_counters(webhook.id, true, false).await;
            }
            Ok(false) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    "Delivery row was no longer claimed when recording success"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to record delivery success"
                );
            }
        }
    }

    /// Failed attempt: schedule a retry or end the chain, then counters.
    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        &self,
        delivery: &WebhookDelivery,
        webhook: &Webhook,
        error_message: &str,
        request_headers: &serde_json::Value,
        request_body: &serde_json::Value,
        response: ResponseSnapshot,
        duration_ms: i32,
    ) {
        let plan = failure_plan(delivery.attempt_number, self.max_attempts, &self.backoff);

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            webhook_id = %webhook.id,
            event_id = %delivery.event_id,
            attempt_number = delivery.attempt_number,
            max_attempts = self.max_attempts,
            error = %error_message,
            will_retry = matches!(plan, FailurePlan::Retry(_)),
            "Webhook delivery failed"
        );

        let marked = match plan {
            FailurePlan::Retry(next_retry_at) => {
                WebhookDelivery::mark_retrying(
                    &self.pool,
                    delivery.id,
                    Some(request_headers),
                    Some(request_body),
                    &response,
                    error_message,
                    Some(duration_ms),
                    next_retry_at,
                )
                .await
            }
            FailurePlan::Terminal => {
                WebhookDelivery::mark_failed(
                    &self.pool,
                    delivery.id,
                    Some(request_headers),
                    Some(request_body),
                    &response,
                    error_message,
                    Some(duration_ms),
                )
                .await
            }
        };

        match marked {
            Ok(true) => {
                let terminal = matches!(plan, FailurePlan::Terminal);
                self.record_counters(webhook.id, false, terminal).await;
            }
            Ok(false) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    "Delivery row was no longer claimed when recording failure"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to record delivery failure"
                );
            }
        }
    }

    /// Terminal failure without an HTTP attempt (configuration errors).
    ///
    /// Consumes no retry slot and updates no counters: the chain ends, but
    /// the failure is the operator's, not the endpoint's.
    async fn fail_fast(&self, delivery: &WebhookDelivery, error_message: &str) {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            webhook_id = %delivery.webhook_id,
            attempt_number = delivery.attempt_number,
            error = %error_message,
            "Abandoning delivery without send"
        );

        if let Err(e) = WebhookDelivery::mark_failed(
            &self.pool,
            delivery.id,
            None,
            None,
            &ResponseSnapshot::default(),
            error_message,
            None,
        )
        .await
        {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to abandon delivery"
            );
        }
    }

    /// Advance the webhook's delivery counters.
    async fn record_counters(&self, webhook_id: uuid::Uuid, success: bool, terminal: bool) {
        let result = self
            .storage_retry
            .run("record_delivery", || {
                Webhook::record_delivery(&self.pool, webhook_id, success, terminal)
            })
            .await;

        if let Err(e) = result {
            tracing::error!(
                target: "webhook_delivery",
                webhook_id = %webhook_id,
                error = %e,
                "Failed to update webhook delivery counters"
            );
        }
    }

}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
