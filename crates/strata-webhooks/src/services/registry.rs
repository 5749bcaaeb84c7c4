//! Webhook subscription registry.
//!
//! Owner-scoped CRUD over webhook subscriptions with URL/SSRF validation,
//! event type validation, secret generation and at-rest encryption, plus the
//! delivery history query surface. The plaintext secret leaves this module
//! exactly once, in the creation response.

use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    CreateWebhookRequest, CreatedWebhook, UpdateWebhookRequest, WebhookListResponse,
    WebhookResponse,
};
use crate::validation;
use strata_db::models::{
    CreateWebhook, DeliveryFilter, UpdateWebhook, Webhook, WebhookDelivery,
};

/// Service for webhook subscription operations.
#[derive(Clone)]
pub struct RegistryService {
    pool: PgPool,
    encryption_key: Vec<u8>,
    allow_http: bool,
}

impl RegistryService {
    /// Create a new registry service.
    #[must_use]
    pub fn new(pool: PgPool, encryption_key: Vec<u8>) -> Self {
        Self {
            pool,
            encryption_key,
            allow_http: false,
        }
    }

    /// Allow HTTP URLs (for development/testing).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Register a new webhook.
    ///
    /// Generates a random secret when the caller supplies none. The returned
    /// [`CreatedWebhook`] is the only place the plaintext secret appears.
    pub async fn create(
        &self,
        user_id: Uuid,
        request: CreateWebhookRequest,
    ) -> Result<CreatedWebhook, WebhookError> {
        validation::validate_webhook_url(&request.url, self.allow_http)?;
        validation::validate_event_types(&request.event_types)?;
        validation::validate_rate_limit(request.rate_limit_per_minute)?;

        let secret = match request.secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => crypto::generate_secret(),
        };
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let webhook = Webhook::create(
            &self.pool,
            CreateWebhook {
                user_id,
                tenant_id: request.tenant_id,
                url: request.url,
                secret_encrypted,
                event_types: request.event_types,
                rate_limit_per_minute: request.rate_limit_per_minute,
                custom_headers: request.custom_headers,
            },
        )
        .await?;

        tracing::info!(
            target: "webhook_delivery",
            webhook_id = %webhook.id,
            user_id = %user_id,
            event_types = webhook.event_types.len(),
            "Webhook registered"
        );

        Ok(CreatedWebhook {
            webhook: webhook.into(),
            secret,
        })
    }

    /// List an owner's webhooks with pagination.
    pub async fn list(
        &self,
        user_id: Uuid,
        active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<WebhookListResponse, WebhookError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);

        let webhooks = Webhook::list_by_owner(&self.pool, user_id, active, limit, offset).await?;
        let total = Webhook::count_by_owner(&self.pool, user_id, active).await?;

        Ok(WebhookListResponse {
            items: webhooks.into_iter().map(WebhookResponse::from).collect(),
            total,
            limit,
            offset,
        })
    }

    /// Fetch a single webhook owned by the given user.
    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<WebhookResponse, WebhookError> {
        let webhook = self.find_owned(user_id, id).await?;
        Ok(webhook.into())
    }

    /// Apply a partial update to an owned webhook.
    ///
    /// The secret cannot be changed; it has no field on the request.
    pub async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        request: UpdateWebhookRequest,
    ) -> Result<WebhookResponse, WebhookError> {
        if let Some(ref url) = request.url {
            validation::validate_webhook_url(url, self.allow_http)?;
        }
        if let Some(ref event_types) = request.event_types {
            validation::validate_event_types(event_types)?;
        }
        validation::validate_rate_limit(request.rate_limit_per_minute)?;

        // Ownership check before touching the row.
        self.find_owned(user_id, id).await?;

        let updated = Webhook::update(
            &self.pool,
            id,
            UpdateWebhook {
                url: request.url,
                event_types: request.event_types,
                is_active: request.is_active,
                rate_limit_per_minute: request.rate_limit_per_minute,
                custom_headers: request.custom_headers,
            },
        )
        .await?
        .ok_or(WebhookError::WebhookNotFound)?;

        Ok(updated.into())
    }

    /// Delete an owned webhook.
    ///
    /// In-flight attempts are not cancelled, but the transport re-checks
    /// webhook existence before every send, so nothing further goes out.
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), WebhookError> {
        self.find_owned(user_id, id).await?;

        let deleted = Webhook::delete(&self.pool, id).await?;
        if !deleted {
            return Err(WebhookError::WebhookNotFound);
        }

        tracing::info!(
            target: "webhook_delivery",
            webhook_id = %id,
            user_id = %user_id,
            "Webhook deleted"
        );
        Ok(())
    }

    /// Query delivery history, newest first.
    pub async fn delivery_history(
        &self,
        filter: &DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);

        let deliveries = WebhookDelivery::list(&self.pool, filter, limit, offset).await?;
        Ok(deliveries)
    }

    async fn find_owned(&self, user_id: Uuid, id: Uuid) -> Result<Webhook, WebhookError> {
        let webhook = Webhook::find_by_id(&self.pool, id)
            .await?
            .ok_or(WebhookError::WebhookNotFound)?;

        if webhook.user_id != user_id {
            return Err(WebhookError::WebhookNotFound);
        }
        Ok(webhook)
    }
}
