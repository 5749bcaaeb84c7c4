//! Engine wiring: constructs the services against one pool and config.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::config::WebhookConfig;
use crate::error::WebhookError;
use crate::models::EmitEvent;
use crate::services::{Dispatcher, EventService, RegistryService, Transport};
use crate::worker::{DeliveryWorker, WorkerConfig};
use strata_db::models::WebhookEvent;

/// The assembled webhook delivery engine.
///
/// External collaborators use exactly three entry points: the registry
/// (register webhooks), [`WebhookEngine::emit`] (capture + fan out an
/// event), and the registry's delivery history query. Everything else runs
/// inside the worker.
#[derive(Clone)]
pub struct WebhookEngine {
    pool: PgPool,
    registry: RegistryService,
    events: EventService,
    dispatcher: Arc<Dispatcher>,
}

impl WebhookEngine {
    /// Wire up the engine against an existing pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(pool: PgPool, config: &WebhookConfig) -> Result<Self, WebhookError> {
        let transport = Arc::new(
            Transport::new(
                pool.clone(),
                config.encryption_key.clone(),
                Duration::from_secs(config.request_timeout_secs),
            )?
            .with_max_attempts(config.max_attempts)
            .with_defer_delay(Duration::from_secs(config.defer_delay_secs)),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            pool.clone(),
            transport,
            config.send_concurrency,
        ));

        let registry = RegistryService::new(pool.clone(), config.encryption_key.clone())
            .with_allow_http(config.allow_http);
        let events = EventService::new(pool.clone());

        Ok(Self {
            pool,
            registry,
            events,
            dispatcher,
        })
    }

    /// Capture an event and fan it out synchronously.
    ///
    /// Fan-out failure does not fail the capture: the event stays
    /// unprocessed and the worker's catch-up tick re-dispatches it.
    pub async fn emit(&self, request: EmitEvent) -> Result<WebhookEvent, WebhookError> {
        let event = self.events.emit(request).await?;

        if let Err(e) = self.dispatcher.dispatch_event(&event).await {
            tracing::error!(
                target: "webhook_delivery",
                event_id = %event.id,
                error = %e,
                "Synchronous fan-out failed, leaving event for catch-up sweep"
            );
        }

        Ok(event)
    }

    /// Build the background worker for this engine.
    #[must_use]
    pub fn worker(&self, config: WorkerConfig) -> DeliveryWorker {
        DeliveryWorker::new(self.pool.clone(), self.dispatcher.clone(), config)
    }

    /// The subscription registry.
    #[must_use]
    pub fn registry(&self) -> &RegistryService {
        &self.registry
    }

    /// The event capture service.
    #[must_use]
    pub fn events(&self) -> &EventService {
        &self.events
    }

    /// The fan-out dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher.as_ref()
    }
}
