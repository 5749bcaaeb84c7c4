//! Domain models for the webhook delivery pipeline.

pub mod webhook;
pub mod webhook_delivery;
pub mod webhook_event;

pub use webhook::{CreateWebhook, UpdateWebhook, Webhook};
pub use webhook_delivery::{
    CreateWebhookDelivery, DeliveryFilter, DeliveryStatus, ResponseSnapshot, WebhookDelivery,
};
pub use webhook_event::{CreateWebhookEvent, WebhookEvent};
