//! Webhook event delivery engine.
//!
//! Captures domain events and reliably pushes them to registered HTTP
//! endpoints: subscription registry, event capture, fan-out dispatch,
//! HMAC-SHA256 signed transport with bounded timeouts, and an exponential
//! backoff retry scheduler guaranteeing at-least-once delivery under
//! partial failure.

pub mod backoff;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod models;
pub mod rate_limiter;
pub mod services;
pub mod validation;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use config::WebhookConfig;
pub use engine::WebhookEngine;
pub use error::{WebhookError, WebhookResult};
pub use models::{DeliveryPayload, EmitEvent, WebhookEventType};
pub use rate_limiter::{RateLimiter, RateLimiterRegistry};
pub use services::{Dispatcher, EventService, RegistryService, Transport};
pub use worker::{DeliveryWorker, WorkerConfig};
