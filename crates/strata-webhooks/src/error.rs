//! Error types for the webhook delivery engine.

use thiserror::Error;

/// Webhook engine error variants.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Webhook not found")]
    WebhookNotFound,

    #[error("Event not found")]
    EventNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid configuration for {var}: {reason}")]
    Config { var: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias for engine operations.
pub type WebhookResult<T> = Result<T, WebhookError>;
