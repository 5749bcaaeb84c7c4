//! Engine configuration from environment variables.

use std::env;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::WebhookError;

/// Default HTTP request timeout for deliveries, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default maximum delivery attempts per (webhook, event) chain.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Default delay before re-trying a rate-limit-deferred attempt, in seconds.
pub const DEFAULT_DEFER_DELAY_SECS: u64 = 5;

/// Default cap on concurrently executing HTTP sends.
pub const DEFAULT_SEND_CONCURRENCY: usize = 32;

/// Configuration for the webhook delivery engine.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// 32-byte AES-256-GCM key for secrets at rest.
    pub encryption_key: Vec<u8>,
    /// Allow plain-HTTP destination URLs (development only).
    pub allow_http: bool,
    /// Per-request timeout for delivery HTTP calls.
    pub request_timeout_secs: u64,
    /// Maximum attempts per delivery chain before terminal failure.
    pub max_attempts: i32,
    /// Fixed deferral delay applied when a webhook's rate limit is exhausted.
    pub defer_delay_secs: u64,
    /// Bound on concurrently executing sends during fan-out.
    pub send_concurrency: usize,
}

impl WebhookConfig {
    /// Load configuration from the environment.
    ///
    /// Required: `DATABASE_URL`, `WEBHOOK_ENCRYPTION_KEY` (base64, 32 bytes).
    /// Everything else has a default.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Config` naming the offending variable.
    pub fn from_env() -> Result<Self, WebhookError> {
        let database_url = required_var("DATABASE_URL")?;

        let key_b64 = required_var("WEBHOOK_ENCRYPTION_KEY")?;
        let encryption_key = parse_encryption_key(&key_b64)?;

        Ok(Self {
            database_url,
            encryption_key,
            allow_http: bool_var("WEBHOOK_ALLOW_HTTP", false)?,
            request_timeout_secs: parsed_var(
                "WEBHOOK_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
            max_attempts: parsed_var("WEBHOOK_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            defer_delay_secs: parsed_var("WEBHOOK_DEFER_DELAY_SECS", DEFAULT_DEFER_DELAY_SECS)?,
            send_concurrency: parsed_var("WEBHOOK_SEND_CONCURRENCY", DEFAULT_SEND_CONCURRENCY)?,
        })
    }

    /// Build a config programmatically (tests, embedding applications).
    pub fn new(database_url: impl Into<String>, encryption_key: Vec<u8>) -> Self {
        Self {
            database_url: database_url.into(),
            encryption_key,
            allow_http: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            defer_delay_secs: DEFAULT_DEFER_DELAY_SECS,
            send_concurrency: DEFAULT_SEND_CONCURRENCY,
        }
    }
}

/// Decode and validate the base64 encryption key.
fn parse_encryption_key(encoded: &str) -> Result<Vec<u8>, WebhookError> {
    let key = BASE64.decode(encoded).map_err(|e| WebhookError::Config {
        var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
        reason: format!("invalid base64: {e}"),
    })?;

    if key.len() != 32 {
        return Err(WebhookError::Config {
            var: "WEBHOOK_ENCRYPTION_KEY".to_string(),
            reason: format!("expected 32 bytes, got {}", key.len()),
        });
    }

    Ok(key)
}

fn required_var(var: &str) -> Result<String, WebhookError> {
    env::var(var).map_err(|_| WebhookError::Config {
        var: var.to_string(),
        reason: "not set".to_string(),
    })
}

fn bool_var(var: &str, default: bool) -> Result<bool, WebhookError> {
    match env::var(var) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(WebhookError::Config {
                var: var.to_string(),
                reason: format!("expected a boolean, got {other}"),
            }),
        },
        Err(_) => Ok(default),
    }
}

fn parsed_var<T: std::str::FromStr>(var: &str, default: T) -> Result<T, WebhookError>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(v) => v.parse().map_err(|e: T::Err| WebhookError::Config {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
