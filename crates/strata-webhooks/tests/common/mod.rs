//! Common test utilities for strata-webhooks integration tests.
//!
//! Provides mock responders, fixtures, and a signing HTTP sender for
//! verifying the delivery contract without requiring a real database.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use strata_webhooks::models::DeliveryPayload;

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Standard test tenant IDs
pub const TENANT_A: Uuid = Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const TENANT_B: Uuid = Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

/// Standard test secrets
pub const SECRET_1: &str = "whsec_test_secret_key_12345";
pub const SECRET_2: &str = "whsec_another_secret_67890";

/// A `match.found` payload as the transport would build it.
pub fn match_found_payload() -> DeliveryPayload {
    DeliveryPayload {
        event_type: "match.found".to_string(),
        resource_type: Some("match".to_string()),
        resource_id: Some("m-1001".to_string()),
        data: serde_json::json!({
            "match_id": "m-1001",
            "score": 0.97
        }),
        delivered_at: Utc::now(),
    }
}

/// A `video.processed` payload with no resource fields.
pub fn video_processed_payload() -> DeliveryPayload {
    DeliveryPayload {
        event_type: "video.processed".to_string(),
        resource_type: None,
        resource_id: None,
        data: serde_json::json!({
            "video_id": "v-77",
            "duration_secs": 212
        }),
        delivered_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting delivery requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    /// Create a new capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Create a capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            timestamp: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    /// Create a responder that fails `n` times with 500, then returns 200.
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code: 500,
        }
    }

    /// Get the current attempt count.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

/// A wiremock responder that adds a delay before responding.
#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
}

impl DelayedResponder {
    /// Create a responder that delays for `ms` milliseconds, then returns 200.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            response_code: 200,
        }
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(self.response_code)
            .set_delay(std::time::Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Independent signature verification
// ---------------------------------------------------------------------------

/// Recompute the contract signature from first principles.
///
/// Deliberately independent of the crate's crypto module: these tests prove
/// a subscriber can verify deliveries with nothing but the documented
/// contract (`hex(hmac_sha256(secret, timestamp + "." + body))`).
pub fn compute_contract_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Verify a captured delivery's signature against the documented contract.
pub fn verify_captured_signature(request: &CapturedRequest, secret: &str) -> bool {
    let Some(signature) = request.header("x-signature") else {
        return false;
    };
    let Some(timestamp) = request.header("x-timestamp") else {
        return false;
    };

    signature == compute_contract_signature(secret, timestamp, &request.body)
}

// ---------------------------------------------------------------------------
// TestSender - signing HTTP client matching the transport's wire behavior
// ---------------------------------------------------------------------------

/// Signing HTTP sender used to exercise the delivery contract directly.
pub struct TestSender {
    client: reqwest::Client,
}

impl TestSender {
    /// Create a sender with the engine's default timeout.
    pub fn new() -> Self {
        Self::with_timeout_ms(10_000)
    }

    /// Create a sender with a custom timeout.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(timeout_ms))
                .redirect(reqwest::redirect::Policy::limited(1))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Send a signed delivery to a URL.
    pub async fn deliver(
        &self,
        url: &str,
        payload: &DeliveryPayload,
        secret: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let body = serde_json::to_vec(payload).expect("Failed to serialize payload");
        let timestamp = Utc::now().timestamp().to_string();
        let signature = strata_webhooks::crypto::compute_signature(secret, &timestamp, &body);

        self.client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Timestamp", &timestamp)
            .header("X-Signature", signature)
            .body(body)
            .send()
            .await
    }
}

impl Default for TestSender {
    fn default() -> Self {
        Self::new()
    }
}
