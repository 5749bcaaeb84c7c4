//! Integration tests for retry behavior against a flaky endpoint.

#![cfg(feature = "integration")]

mod common;

use common::*;
use strata_webhooks::backoff::BackoffPolicy;
use strata_webhooks::services::transport::{failure_plan, FailurePlan};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

/// Test: a 5xx response leaves the endpoint due for retry.
#[tokio::test]
async fn test_5xx_response_schedules_retry() {
    let mock_server = MockServer::start().await;
    let capture = CaptureResponder::with_status(500);

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(capture.clone())
        .mount(&mock_server)
        .await;

    let sender = TestSender::new();
    let url = format!("{}/hook", mock_server.uri());
    let response = sender
        .deliver(&url, &match_found_payload(), SECRET_1)
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 500);
    assert_eq!(capture.request_count(), 1);

    // Attempt 1 of 5 plans a retry roughly 30s out.
    match failure_plan(1, 5, &BackoffPolicy::default()) {
        FailurePlan::Retry(at) => {
            let delay = at - chrono::Utc::now();
            assert!(delay >= chrono::Duration::seconds(28));
            assert!(delay <= chrono::Duration::seconds(37));
        }
        FailurePlan::Terminal => panic!("first failure must schedule a retry"),
    }
}

/// Test: an endpoint that recovers stops failing after enough attempts.
#[tokio::test]
async fn test_eventual_success_after_failures() {
    let mock_server = MockServer::start().await;
    let failing = FailingResponder::fail_times(2);

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(failing.clone())
        .mount(&mock_server)
        .await;

    let sender = TestSender::new();
    let payload = match_found_payload();
    let url = format!("{}/hook", mock_server.uri());

    // Attempts 1 and 2: 500.
    assert_eq!(
        sender.deliver(&url, &payload, SECRET_1).await.unwrap().status().as_u16(),
        500
    );
    assert_eq!(
        sender.deliver(&url, &payload, SECRET_1).await.unwrap().status().as_u16(),
        500
    );

    // Attempt 3: recovered.
    assert!(sender
        .deliver(&url, &payload, SECRET_1)
        .await
        .unwrap()
        .status()
        .is_success());

    assert_eq!(failing.attempt_count(), 3);
}

/// Test: the failure plan becomes terminal exactly at max attempts.
#[tokio::test]
async fn test_retries_exhaust_at_max_attempts() {
    let backoff = BackoffPolicy::default();

    assert!(matches!(failure_plan(4, 5, &backoff), FailurePlan::Retry(_)));
    assert_eq!(failure_plan(5, 5, &backoff), FailurePlan::Terminal);
    assert_eq!(failure_plan(9, 5, &backoff), FailurePlan::Terminal);
}

/// Test: retry delays grow per attempt until the cap.
#[tokio::test]
async fn test_backoff_grows_per_attempt() {
    let backoff = BackoffPolicy::default();
    let expected_min = [30u64, 60, 120, 240];

    for (attempt, min_secs) in (1..=4).zip(expected_min) {
        let (min, max) = backoff.delay_bounds(attempt);
        assert_eq!(min.as_secs(), min_secs, "attempt {attempt}");
        assert!(max.as_secs() <= min_secs + min_secs / 5 + 1);
    }
}
