//! Integration tests for concurrent delivery execution.

#![cfg(feature = "integration")]

mod common;

use std::sync::Arc;
use std::time::Instant;

use common::*;
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

/// Test: concurrent sends to a slow endpoint overlap instead of serializing.
#[tokio::test]
async fn test_concurrent_sends_overlap() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(DelayedResponder::new(200))
        .mount(&mock_server)
        .await;

    let sender = Arc::new(TestSender::new());
    let url = format!("{}/hook", mock_server.uri());

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let sender = sender.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            sender
                .deliver(&url, &match_found_payload(), SECRET_1)
                .await
                .unwrap()
                .status()
                .is_success()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    // Eight 200ms sends serialized would take 1.6s; concurrent execution
    // stays far under that.
    assert!(start.elapsed().as_millis() < 1_200);
}

/// Test: a semaphore bounds how many sends run at once.
#[tokio::test]
async fn test_semaphore_bounds_in_flight_sends() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(DelayedResponder::new(100))
        .mount(&mock_server)
        .await;

    let sender = Arc::new(TestSender::new());
    let url = format!("{}/hook", mock_server.uri());
    let permits = Arc::new(Semaphore::new(2));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..6 {
        let sender = sender.clone();
        let url = url.clone();
        let permit = permits.clone().acquire_owned().await.unwrap();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            sender
                .deliver(&url, &match_found_payload(), SECRET_1)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Six 100ms sends with two permits need at least three waves.
    assert!(start.elapsed().as_millis() >= 250);
}

/// Test: one dead endpoint does not block deliveries to a healthy one.
#[tokio::test]
async fn test_slow_endpoint_does_not_starve_others() {
    let slow_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(DelayedResponder::new(1_000))
        .mount(&slow_server)
        .await;

    let fast_server = MockServer::start().await;
    let fast_capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(fast_capture.clone())
        .mount(&fast_server)
        .await;

    let sender = Arc::new(TestSender::new());
    let slow_url = format!("{}/hook", slow_server.uri());
    let fast_url = format!("{}/hook", fast_server.uri());

    let slow = {
        let sender = sender.clone();
        tokio::spawn(async move {
            let _ = sender.deliver(&slow_url, &match_found_payload(), SECRET_1).await;
        })
    };

    let start = Instant::now();
    sender
        .deliver(&fast_url, &video_processed_payload(), SECRET_2)
        .await
        .unwrap();
    let fast_elapsed = start.elapsed();

    assert!(fast_elapsed.as_millis() < 500);
    assert_eq!(fast_capture.request_count(), 1);

    let _ = slow.await;
}
