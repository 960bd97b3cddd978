//! Retry behaviour of `RetryingTransport` against a mock HTTP server.

use std::time::{Duration, Instant};

use chanop_slack::{RetryPolicy, RetryingTransport, Transport, TransportError};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy(retry_max: u32) -> RetryPolicy {
    RetryPolicy::new(retry_max, Duration::from_millis(1), Duration::from_millis(5))
}

fn request(server: &MockServer) -> reqwest::Request {
    reqwest::Client::new()
        .get(format!("{}/conversations.info", server.uri()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations.info"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(4)
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conversations.info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = RetryingTransport::new(reqwest::Client::new(), fast_policy(5));
    let response = transport.execute(request(&server)).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_server_errors_exhaust_attempt_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let transport = RetryingTransport::new(reqwest::Client::new(), fast_policy(3));
    let err = transport.execute(request(&server)).await.unwrap_err();

    assert!(err.is_exhausted());
    match err {
        TransportError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.contains("500"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let transport = RetryingTransport::new(reqwest::Client::new(), fast_policy(10));
    let response = transport.execute(request(&server)).await.unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_not_implemented_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(501))
        .expect(1)
        .mount(&server)
        .await;

    let transport = RetryingTransport::new(reqwest::Client::new(), fast_policy(10));
    let response = transport.execute(request(&server)).await.unwrap();
    assert_eq!(response.status(), 501);
}

#[tokio::test]
async fn test_retry_after_header_is_honoured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = RetryingTransport::new(reqwest::Client::new(), fast_policy(5));
    let started = Instant::now();
    transport.execute(request(&server)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_cancellation_aborts_pending_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let transport =
        RetryingTransport::new(reqwest::Client::new(), fast_policy(5)).with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = transport.execute(request(&server)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "60"))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let transport =
        RetryingTransport::new(reqwest::Client::new(), fast_policy(5)).with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = transport.execute(request(&server)).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_timed_out_attempt_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let policy = fast_policy(3).with_timeouts(Duration::from_millis(200), Duration::from_secs(1));
    let transport = RetryingTransport::from_policy(policy).unwrap();
    let response = transport.execute(request(&server)).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_timeouts_count_against_attempt_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&server)
        .await;

    let policy = fast_policy(3).with_timeouts(Duration::from_millis(200), Duration::from_secs(1));
    let transport = RetryingTransport::from_policy(policy).unwrap();
    let started = Instant::now();
    let err = transport.execute(request(&server)).await.unwrap_err();

    match err {
        TransportError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}
