//! REST client integration tests
//!
//! The client talks to a scripted local HTTP server; nothing leaves the machine.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::sync::Arc;
use std::time::Duration;

use cord_common::{Backoff, ClientConfig, ClientError};
use cord_core::Snowflake;
use cord_http::RestClient;
use cord_ratelimit::RateLimiter;
use integration_tests::{MockApi, MockResponse, WAIT};
use serde_json::{json, Value};
use tokio::time::timeout;

const CREATE_MESSAGE: &str = "POST /channels/1/messages";

async fn setup() -> (MockApi, RestClient, Arc<RateLimiter>) {
    let api = MockApi::start().await.expect("Failed to start mock API");
    let mut config = ClientConfig::new("rest-token");
    config.rest.base_url = api.base_url();
    config.rest.max_retries = 2;

    let limiter = Arc::new(RateLimiter::new(
        config.rest.global_requests_per_second,
        config.gateway.identify_interval(),
    ));
    let client = RestClient::new(&config, Arc::clone(&limiter))
        .expect("Failed to build client")
        .with_backoff(Backoff::fixed(
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));
    (api, client, limiter)
}

fn message(content: &str) -> MockResponse {
    MockResponse::json(200, &json!({"id": "5", "channel_id": "1", "content": content}))
}

// ============================================================================
// Requests
// ============================================================================

#[tokio::test]
async fn test_sends_bot_authorization_and_body() {
    let (api, client, _) = setup().await;
    api.route(CREATE_MESSAGE, [message("hello")]);

    let created = client
        .create_message(Snowflake::new(1), "hello")
        .await
        .unwrap();
    assert_eq!(created["content"], "hello");

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("authorization"), Some("Bot rest-token"));
    assert!(requests[0]
        .header("user-agent")
        .is_some_and(|agent| agent.starts_with("DiscordBot")));
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body, json!({"content": "hello"}));
}

#[tokio::test]
async fn test_gateway_bot_metadata() {
    let (api, client, _) = setup().await;
    api.route(
        "GET /gateway/bot",
        [MockResponse::json(
            200,
            &json!({
                "url": "wss://gateway.example",
                "shards": 3,
                "session_start_limit": {
                    "total": 1000,
                    "remaining": 998,
                    "reset_after": 1000,
                    "max_concurrency": 1
                }
            }),
        )],
    );

    let info = client.gateway_bot().await.unwrap();
    assert_eq!(info.url, "wss://gateway.example");
    assert_eq!(info.shards, 3);
    assert_eq!(info.session_start_limit.remaining, 998);
}

// ============================================================================
// Rate limits
// ============================================================================

#[tokio::test]
async fn test_429_waits_retry_after_then_succeeds() {
    let (api, client, _) = setup().await;
    api.route(
        CREATE_MESSAGE,
        [
            MockResponse::json(
                429,
                &json!({
                    "message": "You are being rate limited.",
                    "retry_after": 0.2,
                    "global": false
                }),
            ),
            message("hi"),
        ],
    );

    client.create_message(Snowflake::new(1), "hi").await.unwrap();

    let requests = api.requests();
    assert_eq!(requests.len(), 2);
    let gap = requests[1].received_at - requests[0].received_at;
    assert!(gap >= Duration::from_millis(190), "retried after {gap:?}");
}

#[tokio::test]
async fn test_429_exhausts_retries() {
    let (api, client, _) = setup().await;
    let limited = MockResponse::json(429, &json!({"retry_after": 0.01, "global": false}));
    api.route(CREATE_MESSAGE, vec![limited; 3]);

    let err = client
        .create_message(Snowflake::new(1), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RateLimited { global: false, .. }));
    assert_eq!(api.requests().len(), 3);
}

#[tokio::test]
async fn test_exhausted_bucket_delays_next_request() {
    let (api, client, limiter) = setup().await;
    api.route(
        CREATE_MESSAGE,
        [
            message("one")
                .with_header("x-ratelimit-limit", "1")
                .with_header("x-ratelimit-remaining", "0")
                .with_header("x-ratelimit-reset-after", "0.3")
                .with_header("x-ratelimit-bucket", "abc123"),
            message("two"),
        ],
    );

    client.create_message(Snowflake::new(1), "one").await.unwrap();
    let snapshot = limiter.snapshot(CREATE_MESSAGE).unwrap();
    assert_eq!(snapshot.remaining, 0);
    assert_eq!(snapshot.bucket.as_deref(), Some("abc123"));

    client.create_message(Snowflake::new(1), "two").await.unwrap();
    let requests = api.requests();
    let gap = requests[1].received_at - requests[0].received_at;
    assert!(gap >= Duration::from_millis(250), "second request after {gap:?}");
}

#[tokio::test]
async fn test_responses_without_rate_limit_headers_do_not_block_route() {
    let (api, client, _) = setup().await;
    api.route(CREATE_MESSAGE, [message("one"), message("two"), message("three")]);

    let sends = async {
        for content in ["one", "two", "three"] {
            client.create_message(Snowflake::new(1), content).await?;
        }
        Ok::<_, ClientError>(())
    };
    timeout(WAIT, sends)
        .await
        .expect("route stayed blocked")
        .unwrap();
    assert_eq!(api.requests().len(), 3);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_server_error_is_retried() {
    let (api, client, _) = setup().await;
    api.route(CREATE_MESSAGE, [MockResponse::empty(502), message("ok")]);

    timeout(WAIT, client.create_message(Snowflake::new(1), "ok"))
        .await
        .expect("retry stayed blocked")
        .unwrap();
    assert_eq!(api.requests().len(), 2);
}

#[tokio::test]
async fn test_route_usable_after_client_error_without_headers() {
    let (api, client, _) = setup().await;
    api.route(
        CREATE_MESSAGE,
        [
            MockResponse::json(404, &json!({"message": "Unknown Channel", "code": 10003})),
            message("again"),
        ],
    );

    assert!(client.create_message(Snowflake::new(1), "hi").await.is_err());
    timeout(WAIT, client.create_message(Snowflake::new(1), "again"))
        .await
        .expect("route stayed blocked")
        .unwrap();
    assert_eq!(api.requests().len(), 2);
}

#[tokio::test]
async fn test_unauthorized_is_authentication_error() {
    let (api, client, _) = setup().await;
    api.route(
        CREATE_MESSAGE,
        [MockResponse::json(401, &json!({"message": "401: Unauthorized", "code": 0}))],
    );

    let err = client
        .create_message(Snowflake::new(1), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Authentication(_)));
    assert_eq!(api.requests().len(), 1);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (api, client, _) = setup().await;
    api.route(
        CREATE_MESSAGE,
        [MockResponse::json(404, &json!({"message": "Unknown Channel", "code": 10003}))],
    );

    let err = client
        .create_message(Snowflake::new(1), "hi")
        .await
        .unwrap_err();
    match err {
        ClientError::Http { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("Unknown Channel"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api.requests().len(), 1);
}
