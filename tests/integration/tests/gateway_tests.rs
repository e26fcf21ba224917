//! Gateway integration tests
//!
//! A full client (REST metadata, coordinator, WebSocket sessions, dispatcher) runs against a local
//! WebSocket gateway and a scripted HTTP API.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;

use cord_common::{ClientConfig, ShardCount};
use cord_core::Snowflake;
use cord_gateway::protocol::{GatewayMessage, OpCode};
use cord_gateway::{
    EventDispatcher, SessionState, ShardCoordinator, ShardStatus, WebSocketConnector,
};
use cord_http::RestClient;
use cord_ratelimit::RateLimiter;
use integration_tests::{GatewayConnection, MockApi, MockGateway, MockResponse, WAIT};
use serde_json::{json, Value};
use tokio::sync::mpsc;

const TOKEN: &str = "integration-token";

struct Client {
    coordinator: ShardCoordinator,
    messages: mpsc::UnboundedReceiver<Value>,
    statuses: mpsc::UnboundedReceiver<(u32, ShardStatus)>,
    _api: MockApi,
}

/// Coordinator wired to the local gateway through real REST and WebSocket clients
async fn client(gateway: &MockGateway, shards: u32) -> Client {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.route(
        "GET /gateway/bot",
        [MockResponse::json(
            200,
            &json!({
                "url": gateway.url(),
                "shards": shards,
                "session_start_limit": {
                    "total": 1000,
                    "remaining": 1000,
                    "reset_after": 60000,
                    "max_concurrency": 16
                }
            }),
        )],
    );

    let mut config = ClientConfig::new(TOKEN);
    config.rest.base_url = api.base_url();
    config.gateway.shard_spawn_delay_ms = 10;
    config.gateway.shutdown_grace_ms = 1_000;

    let limiter = Arc::new(RateLimiter::new(
        config.rest.global_requests_per_second,
        config.gateway.identify_interval(),
    ));
    let rest = Arc::new(
        RestClient::new(&config, Arc::clone(&limiter)).expect("Failed to build client"),
    );

    let dispatcher = Arc::new(EventDispatcher::new(config.gateway.extra_intents));
    let (message_tx, messages) = mpsc::unbounded_channel();
    dispatcher.register_handler("MESSAGE_CREATE", move |event| {
        let tx = message_tx.clone();
        async move {
            let _ = tx.send(event.data.clone());
            Ok(())
        }
    });

    let (status_tx, statuses) = mpsc::unbounded_channel();
    let coordinator = ShardCoordinator::new(
        config,
        rest,
        Arc::new(WebSocketConnector),
        limiter,
        dispatcher,
    )
    .with_status_callback(move |shard_id, status| {
        let _ = status_tx.send((shard_id, status.clone()));
    });

    Client {
        coordinator,
        messages,
        statuses,
        _api: api,
    }
}

fn ready(session_id: &str, resume_url: &str, guilds: &[u64]) -> GatewayMessage {
    let guilds: Vec<Value> = guilds
        .iter()
        .map(|id| json!({"id": id.to_string(), "unavailable": true}))
        .collect();
    GatewayMessage::dispatch(
        "READY",
        1,
        json!({
            "v": 10,
            "session_id": session_id,
            "resume_gateway_url": resume_url,
            "guilds": guilds,
        }),
    )
}

fn message_create(sequence: u64, content: &str) -> GatewayMessage {
    GatewayMessage::dispatch(
        "MESSAGE_CREATE",
        sequence,
        json!({"id": "900", "channel_id": "1", "content": content}),
    )
}

/// Hello, Identify, READY on a fresh connection. Returns the shard pair from the Identify.
async fn identify(connection: &mut GatewayConnection, ready: &GatewayMessage) -> [u32; 2] {
    connection.send(&GatewayMessage::hello(45_000)).await.unwrap();
    let identify = connection
        .expect_op(OpCode::Identify, WAIT)
        .await
        .unwrap()
        .as_identify()
        .unwrap();
    assert_eq!(identify.token, TOKEN);
    connection.send(ready).await.unwrap();
    identify.shard
}

async fn wait_connected(client: &Client, shard_id: u32) {
    let handle = client.coordinator.shard(shard_id).unwrap();
    let connected = tokio::time::timeout(WAIT, handle.wait_for_state(SessionState::Connected))
        .await
        .unwrap();
    assert!(connected);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_identify_dispatch_and_shutdown() {
    let mut gateway = MockGateway::start().await.unwrap();
    let mut client = client(&gateway, 1).await;
    client.coordinator.start(ShardCount::Auto).await.unwrap();

    let mut connection = gateway.next_connection(WAIT).await.unwrap();
    assert!(connection.path.contains("v=10"));
    assert!(connection.path.contains("encoding=json"));

    let ready = ready("session-a", &gateway.url(), &[100_000_000_000_000_000]);
    assert_eq!(identify(&mut connection, &ready).await, [0, 1]);
    wait_connected(&client, 0).await;

    connection.send(&message_create(2, "over the wire")).await.unwrap();
    let data = tokio::time::timeout(WAIT, client.messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data["content"], "over the wire");
    assert_eq!(client.coordinator.shard(0).unwrap().sequence(), Some(2));

    tokio::time::timeout(WAIT, async {
        while client.coordinator.assignment().guild_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let owner = client
        .coordinator
        .shard_for_guild(Snowflake::new(100_000_000_000_000_000))
        .map(|handle| handle.shard_id());
    assert_eq!(owner, Some(0));

    let (_, code) = tokio::join!(
        client.coordinator.shutdown(),
        connection.expect_close(WAIT)
    );
    assert_eq!(code.unwrap(), Some(1000));
    assert_eq!(client.coordinator.status(0), Some(ShardStatus::Stopped));
}

#[tokio::test]
async fn test_resumes_at_resume_url_after_close() {
    let mut gateway = MockGateway::start().await.unwrap();
    let mut client = client(&gateway, 1).await;
    client.coordinator.start(ShardCount::Fixed(1)).await.unwrap();

    let mut connection = gateway.next_connection(WAIT).await.unwrap();
    let resume_url = format!("{}/resume", gateway.url());
    identify(&mut connection, &ready("session-r", &resume_url, &[])).await;
    wait_connected(&client, 0).await;

    connection.send(&message_create(2, "before")).await.unwrap();
    tokio::time::timeout(WAIT, client.messages.recv())
        .await
        .unwrap()
        .unwrap();

    connection.close(4000).await.unwrap();

    let mut resumed = gateway.next_connection(WAIT).await.unwrap();
    assert!(resumed.path.starts_with("/resume"), "path {}", resumed.path);
    resumed.send(&GatewayMessage::hello(45_000)).await.unwrap();
    let resume = resumed
        .expect_op(OpCode::Resume, WAIT)
        .await
        .unwrap()
        .as_resume()
        .unwrap();
    assert_eq!(resume.token, TOKEN);
    assert_eq!(resume.session_id, "session-r");
    assert_eq!(resume.seq, 2);

    resumed.send(&message_create(3, "replayed")).await.unwrap();
    resumed
        .send(&GatewayMessage::dispatch("RESUMED", 4, json!({})))
        .await
        .unwrap();
    wait_connected(&client, 0).await;

    let data = tokio::time::timeout(WAIT, client.messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data["content"], "replayed");

    let (_, code) = tokio::join!(client.coordinator.shutdown(), resumed.expect_close(WAIT));
    assert_eq!(code.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_authentication_failure_stops_every_shard() {
    let mut gateway = MockGateway::start().await.unwrap();
    let mut client = client(&gateway, 2).await;
    client.coordinator.start(ShardCount::Auto).await.unwrap();

    let mut first = gateway.next_connection(WAIT).await.unwrap();
    let mut second = gateway.next_connection(WAIT).await.unwrap();
    first.send(&GatewayMessage::hello(45_000)).await.unwrap();
    first.expect_op(OpCode::Identify, WAIT).await.unwrap();
    first.close(4004).await.unwrap();

    // The other shard is torn down without ever identifying
    let code = second.expect_close(WAIT).await.unwrap();
    assert_ne!(code, Some(4000));

    let failed = tokio::time::timeout(WAIT, async {
        while let Some((_, status)) = client.statuses.recv().await {
            if status.is_failed() {
                return status;
            }
        }
        ShardStatus::Stopped
    })
    .await
    .unwrap();
    assert!(failed.is_failed());

    client.coordinator.shutdown().await;
}
