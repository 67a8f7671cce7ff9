//! HTTP and WebSocket end-to-end tests
//!
//! Binds the real server on an ephemeral port with the in-memory store and
//! talks to it with reqwest and a tokio-tungstenite client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use leaderboard::config::Args;
use leaderboard::server::{self, AppState};
use leaderboard::store::{MemoryScoreStore, ScoreStore, User};

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    users: Vec<User>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/socket", self.addr)
    }
}

async fn spawn_server(extra_args: &[&str], names: &[&str]) -> TestServer {
    let mut argv = vec!["leaderboard", "--store", "memory", "--listen", "127.0.0.1:0"];
    argv.extend_from_slice(extra_args);
    let args = Args::try_parse_from(argv).unwrap();

    let store = Arc::new(MemoryScoreStore::new());
    let mut users = Vec::new();
    for name in names {
        users.push(store.create_user(name).await.unwrap());
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(args, store));
    tokio::spawn(server::serve(listener, Arc::clone(&state)));

    TestServer { addr, state, users }
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a websocket frame")
            .expect("websocket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

// =============================================================================
// POST /claim
// =============================================================================

#[tokio::test]
async fn test_claim_returns_user_and_rankings() {
    let server = spawn_server(&[], &["Alice", "Bob"]).await;
    let alice = &server.users[0];

    let response = reqwest::Client::new()
        .post(server.url("/claim"))
        .json(&json!({ "userId": alice.id.as_str() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Points claimed successfully");
    assert_eq!(body["user"]["_id"], alice.id.as_str());
    assert_eq!(body["user"]["history"].as_array().unwrap().len(), 1);

    let points = body["user"]["points"].as_u64().unwrap();
    assert!((1..=10).contains(&points));
    assert_eq!(body["user"]["history"][0]["pointsAwarded"].as_u64(), Some(points));

    let rankings = body["rankings"].as_array().unwrap();
    assert_eq!(rankings.len(), 2);
    assert_eq!(rankings[0]["_id"], alice.id.as_str());
    assert_eq!(rankings[0]["points"].as_u64(), Some(points));
}

#[tokio::test]
async fn test_claim_rejections() {
    let server = spawn_server(&[], &["Alice"]).await;
    let client = reqwest::Client::new();

    // Missing userId
    let response = client
        .post(server.url("/claim"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "UserId is required" }));

    // Malformed JSON
    let response = client
        .post(server.url("/claim"))
        .header("Content-Type", "application/json")
        .body("{\"userId\":")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown user
    let response = client
        .post(server.url("/claim"))
        .json(&json!({ "userId": "000000000000000000000000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "User not found" }));

    // Nothing was awarded
    let rankings: Value = client
        .get(server.url("/rankings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rankings[0]["points"], 0);
    assert_eq!(server.state.broadcaster().broadcast_count(), 0);
}

#[tokio::test]
async fn test_claim_with_idempotency_key_replays() {
    let server = spawn_server(&[], &["Alice"]).await;
    let alice = &server.users[0];
    let client = reqwest::Client::new();

    let mut bodies = Vec::new();
    for _ in 0..2 {
        let response = client
            .post(server.url("/claim"))
            .header("Idempotency-Key", "claim-abc")
            .json(&json!({ "userId": alice.id.as_str() }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        bodies.push(response.json::<Value>().await.unwrap());
    }

    assert_eq!(bodies[0]["user"]["points"], bodies[1]["user"]["points"]);

    let history: Value = client
        .get(server.url(&format!("/history/{}", alice.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["history"].as_array().unwrap().len(), 1);
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_rankings_and_history() {
    let server = spawn_server(&[], &["Alice", "Bob", "Carol"]).await;
    let client = reqwest::Client::new();
    let bob = &server.users[1];

    for _ in 0..3 {
        client
            .post(server.url("/claim"))
            .json(&json!({ "userId": bob.id.as_str() }))
            .send()
            .await
            .unwrap();
    }

    let rankings: Vec<Value> = client
        .get(server.url("/rankings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rankings.len(), 3);
    assert_eq!(rankings[0]["_id"], bob.id.as_str());
    assert_eq!(rankings[0]["name"], "Bob");
    // Ties keep creation order
    assert_eq!(rankings[1]["name"], "Alice");
    assert_eq!(rankings[2]["name"], "Carol");

    let history: Value = client
        .get(server.url(&format!("/history/{}", bob.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["name"], "Bob");
    let entries = history["history"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    let total: u64 = entries
        .iter()
        .map(|e| e["pointsAwarded"].as_u64().unwrap())
        .sum();
    assert_eq!(rankings[0]["points"].as_u64(), Some(total));

    let response = client
        .get(server.url("/history/000000000000000000000000"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_health_and_preflight() {
    let server = spawn_server(&[], &[]).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["healthy"], true);
    assert_eq!(health["store"], "memory");

    let response = client.get(server.url("/ready")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .request(reqwest::Method::OPTIONS, server.url("/claim"))
        .header("Origin", "https://app.example")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let response = client.get(server.url("/nope")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

// =============================================================================
// Realtime
// =============================================================================

#[tokio::test]
async fn test_socket_receives_sync_then_claim_update() {
    let server = spawn_server(&[], &["Alice", "Bob"]).await;
    let bob = &server.users[1];

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();

    let initial = next_json(&mut ws).await;
    assert_eq!(initial["event"], "updateRankings");
    assert_eq!(initial["data"].as_array().unwrap().len(), 2);

    let body: Value = reqwest::Client::new()
        .post(server.url("/claim"))
        .json(&json!({ "userId": bob.id.as_str() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let update = next_json(&mut ws).await;
    assert_eq!(update["event"], "updateRankings");
    assert_eq!(update["data"], body["rankings"]);
    assert_eq!(update["data"][0]["_id"], bob.id.as_str());
}

#[tokio::test]
async fn test_socket_ping_pong_and_disconnect() {
    let server = spawn_server(&["--sync-on-connect", "false"], &["Alice"]).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();
    assert_eq!(server.state.broadcaster().subscriber_count(), 1);

    ws.send(Message::Text(r#"{"event":"ping"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await, json!({ "event": "pong" }));

    ws.close(None).await.unwrap();

    // The registry drops the subscriber once the socket task notices
    let mut remaining = 1;
    for _ in 0..50 {
        remaining = server.state.broadcaster().subscriber_count();
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_socket_rejects_disallowed_origin() {
    let server = spawn_server(&["--cors-allow-origin", "https://app.example"], &[]).await;

    let response = reqwest::Client::new()
        .get(server.url("/socket"))
        .header("Origin", "https://evil.example")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(server.state.broadcaster().subscriber_count(), 0);
}
