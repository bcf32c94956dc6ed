#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use agora_gateway::auth::tokens::AccessClaims;
use agora_gateway::config::Config;
use agora_gateway::db::store::MemoryStore;
use agora_gateway::models::stream::LiveStream;
use agora_gateway::push::PushDispatcher;
use agora_gateway::AppState;

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push dispatcher that records every push and accepts them all.
#[derive(Default)]
pub struct RecordingPush {
    pub sent: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl PushDispatcher for RecordingPush {
    async fn send_push(&self, user_id: &str, payload: &Value) -> bool {
        self.sent.lock().push((user_id.to_string(), payload.clone()));
        true
    }
}

impl RecordingPush {
    pub fn pushed_to(&self, user_id: &str) -> usize {
        self.sent.lock().iter().filter(|(u, _)| u == user_id).count()
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub push: Arc<RecordingPush>,
}

pub fn test_config() -> Config {
    Config::with_secret(TEST_SECRET)
}

pub fn test_context() -> TestContext {
    test_context_with(test_config())
}

pub fn test_context_with(config: Config) -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let state = AppState::new(config, store.clone(), push.clone());
    TestContext { state, store, push }
}

/// Router with state attached, for `axum_test::TestServer`.
pub fn test_app(ctx: &TestContext) -> Router {
    agora_gateway::routes::router().with_state(ctx.state.clone())
}

/// Start an actual TCP server for WebSocket testing. The server runs in
/// the background until the test's runtime shuts down.
pub async fn start_server(ctx: &TestContext) -> SocketAddr {
    let app = test_app(ctx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn claims(user_id: &str, username: &str, expires_in: i64) -> AccessClaims {
    let now = chrono::Utc::now().timestamp();
    AccessClaims {
        sub: user_id.to_string(),
        exp: now + expires_in,
        iat: now,
        iss: None,
        username: username.to_string(),
        display_name: Some(username.to_uppercase()),
        avatar_url: None,
    }
}

/// Mint a valid HS256 access token.
pub fn mint_token(user_id: &str, username: &str) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        &claims(user_id, username, 300),
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint token")
}

pub fn mint_expired_token(user_id: &str) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        &claims(user_id, "expired_user", -600),
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint expired token")
}

pub fn mint_token_with_secret(user_id: &str, secret: &str) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        &claims(user_id, "forger", 300),
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("mint token")
}

pub fn add_live_stream(store: &MemoryStore, stream_id: &str) {
    store.add_stream(LiveStream {
        id: stream_id.to_string(),
        broadcaster_id: "usr_host".to_string(),
        title: "Test stream".to_string(),
        is_live: true,
        peak_viewers: 0,
    });
}

/// Connect with `?token=` and return the socket plus the READY payload.
pub async fn connect(addr: SocketAddr, user_id: &str) -> (WsClient, Value) {
    let token = mint_token(user_id, user_id.trim_start_matches("usr_"));
    let url = format!("ws://{addr}/gateway?token={token}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
    let ready = read_dispatch(&mut ws).await;
    assert_eq!(ready["t"], "READY");
    (ws, ready["d"].clone())
}

/// Connect with an `Authorization` header instead of the query string.
pub async fn connect_with_header(addr: SocketAddr, token: &str) -> (WsClient, Value) {
    let mut request = format!("ws://{addr}/gateway").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.expect("ws connect");
    let ready = read_dispatch(&mut ws).await;
    assert_eq!(ready["t"], "READY");
    (ws, ready["d"].clone())
}

pub async fn send_event(ws: &mut WsClient, kind: &str, data: Value) {
    let msg = json!({ "op": 0, "t": kind, "d": data });
    ws.send(Message::Text(msg.to_string().into()))
        .await
        .expect("send event");
}

pub async fn send_heartbeat(ws: &mut WsClient, seq: u64) {
    let msg = json!({ "op": 1, "d": { "seq": seq } });
    ws.send(Message::Text(msg.to_string().into()))
        .await
        .expect("send heartbeat");
}

/// Next text frame as JSON, skipping control frames.
pub async fn read_dispatch(ws: &mut WsClient) -> Value {
    time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws
                .next()
                .await
                .expect("stream ended")
                .expect("ws read error");
            match msg {
                Message::Text(text) => return serde_json::from_str::<Value>(&text).expect("json frame"),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timeout waiting for frame")
}

/// Skip frames until a dispatch named `name` arrives; returns its `d`.
pub async fn expect_event(ws: &mut WsClient, name: &str) -> Value {
    time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = read_dispatch(ws).await;
            if frame["op"] == 0 && frame["t"] == name {
                return frame["d"].clone();
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timeout waiting for {name}"))
}

/// Assert no dispatch named `name` arrives within `wait`.
pub async fn assert_no_event(ws: &mut WsClient, name: &str, wait: Duration) {
    let _ = time::timeout(wait, async {
        loop {
            let frame = read_dispatch(ws).await;
            assert_ne!(frame["t"], name, "unexpected {name}: {frame}");
        }
    })
    .await;
}

/// Wait for the server to close the socket and return the close code.
pub async fn expect_close(ws: &mut WsClient) -> u16 {
    time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                Some(Ok(Message::Close(None))) | None | Some(Err(_)) => return 0,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("timeout waiting for close")
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
