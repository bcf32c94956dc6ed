//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use agora_common::id::{prefix, prefixed_ulid};

use crate::auth::tokens::{bearer_credential, Identity};
use crate::error::ApiError;
use crate::AppState;

use super::events::{
    ClientMessage, EventName, GatewayMessage, HeartbeatPayload, UserStatus, OP_DISPATCH, OP_HEARTBEAT,
};
use super::fanout::OutboundRx;
use super::handler::{handle_dispatch, spawn_status_change};
use super::session::GatewaySession;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    #[serde(default)]
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

/// Authenticate before upgrading: a bad credential never becomes a
/// connection.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let credential = bearer_credential(&headers, query.token.as_deref())?;
    let identity = state.verifier.resolve_identity(credential).await.map_err(|e| {
        tracing::debug!(?e, "gateway credential rejected");
        ApiError::from(e)
    })?;
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, identity)))
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (mut ws_tx, ws_rx) = socket.split();
    let connection_id = prefixed_ulid(prefix::CONNECTION);
    let (tx, rx) = mpsc::unbounded_channel();

    let came_online = match state.hub.connect(&connection_id, &identity.user_id, tx) {
        Ok(came_online) => came_online,
        Err(conflict) => {
            tracing::error!(
                connection_id = %conflict.connection_id,
                owner = %conflict.owner,
                user_id = %identity.user_id,
                "connection id already registered, refusing connection"
            );
            let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Registration failed").await;
            return;
        }
    };

    let mut session = GatewaySession::new(connection_id, identity, &state.config);
    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id(),
        came_online,
        "gateway connection established"
    );
    if came_online {
        spawn_status_change(&state, session.user_id(), UserStatus::Online);
    }

    let ready = GatewayMessage::dispatch(
        EventName::READY,
        session.next_seq(),
        serde_json::json!({
            "connection_id": session.connection_id,
            "user": session.identity,
            "heartbeat_interval": state.config.heartbeat_interval_ms,
        }),
    );
    if send_json(&mut ws_tx, &ready).await.is_ok() {
        run_session(&state, &mut session, ws_tx, ws_rx, rx).await;
    }

    teardown(&state, &session).await;
}

/// Main session event loop: read client messages, drain the outbound queue,
/// ping and enforce the heartbeat deadline.
async fn run_session(
    state: &AppState,
    session: &mut GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut outbound: OutboundRx,
) {
    let interval = state.config.heartbeat_interval();
    let grace = interval * 3 / 2;
    let mut ping_timer = time::interval_at(Instant::now() + interval, interval);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            // Client sends us a frame. Any frame counts as liveness.
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        last_seen = Instant::now();
                        continue;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                };
                last_seen = Instant::now();

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(_) => {
                        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                        break;
                    }
                };

                match client_msg.op {
                    OP_HEARTBEAT => {
                        let payload: HeartbeatPayload =
                            serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                        if send_json(&mut ws_tx, &GatewayMessage::heartbeat_ack(payload.seq)).await.is_err() {
                            break;
                        }
                    }
                    OP_DISPATCH => {
                        handle_dispatch(state, session, client_msg.t, client_msg.d).await;
                    }
                    _ => {
                        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                        break;
                    }
                }
            }

            // Event routed to this connection by the hub.
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let msg = GatewayMessage::dispatch(event.name, session.next_seq(), event.data.clone());
                if send_json(&mut ws_tx, &msg).await.is_err() {
                    break;
                }
            }

            _ = ping_timer.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            _ = time::sleep_until(last_seen + grace) => {
                tracing::debug!(
                    connection_id = %session.connection_id,
                    "heartbeat timeout, closing connection"
                );
                let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                break;
            }
        }
    }
}

/// Remove the connection everywhere, then run the follow-up effects that
/// depend on what was removed.
async fn teardown(state: &AppState, session: &GatewaySession) {
    let Some(gone) = state.hub.disconnect(&session.connection_id) else {
        return;
    };

    state.streams.on_disconnect(&gone.rooms);
    if gone.went_offline {
        state.calls.on_user_offline(&gone.user_id).await;
        spawn_status_change(state, &gone.user_id, UserStatus::Offline);
    }

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %gone.user_id,
        went_offline = gone.went_offline,
        rooms = gone.rooms.len(),
        "gateway connection ended"
    );
}

async fn send_json(ws_tx: &mut WsSink, msg: &GatewayMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
