//! Inbound dispatch: routes each client event to the component that owns it.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use agora_common::ConversationId;

use crate::error::GatewayError;
use crate::models::call::CallStatus;
use crate::AppState;

use super::delivery::ReadTarget;
use super::events::{EventName, InboundEvent, OutboundEvent, UserStatus};
use super::session::GatewaySession;

/// Handle one op=0 client message. Failures are reported to this
/// connection only; the connection stays open.
pub async fn handle_dispatch(state: &AppState, session: &mut GatewaySession, kind: Option<String>, data: Value) {
    let Some(kind) = kind else {
        reply_error(state, session, None, &GatewayError::bad_request("dispatch without an event type"));
        return;
    };

    let event = match InboundEvent::parse(&kind, data) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(connection_id = %session.connection_id, event = %kind, %e, "unparseable event");
            reply_error(
                state,
                session,
                Some(&kind),
                &GatewayError::bad_request(format!("invalid {kind} event: {e}")),
            );
            return;
        }
    };

    let name = event.name();
    if event.is_rate_limited() && !session.limiter.admit() {
        let retry_after = session.limiter.retry_after();
        tracing::debug!(
            connection_id = %session.connection_id,
            user_id = %session.user_id(),
            event = name,
            retry_after_ms = retry_after.as_millis() as u64,
            "event rate limited"
        );
        let notice = OutboundEvent::new(
            EventName::RATE_LIMIT_EXCEEDED,
            json!({ "event": name, "retry_after_ms": retry_after.as_millis() as u64 }),
        );
        state.hub.send_to_connection(&session.connection_id, &notice);
        return;
    }

    if let Err(e) = dispatch(state, session, event).await {
        match &e {
            GatewayError::Persistence(_) => tracing::error!(
                connection_id = %session.connection_id,
                event = name,
                ?e,
                "event failed on storage"
            ),
            _ => tracing::debug!(connection_id = %session.connection_id, event = name, %e, "event refused"),
        }
        reply_error(state, session, Some(name), &e);
    }
}

async fn dispatch(state: &AppState, session: &GatewaySession, event: InboundEvent) -> Result<(), GatewayError> {
    let connection_id = session.connection_id.as_str();
    let identity = &session.identity;
    let user_id = identity.user_id.as_str();

    match event {
        InboundEvent::SendMessage(p) => {
            state.messages.send(Some(connection_id), identity, p).await?;
        }
        InboundEvent::MessageRead(p) => {
            let target = match (p.message_id, p.conversation_id) {
                (Some(id), _) => ReadTarget::Message(id),
                (None, Some(conversation)) => ReadTarget::Conversation(ConversationId::from_raw(conversation)),
                (None, None) => {
                    return Err(GatewayError::bad_request("message_id or conversation_id is required"))
                }
            };
            state.messages.mark_read(target, user_id).await?;
        }
        InboundEvent::TypingStart(p) => {
            state.messages.typing(user_id, &p.recipient_id, true)?;
        }
        InboundEvent::TypingStop(p) => {
            state.messages.typing(user_id, &p.recipient_id, false)?;
        }
        InboundEvent::JoinConversation(p) => {
            state.messages.join_conversation(connection_id, user_id, &p.user_id)?;
        }
        InboundEvent::LeaveConversation(p) => {
            state.messages.leave_conversation(connection_id, user_id, &p.user_id)?;
        }
        InboundEvent::JoinStreamRoom(p) => {
            state.streams.join(connection_id, &p.stream_id).await?;
        }
        InboundEvent::LeaveStreamRoom(p) => {
            state
                .streams
                .leave(connection_id, &p.stream_id)
                .ok_or(GatewayError::NotFound("stream"))?;
        }
        InboundEvent::StreamChatMessage(p) => {
            state.streams.chat(connection_id, identity, p).await?;
        }
        InboundEvent::StreamReaction(p) => {
            state.streams.react(connection_id, user_id, p)?;
        }
        InboundEvent::CallUser(p) => {
            let call = state.calls.initiate(identity, &p.callee_id, p.kind).await?;
            if call.status == CallStatus::Calling {
                let ack = OutboundEvent::new(EventName::CALL_INITIATED, json!({ "call": call }));
                state.hub.send_to_connection(connection_id, &ack);
            }
        }
        InboundEvent::CallAccepted(p) => {
            state.calls.accept(&p.call_id, user_id).await?;
        }
        InboundEvent::CallRejected(p) => {
            state.calls.reject(&p.call_id, user_id).await?;
        }
        InboundEvent::CallEnded(p) => {
            state.calls.end(&p.call_id, user_id).await?;
        }
        InboundEvent::IceCandidate(p) => {
            state.calls.relay(&p.call_id, user_id, EventName::ICE_CANDIDATE, p.payload)?;
        }
        InboundEvent::Offer(p) => {
            state.calls.relay(&p.call_id, user_id, EventName::OFFER, p.payload)?;
        }
        InboundEvent::Answer(p) => {
            state.calls.relay(&p.call_id, user_id, EventName::ANSWER, p.payload)?;
        }
        InboundEvent::UserStatusUpdate(p) => {
            if p.status == UserStatus::Offline {
                return Err(GatewayError::bad_request("offline cannot be set explicitly"));
            }
            if state.hub.set_status(user_id, p.status).is_some() {
                spawn_status_change(state, user_id, p.status);
            }
        }
    }
    Ok(())
}

fn reply_error(state: &AppState, session: &GatewaySession, event: Option<&str>, err: &GatewayError) {
    let body = json!({
        "code": err.code(),
        "message": err.to_string(),
        "event": event,
    });
    state
        .hub
        .send_to_connection(&session.connection_id, &OutboundEvent::new(EventName::ERROR, body));
}

/// Tell the user's followers about a presence change and record it.
///
/// Runs in the background after the in-memory change is complete.
pub fn spawn_status_change(state: &AppState, user_id: &str, status: UserStatus) {
    let state = state.clone();
    let user_id = user_id.to_string();
    let at = Utc::now();
    tokio::spawn(async move {
        record_status_change(&state, &user_id, status, at).await;
    });
}

/// A stale change (the user reconnected or dropped meanwhile) is neither
/// persisted nor announced; the store also refuses writes older than the
/// one it holds.
async fn record_status_change(state: &AppState, user_id: &str, status: UserStatus, at: DateTime<Utc>) {
    let online = status != UserStatus::Offline;
    if state.hub.is_online(user_id) != online {
        tracing::debug!(%user_id, status = status.as_str(), "presence changed again, skipping");
        return;
    }

    if let Err(e) = state.store.update_user_presence(user_id, online, at).await {
        tracing::error!(%user_id, ?e, "failed to persist presence");
    }
    announce_status(state, user_id, status, at).await;
}

async fn announce_status(state: &AppState, user_id: &str, status: UserStatus, at: DateTime<Utc>) {
    let followers = match state.store.followers(user_id).await {
        Ok(followers) => followers,
        Err(e) => {
            tracing::warn!(%user_id, ?e, "follower lookup failed, presence not announced");
            return;
        }
    };

    let event = OutboundEvent::new(
        EventName::USER_STATUS_CHANGED,
        json!({ "user_id": user_id, "status": status, "last_seen": at }),
    );
    let reached = followers
        .iter()
        .filter(|follower| state.hub.send_to_user(follower, &event))
        .count();
    tracing::debug!(%user_id, status = status.as_str(), followers = followers.len(), reached, "presence announced");
}
