//! Live-stream rooms: viewer accounting, chat and reactions.
//!
//! A stream's viewer count is the size of its room in the hub; nothing else
//! is tracked. The peak is persisted as a high-water mark in the background.

use std::sync::Arc;

use agora_common::SnowflakeGenerator;
use chrono::Utc;
use serde_json::json;

use crate::auth::tokens::Identity;
use crate::db::store::Persistence;
use crate::error::GatewayError;
use crate::models::stream::StreamComment;

use super::events::{EventName, OutboundEvent, StreamChatKind, StreamChatPayload, StreamReactionPayload};
use super::fanout::Hub;
use super::rooms::RoomId;

/// Longest chat line or comment accepted in a stream room.
pub const MAX_STREAM_CHAT_CHARS: usize = 500;

#[derive(Clone)]
pub struct StreamManager {
    hub: Arc<Hub>,
    store: Arc<dyn Persistence>,
    snowflake: Arc<SnowflakeGenerator>,
}

impl StreamManager {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn Persistence>, snowflake: Arc<SnowflakeGenerator>) -> Self {
        Self { hub, store, snowflake }
    }

    pub fn viewer_count(&self, stream_id: &str) -> usize {
        self.hub.room_size(&RoomId::stream(stream_id))
    }

    /// Join a live stream's room. Returns the viewer count after joining.
    pub async fn join(&self, connection_id: &str, stream_id: &str) -> Result<usize, GatewayError> {
        let live = self
            .store
            .find_stream(stream_id)
            .await?
            .is_some_and(|s| s.is_live);
        if !live {
            return Err(GatewayError::NotFound("stream"));
        }

        let room = RoomId::stream(stream_id);
        let joined = self
            .hub
            .join(connection_id, &room)
            .ok_or(GatewayError::NotFound("connection"))?;
        if joined.newly_joined {
            self.announce_count(&room, stream_id, joined.members);
            self.record_peak(stream_id, joined.members);
            tracing::debug!(%connection_id, %stream_id, viewers = joined.members, "viewer joined stream");
        }
        Ok(joined.members)
    }

    /// Leave a stream's room. `None` when the connection was not a viewer.
    pub fn leave(&self, connection_id: &str, stream_id: &str) -> Option<usize> {
        let room = RoomId::stream(stream_id);
        let remaining = self.hub.leave(connection_id, &room)?;
        self.announce_count(&room, stream_id, remaining);
        tracing::debug!(%connection_id, %stream_id, viewers = remaining, "viewer left stream");
        Some(remaining)
    }

    /// Viewer accounting for rooms a closed connection was removed from.
    pub fn on_disconnect(&self, rooms: &[(RoomId, usize)]) {
        for (room, remaining) in rooms {
            if let Some(stream_id) = room.stream_id() {
                self.announce_count(room, stream_id, *remaining);
            }
        }
    }

    /// Broadcast a chat line to the room; comments are stored first.
    pub async fn chat(
        &self,
        connection_id: &str,
        author: &Identity,
        request: StreamChatPayload,
    ) -> Result<(), GatewayError> {
        let room = self.member_room(connection_id, &request.stream_id)?;
        let content = request.content.trim();
        if content.is_empty() {
            return Err(GatewayError::bad_request("chat content must not be empty"));
        }
        if content.chars().count() > MAX_STREAM_CHAT_CHARS {
            return Err(GatewayError::bad_request(format!(
                "chat content exceeds {MAX_STREAM_CHAT_CHARS} characters"
            )));
        }

        let id = self.snowflake.generate();
        let created_at = Utc::now();
        let persisted = request.kind == StreamChatKind::Comment;
        if persisted {
            let comment = StreamComment {
                id,
                stream_id: request.stream_id.clone(),
                author_id: author.user_id.clone(),
                content: content.to_string(),
                created_at,
            };
            self.store.save_stream_comment(&comment).await?;
        }

        let event = OutboundEvent::new(
            EventName::STREAM_CHAT_MESSAGE,
            json!({
                "id": id.to_string(),
                "stream_id": request.stream_id,
                "user": author,
                "content": content,
                "kind": request.kind,
                "persisted": persisted,
                "created_at": created_at,
            }),
        );
        self.hub.broadcast(&room, &event, &[]);
        Ok(())
    }

    /// Ephemeral reaction carrying the client-assigned ID.
    pub fn react(
        &self,
        connection_id: &str,
        user_id: &str,
        request: StreamReactionPayload,
    ) -> Result<usize, GatewayError> {
        let room = self.member_room(connection_id, &request.stream_id)?;
        if request.reaction.trim().is_empty() {
            return Err(GatewayError::bad_request("reaction must not be empty"));
        }
        let event = OutboundEvent::new(
            EventName::STREAM_REACTION,
            json!({
                "stream_id": request.stream_id,
                "user_id": user_id,
                "reaction": request.reaction,
                "client_id": request.client_id,
            }),
        );
        Ok(self.hub.broadcast(&room, &event, &[]))
    }

    fn member_room(&self, connection_id: &str, stream_id: &str) -> Result<RoomId, GatewayError> {
        let room = RoomId::stream(stream_id);
        if !self.hub.is_member(connection_id, &room) {
            return Err(GatewayError::invalid_state("join the stream room first"));
        }
        Ok(room)
    }

    fn announce_count(&self, room: &RoomId, stream_id: &str, viewers: usize) {
        if viewers == 0 {
            return;
        }
        let event = OutboundEvent::new(
            EventName::VIEWER_COUNT_CHANGED,
            json!({ "stream_id": stream_id, "viewer_count": viewers }),
        );
        self.hub.broadcast(room, &event, &[]);
    }

    fn record_peak(&self, stream_id: &str, viewers: usize) {
        let store = Arc::clone(&self.store);
        let stream_id = stream_id.to_string();
        let viewers = i32::try_from(viewers).unwrap_or(i32::MAX);
        tokio::spawn(async move {
            if let Err(e) = store.increment_stream_viewer_peak(&stream_id, viewers).await {
                tracing::error!(%stream_id, viewers, ?e, "failed to record viewer peak");
            }
        });
    }
}
