//! Direct-message delivery: persist, deliver live, receipt, notify.

use std::collections::BTreeMap;
use std::sync::Arc;

use agora_common::{ConversationId, SnowflakeGenerator};
use chrono::Utc;
use serde_json::json;

use crate::auth::tokens::Identity;
use crate::db::store::Persistence;
use crate::error::GatewayError;
use crate::models::message::{Message, MAX_CONTENT_CHARS};
use crate::models::notification::NotificationKind;

use super::events::{EventName, OutboundEvent, SendMessagePayload};
use super::fanout::Hub;
use super::notify::Notifier;
use super::rooms::RoomId;

/// Upper bound on messages returned by one pending pull.
pub const PENDING_LIMIT: i64 = 200;

/// Characters of content carried in a message notification.
const PREVIEW_CHARS: usize = 100;

/// What a read receipt covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTarget {
    Message(i64),
    Conversation(ConversationId),
}

#[derive(Clone)]
pub struct MessagePipeline {
    hub: Arc<Hub>,
    store: Arc<dyn Persistence>,
    notifier: Notifier,
    snowflake: Arc<SnowflakeGenerator>,
}

impl MessagePipeline {
    pub fn new(
        hub: Arc<Hub>,
        store: Arc<dyn Persistence>,
        notifier: Notifier,
        snowflake: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            hub,
            store,
            notifier,
            snowflake,
        }
    }

    /// Send a direct message.
    ///
    /// `origin` is the sending connection, if any; it alone receives
    /// `message_sent`. The recipient always gets a `message` notification,
    /// whether or not a live connection received the message.
    pub async fn send(
        &self,
        origin: Option<&str>,
        sender: &Identity,
        request: SendMessagePayload,
    ) -> Result<Message, GatewayError> {
        let SendMessagePayload {
            recipient_id,
            content,
            reply_to,
            client_ref,
        } = request;

        if content.trim().is_empty() {
            return Err(GatewayError::bad_request("message content must not be empty"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(GatewayError::bad_request(format!(
                "message content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if recipient_id.trim().is_empty() {
            return Err(GatewayError::bad_request("recipient_id is required"));
        }
        if recipient_id == sender.user_id {
            return Err(GatewayError::bad_request("cannot send a message to yourself"));
        }

        let conversation_id = ConversationId::between(&sender.user_id, &recipient_id);
        let now = Utc::now();
        let mut message = Message {
            id: self.snowflake.generate(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender.user_id.clone(),
            recipient_id,
            content,
            reply_to,
            delivered: false,
            delivered_at: None,
            read: false,
            read_at: None,
            created_at: now,
        };

        if let Err(e) = self.store.save_message(&message).await {
            tracing::error!(message_id = message.id, ?e, "failed to persist message");
        }

        let mut data = serde_json::to_value(&message).unwrap_or_default();
        data["sender"] = serde_json::to_value(sender).unwrap_or_default();
        let event = OutboundEvent::new(EventName::NEW_MESSAGE, data);

        let mut reached = self.hub.reach_user(&message.recipient_id, &event);
        if !reached.is_empty() {
            message.mark_delivered(Utc::now());
            if let Err(e) = self
                .store
                .mark_message_delivered(message.id, message.delivered_at.unwrap_or(now))
                .await
            {
                tracing::error!(message_id = message.id, ?e, "failed to mark message delivered");
            }
        }

        // Other devices with the conversation open see it too.
        if let Some(origin) = origin {
            reached.push(origin.to_string());
        }
        self.hub
            .broadcast(&RoomId::Conversation(conversation_id), &event, &reached);

        if let Some(origin) = origin {
            let ack = OutboundEvent::new(
                EventName::MESSAGE_SENT,
                json!({ "message": message, "client_ref": client_ref }),
            );
            self.hub.send_to_connection(origin, &ack);
        }

        tracing::debug!(
            message_id = message.id,
            sender_id = %message.sender_id,
            recipient_id = %message.recipient_id,
            delivered = message.delivered,
            "direct message routed"
        );

        self.notifier
            .notify(
                &message.recipient_id,
                &message.sender_id,
                NotificationKind::Message,
                json!({
                    "message_id": message.id.to_string(),
                    "conversation_id": message.conversation_id,
                    "sender_username": sender.username,
                    "preview": message.content.chars().take(PREVIEW_CHARS).collect::<String>(),
                }),
            )
            .await;

        Ok(message)
    }

    /// Mark messages addressed to `reader_id` as read and tell each online
    /// sender. Returns the affected messages.
    pub async fn mark_read(&self, target: ReadTarget, reader_id: &str) -> Result<Vec<Message>, GatewayError> {
        let now = Utc::now();
        let messages = match target {
            ReadTarget::Message(id) => self
                .store
                .mark_message_read(id, reader_id, now)
                .await?
                .map(|m| vec![m])
                .ok_or(GatewayError::NotFound("message"))?,
            ReadTarget::Conversation(conversation_id) => {
                if !conversation_id.includes(reader_id) {
                    return Err(GatewayError::NotFound("conversation"));
                }
                self.store
                    .mark_conversation_read(conversation_id.as_str(), reader_id, now)
                    .await?
            }
        };

        // One receipt per (sender, conversation) pair.
        let mut receipts: BTreeMap<(&str, &str), Vec<String>> = BTreeMap::new();
        for m in &messages {
            receipts
                .entry((m.sender_id.as_str(), m.conversation_id.as_str()))
                .or_default()
                .push(m.id.to_string());
        }
        for ((sender_id, conversation_id), message_ids) in receipts {
            let event = OutboundEvent::new(
                EventName::MESSAGE_READ,
                json!({
                    "message_ids": message_ids,
                    "conversation_id": conversation_id,
                    "reader_id": reader_id,
                    "read_at": now,
                }),
            );
            // Offline senders get no queued receipt.
            self.hub.send_to_user(sender_id, &event);
        }

        Ok(messages)
    }

    /// Relay a typing indicator. Returns whether the recipient was reached.
    pub fn typing(&self, sender_id: &str, recipient_id: &str, typing: bool) -> Result<bool, GatewayError> {
        if recipient_id == sender_id {
            return Err(GatewayError::bad_request("cannot type to yourself"));
        }
        let conversation_id = ConversationId::between(sender_id, recipient_id);
        let event = OutboundEvent::new(
            EventName::USER_TYPING,
            json!({
                "user_id": sender_id,
                "conversation_id": conversation_id,
                "typing": typing,
            }),
        );
        Ok(self.hub.send_to_user(recipient_id, &event))
    }

    pub fn join_conversation(
        &self,
        connection_id: &str,
        user_id: &str,
        other_id: &str,
    ) -> Result<ConversationId, GatewayError> {
        if other_id.is_empty() || other_id == user_id {
            return Err(GatewayError::bad_request("a conversation needs another participant"));
        }
        let conversation_id = ConversationId::between(user_id, other_id);
        self.hub
            .join(connection_id, &RoomId::Conversation(conversation_id.clone()))
            .ok_or(GatewayError::NotFound("connection"))?;
        Ok(conversation_id)
    }

    /// NotFound when the connection had not joined the conversation.
    pub fn leave_conversation(
        &self,
        connection_id: &str,
        user_id: &str,
        other_id: &str,
    ) -> Result<ConversationId, GatewayError> {
        let conversation_id = ConversationId::between(user_id, other_id);
        self.hub
            .leave(connection_id, &RoomId::Conversation(conversation_id.clone()))
            .ok_or(GatewayError::NotFound("conversation"))?;
        Ok(conversation_id)
    }

    /// Undelivered messages for `recipient_id`, marked delivered as they are
    /// handed out.
    pub async fn pending(&self, recipient_id: &str) -> Result<Vec<Message>, GatewayError> {
        let mut messages = self.store.pending_messages(recipient_id, PENDING_LIMIT).await?;
        let now = Utc::now();
        for message in &mut messages {
            message.mark_delivered(now);
            if let Err(e) = self.store.mark_message_delivered(message.id, now).await {
                tracing::error!(message_id = message.id, ?e, "failed to mark pending message delivered");
            }
        }
        Ok(messages)
    }
}
