use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::direct_messages;

/// A one-to-one chat message.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, ToSchema)]
#[diesel(table_name = direct_messages)]
pub struct Message {
    #[serde(with = "super::snowflake_id")]
    #[schema(value_type = String)]
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    #[serde(with = "super::snowflake_id::option")]
    #[schema(value_type = Option<String>)]
    pub reply_to: Option<i64>,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Set the delivered flag. A message already delivered keeps its
    /// original timestamp.
    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> bool {
        if self.delivered {
            return false;
        }
        self.delivered = true;
        self.delivered_at = Some(at);
        true
    }

    /// Set the read flag, implying delivery. Idempotent.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.read {
            return false;
        }
        self.mark_delivered(at);
        self.read = true;
        self.read_at = Some(at);
        true
    }
}

/// Maximum length of message content, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;
