use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::db::schema::notifications;

/// What triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Mention,
    Message,
    MissedCall,
    StreamStarted,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Follow => "follow",
            Self::Mention => "mention",
            Self::Message => "message",
            Self::MissedCall => "missed_call",
            Self::StreamStarted => "stream_started",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "like" => Self::Like,
            "comment" => Self::Comment,
            "follow" => Self::Follow,
            "mention" => Self::Mention,
            "message" => Self::Message,
            "missed_call" => Self::MissedCall,
            "stream_started" => Self::StreamStarted,
            other => return Err(format!("unknown notification kind: {other}")),
        })
    }
}

/// Channel a notification reached the user through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    InApp,
    Realtime,
    Push,
}

impl DeliveryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Realtime => "realtime",
            Self::Push => "push",
        }
    }
}

/// Per-user push preference, owned by the settings service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushPreference {
    /// Push only when no live connection received the notification.
    #[default]
    OfflineOnly,
    Always,
    Never,
}

impl FromStr for PushPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline_only" => Ok(Self::OfflineOnly),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown push preference: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Notification {
    #[serde(with = "super::snowflake_id")]
    #[schema(value_type = String)]
    pub id: i64,
    pub recipient_id: String,
    pub sender_id: String,
    pub kind: NotificationKind,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub read: bool,
    pub delivery_methods: Vec<DeliveryMethod>,
    pub created_at: DateTime<Utc>,
}

/// Insertable form of a notification.
#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification<'a> {
    pub id: i64,
    pub recipient_id: &'a str,
    pub sender_id: &'a str,
    pub kind: &'a str,
    pub payload: Value,
    pub read: bool,
    pub delivery_methods: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl<'a> From<&'a Notification> for NewNotification<'a> {
    fn from(n: &'a Notification) -> Self {
        Self {
            id: n.id,
            recipient_id: &n.recipient_id,
            sender_id: &n.sender_id,
            kind: n.kind.as_str(),
            payload: n.payload.clone(),
            read: n.read,
            delivery_methods: n.delivery_methods.iter().map(|m| m.as_str().to_string()).collect(),
            created_at: n.created_at,
        }
    }
}
