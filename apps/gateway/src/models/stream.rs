use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::db::schema::{live_streams, stream_comments};

/// The gateway's read-only view of a live stream owned by the content service.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = live_streams)]
pub struct LiveStream {
    pub id: String,
    pub broadcaster_id: String,
    pub title: String,
    pub is_live: bool,
    pub peak_viewers: i32,
}

/// A comment explicitly persisted from a stream room.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = stream_comments)]
pub struct StreamComment {
    #[serde(with = "super::snowflake_id")]
    pub id: i64,
    pub stream_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
