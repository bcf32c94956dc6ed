//! PostgreSQL implementation of [`Persistence`] on diesel-async.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::OptionalExtension;

use super::pool::DbPool;
use super::schema::{
    calls, direct_messages, follows, live_streams, notification_preferences, stream_comments,
    user_presence,
};
use super::store::Persistence;
use crate::error::StoreError;
use crate::models::call::{Call, CallRecord};
use crate::models::message::Message;
use crate::models::notification::{NewNotification, Notification, PushPreference};
use crate::models::stream::{LiveStream, StreamComment};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Persistence for PgStore {
    async fn save_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(direct_messages::table)
                .values(message)
                .on_conflict_do_nothing(),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn mark_message_delivered(&self, message_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::update(
                direct_messages::table
                    .find(message_id)
                    .filter(direct_messages::delivered.eq(false)),
            )
            .set((
                direct_messages::delivered.eq(true),
                direct_messages::delivered_at.eq(Some(at)),
            )),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn mark_message_read(
        &self,
        message_id: i64,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        let mut conn = self.pool.get().await?;

        // Reading implies delivery; keep an earlier delivered_at if present.
        diesel_async::RunQueryDsl::execute(
            diesel::update(
                direct_messages::table
                    .find(message_id)
                    .filter(direct_messages::recipient_id.eq(reader_id))
                    .filter(direct_messages::delivered.eq(false)),
            )
            .set((
                direct_messages::delivered.eq(true),
                direct_messages::delivered_at.eq(Some(at)),
            )),
            &mut conn,
        )
        .await?;

        diesel_async::RunQueryDsl::execute(
            diesel::update(
                direct_messages::table
                    .find(message_id)
                    .filter(direct_messages::recipient_id.eq(reader_id))
                    .filter(direct_messages::read.eq(false)),
            )
            .set((
                direct_messages::read.eq(true),
                direct_messages::read_at.eq(Some(at)),
            )),
            &mut conn,
        )
        .await?;

        let message = diesel_async::RunQueryDsl::get_result(
            direct_messages::table
                .find(message_id)
                .filter(direct_messages::recipient_id.eq(reader_id))
                .select(Message::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.pool.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::update(
                direct_messages::table
                    .filter(direct_messages::conversation_id.eq(conversation_id))
                    .filter(direct_messages::recipient_id.eq(reader_id))
                    .filter(direct_messages::delivered.eq(false)),
            )
            .set((
                direct_messages::delivered.eq(true),
                direct_messages::delivered_at.eq(Some(at)),
            )),
            &mut conn,
        )
        .await?;

        let flipped: Vec<Message> = diesel_async::RunQueryDsl::get_results(
            diesel::update(
                direct_messages::table
                    .filter(direct_messages::conversation_id.eq(conversation_id))
                    .filter(direct_messages::recipient_id.eq(reader_id))
                    .filter(direct_messages::read.eq(false)),
            )
            .set((
                direct_messages::read.eq(true),
                direct_messages::read_at.eq(Some(at)),
            ))
            .returning(Message::as_returning()),
            &mut conn,
        )
        .await?;

        Ok(flipped)
    }

    async fn pending_messages(&self, recipient_id: &str, limit: i64) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.pool.get().await?;
        let messages = diesel_async::RunQueryDsl::load(
            direct_messages::table
                .filter(direct_messages::recipient_id.eq(recipient_id))
                .filter(direct_messages::delivered.eq(false))
                .order(direct_messages::id.asc())
                .limit(limit)
                .select(Message::as_select()),
            &mut conn,
        )
        .await?;
        Ok(messages)
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(crate::db::schema::notifications::table)
                .values(NewNotification::from(notification))
                .on_conflict_do_nothing(),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn save_call_record(&self, call: &Call) -> Result<(), StoreError> {
        let record = CallRecord::from(call);
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(calls::table)
                .values(&record)
                .on_conflict(calls::id)
                .do_update()
                .set(&record),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn update_user_presence(
        &self,
        user_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::query_dsl::methods::FilterDsl::filter(
                diesel::insert_into(user_presence::table)
                    .values((
                        user_presence::user_id.eq(user_id),
                        user_presence::is_online.eq(is_online),
                        user_presence::last_seen_at.eq(last_seen),
                    ))
                    .on_conflict(user_presence::user_id)
                    .do_update()
                    .set((
                        user_presence::is_online.eq(is_online),
                        user_presence::last_seen_at.eq(last_seen),
                    )),
                user_presence::last_seen_at.le(last_seen),
            ),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn increment_stream_viewer_peak(&self, stream_id: &str, viewers: i32) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::update(
                live_streams::table
                    .find(stream_id)
                    .filter(live_streams::peak_viewers.lt(viewers)),
            )
            .set(live_streams::peak_viewers.eq(viewers)),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn find_stream(&self, stream_id: &str) -> Result<Option<LiveStream>, StoreError> {
        let mut conn = self.pool.get().await?;
        let stream = diesel_async::RunQueryDsl::get_result(
            live_streams::table
                .find(stream_id)
                .select(LiveStream::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(stream)
    }

    async fn save_stream_comment(&self, comment: &StreamComment) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(stream_comments::table).values(comment),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn followers(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        let ids = diesel_async::RunQueryDsl::load(
            follows::table
                .filter(follows::followee_id.eq(user_id))
                .select(follows::follower_id),
            &mut conn,
        )
        .await?;
        Ok(ids)
    }

    async fn push_preference(&self, user_id: &str) -> Result<PushPreference, StoreError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = diesel_async::RunQueryDsl::get_result(
            notification_preferences::table
                .find(user_id)
                .select(notification_preferences::push),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(match raw {
            Some(value) => value.parse().unwrap_or_else(|err| {
                tracing::warn!(%user_id, %err, "unrecognised push preference, using default");
                PushPreference::default()
            }),
            None => PushPreference::default(),
        })
    }
}
