//! The persistence collaborator consumed by the gateway.
//!
//! Every call is assumed idempotent on retry and eventually consistent. The
//! gateway never retries: a failure is logged by the caller and the
//! in-memory effect stands for the live session.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::call::Call;
use crate::models::message::Message;
use crate::models::notification::{Notification, PushPreference};
use crate::models::stream::{LiveStream, StreamComment};

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_message(&self, message: &Message) -> Result<(), StoreError>;

    async fn mark_message_delivered(&self, message_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Mark one message read. Returns the message when `reader_id` is its
    /// recipient (whether or not it was already read), `None` otherwise.
    async fn mark_message_read(
        &self,
        message_id: i64,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError>;

    /// Mark every unread message addressed to `reader_id` in a conversation.
    /// Returns only the messages that flipped.
    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Undelivered messages for a recipient, oldest first.
    async fn pending_messages(&self, recipient_id: &str, limit: i64) -> Result<Vec<Message>, StoreError>;

    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Insert or update a call record.
    async fn save_call_record(&self, call: &Call) -> Result<(), StoreError>;

    /// Record a presence change. A change older than the stored one is
    /// ignored.
    async fn update_user_presence(
        &self,
        user_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Raise the stream's peak viewer count to `viewers` if it is higher.
    async fn increment_stream_viewer_peak(&self, stream_id: &str, viewers: i32) -> Result<(), StoreError>;

    async fn find_stream(&self, stream_id: &str) -> Result<Option<LiveStream>, StoreError>;

    async fn save_stream_comment(&self, comment: &StreamComment) -> Result<(), StoreError>;

    /// IDs of users following `user_id`.
    async fn followers(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn push_preference(&self, user_id: &str) -> Result<PushPreference, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (local runs / tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryData {
    messages: BTreeMap<i64, Message>,
    notifications: Vec<Notification>,
    calls: HashMap<String, Call>,
    presence: HashMap<String, (bool, DateTime<Utc>)>,
    streams: HashMap<String, LiveStream>,
    comments: Vec<StreamComment>,
    /// followee → followers
    followers: HashMap<String, HashSet<String>>,
    preferences: HashMap<String, PushPreference>,
}

/// `Persistence` backed by process memory.
///
/// Used when no `DATABASE_URL` is configured and by the test suites, which
/// also use the seeding and inspection helpers below.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as a storage outage would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    pub fn add_stream(&self, stream: LiveStream) {
        self.data.lock().streams.insert(stream.id.clone(), stream);
    }

    pub fn add_follower(&self, followee: &str, follower: &str) {
        self.data
            .lock()
            .followers
            .entry(followee.to_string())
            .or_default()
            .insert(follower.to_string());
    }

    pub fn set_push_preference(&self, user_id: &str, preference: PushPreference) {
        self.data.lock().preferences.insert(user_id.to_string(), preference);
    }

    pub fn message(&self, id: i64) -> Option<Message> {
        self.data.lock().messages.get(&id).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.data.lock().messages.values().cloned().collect()
    }

    pub fn notifications_for(&self, recipient_id: &str) -> Vec<Notification> {
        self.data
            .lock()
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    pub fn call(&self, id: &str) -> Option<Call> {
        self.data.lock().calls.get(id).cloned()
    }

    pub fn presence(&self, user_id: &str) -> Option<(bool, DateTime<Utc>)> {
        self.data.lock().presence.get(user_id).copied()
    }

    pub fn stream(&self, id: &str) -> Option<LiveStream> {
        self.data.lock().streams.get(id).cloned()
    }

    pub fn comments(&self, stream_id: &str) -> Vec<StreamComment> {
        self.data
            .lock()
            .comments
            .iter()
            .filter(|c| c.stream_id == stream_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn save_message(&self, message: &Message) -> Result<(), StoreError> {
        self.check()?;
        self.data
            .lock()
            .messages
            .entry(message.id)
            .or_insert_with(|| message.clone());
        Ok(())
    }

    async fn mark_message_delivered(&self, message_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check()?;
        if let Some(m) = self.data.lock().messages.get_mut(&message_id) {
            m.mark_delivered(at);
        }
        Ok(())
    }

    async fn mark_message_read(
        &self,
        message_id: i64,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        match data.messages.get_mut(&message_id) {
            Some(m) if m.recipient_id == reader_id => {
                m.mark_read(at);
                Ok(Some(m.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        let flipped = data
            .messages
            .values_mut()
            .filter(|m| m.conversation_id == conversation_id && m.recipient_id == reader_id)
            .filter_map(|m| m.mark_read(at).then(|| m.clone()))
            .collect();
        Ok(flipped)
    }

    async fn pending_messages(&self, recipient_id: &str, limit: i64) -> Result<Vec<Message>, StoreError> {
        self.check()?;
        let data = self.data.lock();
        Ok(data
            .messages
            .values()
            .filter(|m| m.recipient_id == recipient_id && !m.delivered)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.check()?;
        self.data.lock().notifications.push(notification.clone());
        Ok(())
    }

    async fn save_call_record(&self, call: &Call) -> Result<(), StoreError> {
        self.check()?;
        self.data.lock().calls.insert(call.id.clone(), call.clone());
        Ok(())
    }

    async fn update_user_presence(
        &self,
        user_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut data = self.data.lock();
        let entry = data
            .presence
            .entry(user_id.to_string())
            .or_insert((is_online, last_seen));
        // An older change never overwrites a newer one.
        if entry.1 <= last_seen {
            *entry = (is_online, last_seen);
        }
        Ok(())
    }

    async fn increment_stream_viewer_peak(&self, stream_id: &str, viewers: i32) -> Result<(), StoreError> {
        self.check()?;
        if let Some(s) = self.data.lock().streams.get_mut(stream_id) {
            s.peak_viewers = s.peak_viewers.max(viewers);
        }
        Ok(())
    }

    async fn find_stream(&self, stream_id: &str) -> Result<Option<LiveStream>, StoreError> {
        self.check()?;
        Ok(self.data.lock().streams.get(stream_id).cloned())
    }

    async fn save_stream_comment(&self, comment: &StreamComment) -> Result<(), StoreError> {
        self.check()?;
        self.data.lock().comments.push(comment.clone());
        Ok(())
    }

    async fn followers(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .followers
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn push_preference(&self, user_id: &str) -> Result<PushPreference, StoreError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .preferences
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }
}
