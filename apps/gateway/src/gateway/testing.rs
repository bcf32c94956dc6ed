//! Shared fixtures for the gateway unit tests.

use std::sync::Arc;

use agora_common::SnowflakeGenerator;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::tokens::Identity;
use crate::db::store::MemoryStore;
use crate::push::PushDispatcher;

use super::events::OutboundEvent;
use super::fanout::{Hub, OutboundRx};
use super::notify::Notifier;

/// Push dispatcher that records every call and accepts them all.
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

pub fn identity(user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_string(),
        username: user_id.trim_start_matches("usr_").to_string(),
        display_name: user_id.to_uppercase(),
        avatar_url: None,
    }
}

pub struct Fixture {
    pub hub: Arc<Hub>,
    pub store: Arc<MemoryStore>,
    pub push: Arc<RecordingPush>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub notifier: Notifier,
}

impl Fixture {
    pub fn new() -> Self {
        let hub = Arc::new(Hub::new());
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(RecordingPush::default());
        let snowflake = Arc::new(SnowflakeGenerator::new(1));
        let notifier = Notifier::new(hub.clone(), store.clone(), push.clone(), snowflake.clone());
        Self {
            hub,
            store,
            push,
            snowflake,
            notifier,
        }
    }

    /// Register a connection and hand back its outbound queue.
    pub fn connect(&self, connection_id: &str, user_id: &str) -> OutboundRx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub
            .connect(connection_id, user_id, tx)
            .expect("connection registered");
        rx
    }
}

/// Everything queued for a connection so far.
pub fn drain(rx: &mut OutboundRx) -> Vec<Arc<OutboundEvent>> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

pub fn names(events: &[Arc<OutboundEvent>]) -> Vec<&'static str> {
    events.iter().map(|e| e.name).collect()
}
