//! Notification fan-out: realtime first, push as the fallback.

use std::sync::Arc;

use agora_common::SnowflakeGenerator;
use chrono::Utc;
use serde_json::Value;

use crate::db::store::Persistence;
use crate::models::notification::{DeliveryMethod, Notification, NotificationKind, PushPreference};
use crate::push::PushDispatcher;

use super::events::{EventName, OutboundEvent};
use super::fanout::Hub;

#[derive(Clone)]
pub struct Notifier {
    hub: Arc<Hub>,
    store: Arc<dyn Persistence>,
    push: Arc<dyn PushDispatcher>,
    snowflake: Arc<SnowflakeGenerator>,
}

impl Notifier {
    pub fn new(
        hub: Arc<Hub>,
        store: Arc<dyn Persistence>,
        push: Arc<dyn PushDispatcher>,
        snowflake: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            hub,
            store,
            push,
            snowflake,
        }
    }

    /// Create a notification for `recipient_id`, deliver it over every live
    /// connection, push it according to the recipient's preference, and
    /// persist the record with the methods that actually reached the user.
    pub async fn notify(
        &self,
        recipient_id: &str,
        sender_id: &str,
        kind: NotificationKind,
        payload: Value,
    ) -> Notification {
        let mut notification = Notification {
            id: self.snowflake.generate(),
            recipient_id: recipient_id.to_string(),
            sender_id: sender_id.to_string(),
            kind,
            payload,
            read: false,
            delivery_methods: vec![DeliveryMethod::InApp],
            created_at: Utc::now(),
        };

        let body = serde_json::to_value(&notification).unwrap_or_default();
        let live = self
            .hub
            .send_to_user(recipient_id, &OutboundEvent::new(EventName::NEW_NOTIFICATION, body.clone()));
        if live {
            notification.delivery_methods.push(DeliveryMethod::Realtime);
        }

        let preference = match self.store.push_preference(recipient_id).await {
            Ok(preference) => preference,
            Err(e) => {
                tracing::warn!(%recipient_id, ?e, "push preference lookup failed, using default");
                PushPreference::default()
            }
        };
        let wants_push = match preference {
            PushPreference::OfflineOnly => !live,
            PushPreference::Always => true,
            PushPreference::Never => false,
        };
        if wants_push && self.push.send_push(recipient_id, &body).await {
            notification.delivery_methods.push(DeliveryMethod::Push);
        }

        if let Err(e) = self.store.save_notification(&notification).await {
            tracing::error!(
                notification_id = notification.id,
                %recipient_id,
                ?e,
                "failed to persist notification"
            );
        }

        tracing::debug!(
            notification_id = notification.id,
            %recipient_id,
            kind = %notification.kind,
            live,
            "notification dispatched"
        );
        notification
    }
}
