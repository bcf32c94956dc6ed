//! Push-notification dispatch for users without a live connection.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// External push-notification service.
#[async_trait]
pub trait PushDispatcher: Send + Sync {
    /// Returns whether the push service accepted the notification.
    async fn send_push(&self, user_id: &str, payload: &Value) -> bool;
}

#[derive(Serialize)]
struct PushRequest<'a> {
    user_id: &'a str,
    notification: &'a Value,
}

/// Posts notifications as JSON to the platform push gateway.
pub struct HttpPushDispatcher {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpPushDispatcher {
    pub fn new(endpoint: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl PushDispatcher for HttpPushDispatcher {
    async fn send_push(&self, user_id: &str, payload: &Value) -> bool {
        let result = self
            .http
            .post(format!("{}/push", self.endpoint))
            .json(&PushRequest {
                user_id,
                notification: payload,
            })
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(%user_id, status = %resp.status(), "push gateway refused notification");
                false
            }
            Err(e) => {
                tracing::warn!(%user_id, ?e, "push gateway unreachable");
                false
            }
        }
    }
}

/// Used when no push gateway is configured: logs and reports failure.
pub struct LogPushDispatcher;

#[async_trait]
impl PushDispatcher for LogPushDispatcher {
    async fn send_push(&self, user_id: &str, payload: &Value) -> bool {
        tracing::debug!(%user_id, %payload, "push disabled, notification not sent");
        false
    }
}
