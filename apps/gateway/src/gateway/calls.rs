//! One-to-one call signaling.
//!
//! The table of calls is shared by every connection task. Each live call
//! holds a claim on both participants in `busy`; claims are taken with the
//! entry API so two concurrent calls cannot both book the same user.

use std::sync::Arc;
use std::time::Duration;

use agora_common::id::{prefix, prefixed_ulid};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time;

use crate::auth::tokens::Identity;
use crate::db::store::Persistence;
use crate::error::GatewayError;
use crate::models::call::{Call, CallKind, CallStatus};
use crate::models::notification::NotificationKind;

use super::events::{EventName, OutboundEvent};
use super::fanout::Hub;
use super::notify::Notifier;

pub struct CallManager {
    hub: Arc<Hub>,
    store: Arc<dyn Persistence>,
    notifier: Notifier,
    calls: DashMap<String, Call>,
    /// user_id → ID of that user's live call.
    busy: DashMap<String, String>,
    retention: Duration,
}

impl CallManager {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn Persistence>, notifier: Notifier, retention: Duration) -> Self {
        Self {
            hub,
            store,
            notifier,
            calls: DashMap::new(),
            busy: DashMap::new(),
            retention,
        }
    }

    pub fn get(&self, call_id: &str) -> Option<Call> {
        self.calls.get(call_id).map(|c| c.value().clone())
    }

    /// The ID of the user's non-terminal call, if any.
    pub fn live_call_of(&self, user_id: &str) -> Option<String> {
        self.busy.get(user_id).map(|id| id.value().clone())
    }

    /// Start ringing `callee_id`.
    ///
    /// Returns the call in `Calling`, or already `Missed` when the callee
    /// has no live connection. A busy participant records the attempt as
    /// `Failed` and reports InvalidState.
    pub async fn initiate(&self, caller: &Identity, callee_id: &str, kind: CallKind) -> Result<Call, GatewayError> {
        let caller_id = caller.user_id.as_str();
        if callee_id.is_empty() || callee_id == caller_id {
            return Err(GatewayError::invalid_state("cannot call yourself"));
        }

        let now = Utc::now();
        let mut call = Call::new(prefixed_ulid(prefix::CALL), caller_id, callee_id, kind, now);

        if !self.claim(caller_id, &call.id) {
            return Err(self.record_busy(call, "you are already in a call").await);
        }
        if !self.claim(callee_id, &call.id) {
            self.release(caller_id, &call.id);
            return Err(self.record_busy(call, "user is busy").await);
        }

        self.calls.insert(call.id.clone(), call.clone());
        self.persist(&call).await;

        let ring = OutboundEvent::new(
            EventName::INCOMING_CALL,
            json!({
                "call_id": call.id,
                "kind": call.kind,
                "caller": caller,
                "started_at": call.started_at,
            }),
        );
        if self.hub.send_to_user(callee_id, &ring) {
            tracing::info!(call_id = %call.id, %caller_id, %callee_id, kind = call.kind.as_str(), "call ringing");
            return Ok(call);
        }

        // Callee unreachable: the caller only ever sees the terminal status.
        call = self
            .transition(&call.id, |c| c.miss(Utc::now()))
            .await?;
        self.hub.send_to_user(
            caller_id,
            &OutboundEvent::new(EventName::CALL_ENDED, ended_payload(&call, None, "unavailable")),
        );
        self.notify_missed(&call, Some(&caller.username)).await;
        tracing::info!(call_id = %call.id, %caller_id, %callee_id, "callee offline, call missed");
        Ok(call)
    }

    pub async fn accept(&self, call_id: &str, by: &str) -> Result<Call, GatewayError> {
        self.participant_call(call_id, by)?;
        let call = self.transition(call_id, |c| c.accept(by, Utc::now())).await?;
        self.hub.send_to_user(
            &call.caller_id,
            &OutboundEvent::new(
                EventName::CALL_ACCEPTED,
                json!({ "call_id": call.id, "callee_id": call.callee_id, "accepted_at": call.accepted_at }),
            ),
        );
        tracing::info!(call_id = %call.id, "call accepted");
        Ok(call)
    }

    pub async fn reject(&self, call_id: &str, by: &str) -> Result<Call, GatewayError> {
        self.participant_call(call_id, by)?;
        let call = self.transition(call_id, |c| c.reject(by, Utc::now())).await?;
        self.hub.send_to_user(
            &call.caller_id,
            &OutboundEvent::new(
                EventName::CALL_REJECTED,
                json!({ "call_id": call.id, "callee_id": call.callee_id }),
            ),
        );
        tracing::info!(call_id = %call.id, "call rejected");
        Ok(call)
    }

    /// Hang up from either side. A call that never connected ends as missed.
    pub async fn end(&self, call_id: &str, by: &str) -> Result<Call, GatewayError> {
        self.participant_call(call_id, by)?;
        let call = self.transition(call_id, |c| c.end(Utc::now())).await?;
        self.hub.send_to_user(
            call.peer_of(by),
            &OutboundEvent::new(EventName::CALL_ENDED, ended_payload(&call, Some(by), "hangup")),
        );
        tracing::info!(
            call_id = %call.id,
            status = %call.status,
            duration_secs = ?call.duration_secs,
            "call ended"
        );
        Ok(call)
    }

    /// Forward an offer, answer or ICE candidate to the other participant
    /// without looking inside it. Returns whether the peer was reached.
    pub fn relay(&self, call_id: &str, from: &str, event: &'static str, payload: Value) -> Result<bool, GatewayError> {
        let call = self.participant_call(call_id, from)?;
        if call.status.is_terminal() {
            return Err(GatewayError::invalid_state(format!(
                "cannot signal on a call that is {}",
                call.status
            )));
        }
        let out = OutboundEvent::new(
            event,
            json!({ "call_id": call.id, "from_user_id": from, "payload": payload }),
        );
        Ok(self.hub.send_to_user(call.peer_of(from), &out))
    }

    /// Tear down the live call of a user whose last connection closed.
    pub async fn on_user_offline(&self, user_id: &str) {
        let Some(call_id) = self.live_call_of(user_id) else {
            return;
        };
        let call = match self.transition(&call_id, |c| c.end(Utc::now())).await {
            Ok(call) => call,
            Err(e) => {
                tracing::debug!(%call_id, ?e, "call already finished when participant left");
                return;
            }
        };

        self.hub.send_to_user(
            call.peer_of(user_id),
            &OutboundEvent::new(
                EventName::CALL_ENDED,
                ended_payload(&call, Some(user_id), "disconnected"),
            ),
        );
        if call.status == CallStatus::Missed && call.callee_id == user_id {
            // The callee dropped while it was ringing.
            self.notify_missed(&call, None).await;
        }
        tracing::info!(call_id = %call.id, %user_id, status = %call.status, "call torn down on disconnect");
    }

    /// Drop terminal calls that ended more than the retention period ago.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let before = self.calls.len();
        self.calls.retain(|_, call| match call.ended_at {
            Some(ended) if call.status.is_terminal() => now - ended < retention,
            _ => true,
        });
        let removed = before.saturating_sub(self.calls.len());
        if removed > 0 {
            tracing::debug!(removed, "swept finished calls");
        }
        removed
    }

    /// Run `sweep` every `every` until the runtime shuts down.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep(Utc::now());
            }
        })
    }

    // -----------------------------------------------------------------------

    fn participant_call(&self, call_id: &str, user_id: &str) -> Result<Call, GatewayError> {
        match self.calls.get(call_id) {
            Some(call) if call.is_participant(user_id) => Ok(call.value().clone()),
            _ => Err(GatewayError::NotFound("call")),
        }
    }

    /// Apply a state change in memory, release claims once terminal, then
    /// persist. The map guard is dropped before any await.
    async fn transition<F>(&self, call_id: &str, apply: F) -> Result<Call, GatewayError>
    where
        F: FnOnce(&mut Call) -> Result<(), GatewayError>,
    {
        let call = {
            let mut entry = self
                .calls
                .get_mut(call_id)
                .ok_or(GatewayError::NotFound("call"))?;
            apply(entry.value_mut())?;
            entry.value().clone()
        };
        if call.status.is_terminal() {
            self.release(&call.caller_id, &call.id);
            self.release(&call.callee_id, &call.id);
        }
        self.persist(&call).await;
        Ok(call)
    }

    fn claim(&self, user_id: &str, call_id: &str) -> bool {
        match self.busy.entry(user_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(call_id.to_string());
                true
            }
        }
    }

    fn release(&self, user_id: &str, call_id: &str) {
        self.busy.remove_if(user_id, |_, live| live == call_id);
    }

    async fn record_busy(&self, mut call: Call, reason: &str) -> GatewayError {
        if call.fail(Utc::now()).is_ok() {
            self.calls.insert(call.id.clone(), call.clone());
            self.persist(&call).await;
        }
        tracing::info!(call_id = %call.id, caller_id = %call.caller_id, callee_id = %call.callee_id, %reason, "call failed");
        GatewayError::invalid_state(reason)
    }

    async fn notify_missed(&self, call: &Call, caller_username: Option<&str>) {
        self.notifier
            .notify(
                &call.callee_id,
                &call.caller_id,
                NotificationKind::MissedCall,
                json!({
                    "call_id": call.id,
                    "kind": call.kind,
                    "caller_username": caller_username,
                }),
            )
            .await;
    }

    async fn persist(&self, call: &Call) {
        if let Err(e) = self.store.save_call_record(call).await {
            tracing::error!(call_id = %call.id, status = %call.status, ?e, "failed to persist call record");
        }
    }
}

fn ended_payload(call: &Call, ended_by: Option<&str>, reason: &str) -> Value {
    json!({
        "call_id": call.id,
        "status": call.status,
        "ended_by": ended_by,
        "reason": reason,
        "duration_secs": call.duration_secs,
    })
}
