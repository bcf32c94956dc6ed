use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::calls;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    #[default]
    Audio,
    Video,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Lifecycle of a call.
///
/// ```text
/// Calling ──accept──▶ Active ──end──▶ Ended
///    │
///    ├──reject──▶ Rejected
///    ├──end / unreachable──▶ Missed
///    └──busy──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Calling,
    Active,
    Ended,
    Rejected,
    Missed,
    Failed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calling => "calling",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Rejected => "rejected",
            Self::Missed => "missed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Calling | Self::Active)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Call {
    pub id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub kind: CallKind,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl Call {
    pub fn new(id: String, caller_id: &str, callee_id: &str, kind: CallKind, at: DateTime<Utc>) -> Self {
        Self {
            id,
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            kind,
            status: CallStatus::Calling,
            started_at: at,
            accepted_at: None,
            ended_at: None,
            duration_secs: None,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// The participant on the other end from `user_id`.
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.caller_id == user_id {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }

    pub fn accept(&mut self, by: &str, at: DateTime<Utc>) -> Result<(), GatewayError> {
        self.require_callee(by, "accept")?;
        self.require_status(CallStatus::Calling, "accept")?;
        self.status = CallStatus::Active;
        self.accepted_at = Some(at);
        Ok(())
    }

    pub fn reject(&mut self, by: &str, at: DateTime<Utc>) -> Result<(), GatewayError> {
        self.require_callee(by, "reject")?;
        self.require_status(CallStatus::Calling, "reject")?;
        self.finish(CallStatus::Rejected, at);
        Ok(())
    }

    /// Hang up. A call that never connected is recorded as missed.
    pub fn end(&mut self, at: DateTime<Utc>) -> Result<(), GatewayError> {
        match self.status {
            CallStatus::Calling => self.finish(CallStatus::Missed, at),
            CallStatus::Active => self.finish(CallStatus::Ended, at),
            status => {
                return Err(GatewayError::invalid_state(format!(
                    "cannot end a call that is already {status}"
                )))
            }
        }
        Ok(())
    }

    /// Callee unreachable before the call connected.
    pub fn miss(&mut self, at: DateTime<Utc>) -> Result<(), GatewayError> {
        self.require_status(CallStatus::Calling, "miss")?;
        self.finish(CallStatus::Missed, at);
        Ok(())
    }

    /// Call could not be set up (a participant is busy).
    pub fn fail(&mut self, at: DateTime<Utc>) -> Result<(), GatewayError> {
        self.require_status(CallStatus::Calling, "fail")?;
        self.finish(CallStatus::Failed, at);
        Ok(())
    }

    fn finish(&mut self, status: CallStatus, at: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(at);
        if status == CallStatus::Ended {
            self.duration_secs = self.accepted_at.map(|accepted| (at - accepted).num_seconds());
        }
    }

    fn require_callee(&self, by: &str, action: &str) -> Result<(), GatewayError> {
        if self.callee_id != by {
            return Err(GatewayError::invalid_state(format!(
                "only the callee can {action} a call"
            )));
        }
        Ok(())
    }

    fn require_status(&self, expected: CallStatus, action: &str) -> Result<(), GatewayError> {
        if self.status != expected {
            return Err(GatewayError::invalid_state(format!(
                "cannot {action} a call that is {}",
                self.status
            )));
        }
        Ok(())
    }
}

/// Upsert row for the `calls` table.
#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = calls)]
pub struct CallRecord<'a> {
    pub id: &'a str,
    pub caller_id: &'a str,
    pub callee_id: &'a str,
    pub kind: &'a str,
    pub status: &'a str,
    pub started_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl<'a> From<&'a Call> for CallRecord<'a> {
    fn from(c: &'a Call) -> Self {
        Self {
            id: &c.id,
            caller_id: &c.caller_id,
            callee_id: &c.callee_id,
            kind: c.kind.as_str(),
            status: c.status.as_str(),
            started_at: c.started_at,
            accepted_at: c.accepted_at,
            ended_at: c.ended_at,
            duration_secs: c.duration_secs,
        }
    }
}
