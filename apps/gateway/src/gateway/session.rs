//! Per-connection gateway session state.

use crate::auth::tokens::Identity;
use crate::config::Config;

use super::ratelimit::SlidingWindow;

/// State owned by a single WebSocket connection task.
///
/// Room memberships are tracked by the hub; this holds what only the
/// connection itself needs.
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Authenticated identity, fixed for the connection's lifetime.
    pub identity: Identity,
    /// Budget for chat-class events.
    pub limiter: SlidingWindow,
    seq: u64,
}

impl GatewaySession {
    pub fn new(connection_id: String, identity: Identity, config: &Config) -> Self {
        Self {
            connection_id,
            identity,
            limiter: SlidingWindow::new(config.rate_limit_max_events, config.rate_limit_window()),
            seq: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}
