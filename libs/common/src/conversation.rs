//! Deterministic conversation identifiers for one-to-one threads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier shared by both participants of a direct conversation.
///
/// Built from the two user IDs sorted as plain strings and joined with `_`,
/// so `between("bob", "alice")` and `between("alice", "bob")` are both
/// `"alice_bob"`. IDs already persisted by other services use this exact
/// rule; do not change the ordering or the separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn between(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{first}_{second}"))
    }

    /// Wrap an identifier received from a client or the database.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `user_id` is one of the two participants.
    ///
    /// User IDs may themselves contain `_`, so both split points are tried.
    pub fn includes(&self, user_id: &str) -> bool {
        if let Some(rest) = self.0.strip_prefix(user_id) {
            if let Some(other) = rest.strip_prefix('_') {
                return Self::between(user_id, other) == *self;
            }
        }
        if let Some(rest) = self.0.strip_suffix(user_id) {
            if let Some(other) = rest.strip_suffix('_') {
                return Self::between(other, user_id) == *self;
            }
        }
        false
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
