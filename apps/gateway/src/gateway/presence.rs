//! Who is reachable right now.
//!
//! Presence is per **user**, backed by per-connection entries: a user is
//! online while at least one connection is registered for them. The table
//! is plain data; `Hub` owns it behind its lock together with room
//! membership so both change atomically.

use std::collections::{HashMap, HashSet};

use super::events::UserStatus;

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub user_id: String,
    /// The removed connection was the user's last one.
    pub went_offline: bool,
}

/// A connection ID is already registered to a different user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipConflict {
    pub connection_id: String,
    pub owner: String,
}

#[derive(Debug, Default)]
pub struct PresenceTable {
    by_user: HashMap<String, HashSet<String>>,
    by_connection: HashMap<String, String>,
    /// Client-chosen status for online users only.
    status: HashMap<String, UserStatus>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `connection_id` for `user_id`. Returns `true` when this made the
    /// user come online. Re-registering the same pair is a no-op.
    pub fn register(&mut self, connection_id: &str, user_id: &str) -> Result<bool, OwnershipConflict> {
        if let Some(owner) = self.by_connection.get(connection_id) {
            if owner == user_id {
                return Ok(false);
            }
            return Err(OwnershipConflict {
                connection_id: connection_id.to_string(),
                owner: owner.clone(),
            });
        }

        self.by_connection
            .insert(connection_id.to_string(), user_id.to_string());
        let connections = self.by_user.entry(user_id.to_string()).or_default();
        connections.insert(connection_id.to_string());

        let came_online = connections.len() == 1;
        if came_online {
            self.status.insert(user_id.to_string(), UserStatus::Online);
        }
        Ok(came_online)
    }

    /// Remove exactly this connection's entry.
    pub fn unregister(&mut self, connection_id: &str) -> Option<Unregistered> {
        let user_id = self.by_connection.remove(connection_id)?;

        let went_offline = match self.by_user.get_mut(&user_id) {
            Some(connections) => {
                connections.remove(connection_id);
                connections.is_empty()
            }
            None => true,
        };
        if went_offline {
            self.by_user.remove(&user_id);
            self.status.remove(&user_id);
        }

        Some(Unregistered {
            user_id,
            went_offline,
        })
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn connections_for(&self, user_id: &str) -> HashSet<String> {
        self.by_user.get(user_id).cloned().unwrap_or_default()
    }

    pub fn user_of(&self, connection_id: &str) -> Option<&str> {
        self.by_connection.get(connection_id).map(String::as_str)
    }

    /// Update an online user's status. Returns the previous status if it changed.
    pub fn set_status(&mut self, user_id: &str, status: UserStatus) -> Option<UserStatus> {
        let current = self.status.get_mut(user_id)?;
        if *current == status {
            return None;
        }
        Some(std::mem::replace(current, status))
    }

    pub fn status(&self, user_id: &str) -> UserStatus {
        self.status
            .get(user_id)
            .copied()
            .unwrap_or(UserStatus::Offline)
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }

    /// Forward and reverse maps mirror each other exactly and no user is
    /// present with an empty set.
    pub fn is_consistent(&self) -> bool {
        let forward_total: usize = self.by_user.values().map(HashSet::len).sum();
        forward_total == self.by_connection.len()
            && self.by_user.iter().all(|(user, conns)| {
                !conns.is_empty()
                    && conns
                        .iter()
                        .all(|c| self.by_connection.get(c).map(String::as_str) == Some(user.as_str()))
            })
            && self.status.keys().all(|u| self.by_user.contains_key(u))
    }
}
