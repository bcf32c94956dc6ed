//! Named groups of connections that receive the same events.

use std::collections::{HashMap, HashSet};
use std::fmt;

use agora_common::ConversationId;

/// Typed room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Every connection of one user.
    Personal(String),
    /// Participants of a direct conversation who opened it.
    Conversation(ConversationId),
    /// Viewers of one live stream.
    Stream(String),
}

impl RoomId {
    pub fn personal(user_id: impl Into<String>) -> Self {
        Self::Personal(user_id.into())
    }

    pub fn stream(stream_id: impl Into<String>) -> Self {
        Self::Stream(stream_id.into())
    }

    pub fn is_personal(&self) -> bool {
        matches!(self, Self::Personal(_))
    }

    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Self::Stream(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Personal(id) => write!(f, "user:{id}"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::Stream(id) => write!(f, "stream:{id}"),
        }
    }
}

/// Room membership, indexed both ways so a disconnect can leave every room
/// without scanning.
#[derive(Debug, Default)]
pub struct RoomTable {
    members: HashMap<RoomId, HashSet<String>>,
    rooms_of: HashMap<String, HashSet<RoomId>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the connection was not already a member.
    pub fn join(&mut self, connection_id: &str, room: &RoomId) -> bool {
        let inserted = self
            .members
            .entry(room.clone())
            .or_default()
            .insert(connection_id.to_string());
        if inserted {
            self.rooms_of
                .entry(connection_id.to_string())
                .or_default()
                .insert(room.clone());
        }
        inserted
    }

    /// Returns the remaining member count if the connection was a member.
    /// Empty rooms are dropped.
    pub fn leave(&mut self, connection_id: &str, room: &RoomId) -> Option<usize> {
        let members = self.members.get_mut(room)?;
        if !members.remove(connection_id) {
            return None;
        }
        let remaining = members.len();
        if remaining == 0 {
            self.members.remove(room);
        }

        if let Some(rooms) = self.rooms_of.get_mut(connection_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.rooms_of.remove(connection_id);
            }
        }
        Some(remaining)
    }

    /// Remove the connection from every room it belongs to, returning each
    /// room with its remaining member count.
    pub fn leave_all(&mut self, connection_id: &str) -> Vec<(RoomId, usize)> {
        let Some(rooms) = self.rooms_of.remove(connection_id) else {
            return Vec::new();
        };

        let mut left = Vec::with_capacity(rooms.len());
        for room in rooms {
            let remaining = match self.members.get_mut(&room) {
                Some(members) => {
                    members.remove(connection_id);
                    members.len()
                }
                None => 0,
            };
            if remaining == 0 {
                self.members.remove(&room);
            }
            left.push((room, remaining));
        }
        left
    }

    pub fn members(&self, room: &RoomId) -> impl Iterator<Item = &String> {
        self.members.get(room).into_iter().flatten()
    }

    pub fn size(&self, room: &RoomId) -> usize {
        self.members.get(room).map_or(0, HashSet::len)
    }

    pub fn is_member(&self, connection_id: &str, room: &RoomId) -> bool {
        self.members
            .get(room)
            .is_some_and(|m| m.contains(connection_id))
    }

    pub fn rooms_of(&self, connection_id: &str) -> HashSet<RoomId> {
        self.rooms_of.get(connection_id).cloned().unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_join_is_single_membership() {
        let mut rooms = RoomTable::new();
        let room = RoomId::stream("s1");
        assert!(rooms.join("c1", &room));
        assert!(!rooms.join("c1", &room));
        assert_eq!(rooms.size(&room), 1);

        assert_eq!(rooms.leave("c1", &room), Some(0));
        assert!(!rooms.is_member("c1", &room));
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn leave_of_non_member_is_none() {
        let mut rooms = RoomTable::new();
        let room = RoomId::stream("s1");
        rooms.join("c1", &room);
        assert_eq!(rooms.leave("c2", &room), None);
        assert_eq!(rooms.leave("c1", &RoomId::stream("other")), None);
        assert_eq!(rooms.size(&room), 1);
    }

    #[test]
    fn leave_all_reports_remaining_counts() {
        let mut rooms = RoomTable::new();
        let stream = RoomId::stream("s1");
        let personal = RoomId::personal("u1");
        rooms.join("c1", &stream);
        rooms.join("c2", &stream);
        rooms.join("c1", &personal);

        let mut left = rooms.leave_all("c1");
        left.sort_by_key(|(room, _)| room.to_string());
        assert_eq!(left, vec![(stream.clone(), 1), (personal.clone(), 0)]);

        assert_eq!(rooms.size(&stream), 1);
        assert_eq!(rooms.size(&personal), 0);
        assert!(rooms.rooms_of("c1").is_empty());
        assert!(rooms.leave_all("c1").is_empty());
    }

    #[test]
    fn room_ids_are_distinct_per_kind() {
        let conversation = RoomId::Conversation(ConversationId::between("a", "b"));
        assert_eq!(conversation.to_string(), "conversation:a_b");
        assert_ne!(RoomId::personal("x"), RoomId::stream("x"));
        assert_eq!(RoomId::stream("x").stream_id(), Some("x"));
        assert!(RoomId::personal("x").is_personal());
    }
}
