//! Routing hub for dispatching gateway events to live connections.
//!
//! Presence, room membership and each connection's outbound channel live
//! behind one lock so registration, joins and disconnects are linearizable.
//! Fan-out copies the recipient senders under the lock and sends after it is
//! released; a send into an unbounded channel never blocks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::events::{OutboundEvent, UserStatus};
use super::presence::{OwnershipConflict, PresenceTable};
use super::rooms::{RoomId, RoomTable};

/// Writer half of a connection's outbound queue.
pub type OutboundTx = mpsc::UnboundedSender<Arc<OutboundEvent>>;
pub type OutboundRx = mpsc::UnboundedReceiver<Arc<OutboundEvent>>;

/// Outcome of `Hub::join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    pub newly_joined: bool,
    pub members: usize,
}

/// Everything `Hub::disconnect` removed for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    pub user_id: String,
    pub went_offline: bool,
    /// Rooms the connection was in, with the member count left behind.
    pub rooms: Vec<(RoomId, usize)>,
}

#[derive(Default)]
struct HubState {
    presence: PresenceTable,
    rooms: RoomTable,
    outbound: HashMap<String, OutboundTx>,
}

impl HubState {
    fn senders_for_user(&self, user_id: &str) -> Vec<(String, OutboundTx)> {
        self.presence
            .connections_for(user_id)
            .into_iter()
            .filter_map(|conn| self.outbound.get(&conn).map(|tx| (conn, tx.clone())))
            .collect()
    }
}

#[derive(Default)]
pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection: presence entry, outbound channel and personal
    /// room in one step. Returns `true` when the user came online.
    pub fn connect(
        &self,
        connection_id: &str,
        user_id: &str,
        tx: OutboundTx,
    ) -> Result<bool, OwnershipConflict> {
        let mut state = self.state.lock();
        let came_online = state.presence.register(connection_id, user_id)?;
        state.outbound.insert(connection_id.to_string(), tx);
        state
            .rooms
            .join(connection_id, &RoomId::personal(user_id));
        Ok(came_online)
    }

    /// Remove a connection from presence, every room and the outbound table.
    pub fn disconnect(&self, connection_id: &str) -> Option<Disconnected> {
        let mut state = self.state.lock();
        state.outbound.remove(connection_id);
        let rooms = state.rooms.leave_all(connection_id);
        let removed = state.presence.unregister(connection_id)?;
        Some(Disconnected {
            user_id: removed.user_id,
            went_offline: removed.went_offline,
            rooms,
        })
    }

    /// Returns `None` when the connection is not registered.
    pub fn join(&self, connection_id: &str, room: &RoomId) -> Option<Joined> {
        let mut state = self.state.lock();
        state.presence.user_of(connection_id)?;
        let newly_joined = state.rooms.join(connection_id, room);
        Some(Joined {
            newly_joined,
            members: state.rooms.size(room),
        })
    }

    pub fn leave(&self, connection_id: &str, room: &RoomId) -> Option<usize> {
        self.state.lock().rooms.leave(connection_id, room)
    }

    /// Deliver `event` to every member of `room` except the listed
    /// connections. Returns the number of connections reached.
    pub fn broadcast(&self, room: &RoomId, event: &Arc<OutboundEvent>, exclude: &[String]) -> usize {
        let targets: Vec<OutboundTx> = {
            let state = self.state.lock();
            state
                .rooms
                .members(room)
                .filter(|conn| !exclude.contains(conn))
                .filter_map(|conn| state.outbound.get(conn).cloned())
                .collect()
        };

        targets
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Deliver to every live connection of `user_id`, returning the
    /// connection IDs that accepted the event.
    pub fn reach_user(&self, user_id: &str, event: &Arc<OutboundEvent>) -> Vec<String> {
        let targets = self.state.lock().senders_for_user(user_id);
        targets
            .into_iter()
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .map(|(conn, _)| conn)
            .collect()
    }

    /// `false` is a delivery miss: the user has no live connection.
    pub fn send_to_user(&self, user_id: &str, event: &Arc<OutboundEvent>) -> bool {
        !self.reach_user(user_id, event).is_empty()
    }

    pub fn send_to_connection(&self, connection_id: &str, event: &Arc<OutboundEvent>) -> bool {
        let tx = self.state.lock().outbound.get(connection_id).cloned();
        tx.is_some_and(|tx| tx.send(event.clone()).is_ok())
    }

    pub fn room_size(&self, room: &RoomId) -> usize {
        self.state.lock().rooms.size(room)
    }

    pub fn is_member(&self, connection_id: &str, room: &RoomId) -> bool {
        self.state.lock().rooms.is_member(connection_id, room)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.state.lock().presence.is_online(user_id)
    }

    pub fn connections_for(&self, user_id: &str) -> HashSet<String> {
        self.state.lock().presence.connections_for(user_id)
    }

    pub fn status(&self, user_id: &str) -> UserStatus {
        self.state.lock().presence.status(user_id)
    }

    /// Returns the previous status when the update changed anything.
    pub fn set_status(&self, user_id: &str, status: UserStatus) -> Option<UserStatus> {
        self.state.lock().presence.set_status(user_id, status)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().presence.connection_count()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn channel() -> (OutboundTx, OutboundRx) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut OutboundRx) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            names.push(ev.name);
        }
        names
    }

    #[test]
    fn connect_joins_personal_room() {
        let hub = Hub::new();
        let (tx, _rx) = channel();
        assert!(hub.connect("c1", "u1", tx).unwrap());
        assert!(hub.is_member("c1", &RoomId::personal("u1")));
        assert!(hub.is_online("u1"));
    }

    #[test]
    fn send_to_user_reaches_every_device() {
        let hub = Hub::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        hub.connect("c1", "u1", tx1).unwrap();
        assert!(!hub.connect("c2", "u1", tx2).unwrap());

        let ev = OutboundEvent::new("ping", json!({}));
        assert!(hub.send_to_user("u1", &ev));
        assert_eq!(drain(&mut rx1), vec!["ping"]);
        assert_eq!(drain(&mut rx2), vec!["ping"]);

        assert!(!hub.send_to_user("nobody", &ev));
    }

    #[test]
    fn broadcast_respects_exclusions() {
        let hub = Hub::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        hub.connect("c1", "u1", tx1).unwrap();
        hub.connect("c2", "u2", tx2).unwrap();
        let room = RoomId::stream("s1");
        hub.join("c1", &room);
        hub.join("c2", &room);

        let ev = OutboundEvent::new("stream_reaction", json!({}));
        assert_eq!(hub.broadcast(&room, &ev, &["c1".to_string()]), 1);
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2), vec!["stream_reaction"]);
    }

    #[test]
    fn join_requires_registered_connection() {
        let hub = Hub::new();
        assert_eq!(hub.join("ghost", &RoomId::stream("s1")), None);

        let (tx, _rx) = channel();
        hub.connect("c1", "u1", tx).unwrap();
        let room = RoomId::stream("s1");
        assert_eq!(hub.join("c1", &room), Some(Joined { newly_joined: true, members: 1 }));
        assert_eq!(hub.join("c1", &room), Some(Joined { newly_joined: false, members: 1 }));
    }

    #[test]
    fn disconnect_clears_every_trace() {
        let hub = Hub::new();
        let (tx1, _rx1) = channel();
        let (tx2, mut rx2) = channel();
        hub.connect("c1", "u1", tx1).unwrap();
        hub.connect("c2", "u2", tx2).unwrap();
        let room = RoomId::stream("s1");
        hub.join("c1", &room);
        hub.join("c2", &room);

        let gone = hub.disconnect("c1").unwrap();
        assert_eq!(gone.user_id, "u1");
        assert!(gone.went_offline);
        assert!(gone.rooms.contains(&(room.clone(), 1)));
        assert!(gone.rooms.contains(&(RoomId::personal("u1"), 0)));

        assert!(!hub.is_online("u1"));
        assert_eq!(hub.room_size(&room), 1);
        assert!(!hub.send_to_connection("c1", &OutboundEvent::new("x", json!({}))));
        assert!(hub.send_to_connection("c2", &OutboundEvent::new("x", json!({}))));
        assert_eq!(drain(&mut rx2), vec!["x"]);

        assert!(hub.disconnect("c1").is_none());
    }

    #[test]
    fn conflicting_registration_is_refused() {
        let hub = Hub::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        hub.connect("c1", "u1", tx1).unwrap();
        assert!(hub.connect("c1", "u2", tx2).is_err());
        assert!(!hub.is_online("u2"));
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn events_arrive_in_send_order() {
        let hub = Hub::new();
        let (tx, mut rx) = channel();
        hub.connect("c1", "u1", tx).unwrap();
        for name in ["a", "b", "c"] {
            hub.send_to_connection("c1", &OutboundEvent::new(name, json!({})));
        }
        assert_eq!(drain(&mut rx), vec!["a", "b", "c"]);
    }
}
