//! Per-connection state shared by the transports.

use super::ConnectionId;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeSet;

struct Membership {
    open: bool,
    rooms: Vec<String>,
}

/// Open flag, rooms in join order and the attached user.
///
/// The open flag and the room list live under one lock, and the callbacks
/// that mirror a change into the transport's room index run while it is
/// held. A close racing a join therefore sees either the joined room (and
/// removes it) or an already-closed session (and the join is dropped).
pub(crate) struct Session {
    membership: RwLock<Membership>,
    user: RwLock<Option<Value>>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            membership: RwLock::new(Membership {
                open: true,
                rooms: Vec::new(),
            }),
            user: RwLock::new(None),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.membership.read().open
    }

    pub(crate) fn rooms(&self) -> Vec<String> {
        self.membership.read().rooms.clone()
    }

    /// Join `rooms`, calling `on_join` for each room actually added.
    pub(crate) fn join(&self, rooms: &[String], mut on_join: impl FnMut(&str)) {
        let mut membership = self.membership.write();
        if !membership.open {
            return;
        }
        for room in rooms {
            if membership.rooms.contains(room) {
                continue;
            }
            membership.rooms.push(room.clone());
            on_join(room);
        }
    }

    /// Leave `room`, calling `on_leave` if it was joined.
    pub(crate) fn leave(&self, room: &str, on_leave: impl FnOnce(&str)) {
        let mut membership = self.membership.write();
        let before = membership.rooms.len();
        membership.rooms.retain(|joined| joined != room);
        if membership.rooms.len() != before {
            on_leave(room);
        }
    }

    /// Mark the session closed and call `on_leave` for every joined room.
    /// Returns `false` if it was already closed.
    pub(crate) fn close(&self, mut on_leave: impl FnMut(&str)) -> bool {
        let mut membership = self.membership.write();
        if !membership.open {
            return false;
        }
        membership.open = false;
        for room in std::mem::take(&mut membership.rooms) {
            on_leave(&room);
        }
        true
    }

    pub(crate) fn user(&self) -> Option<Value> {
        self.user.read().clone()
    }

    pub(crate) fn set_user(&self, user: Option<Value>) {
        *self.user.write() = user;
    }
}

/// Room name to member ids, for one namespace.
#[derive(Default)]
pub(crate) struct RoomIndex(DashMap<String, BTreeSet<ConnectionId>>);

impl RoomIndex {
    pub(crate) fn add(&self, room: &str, id: &str) {
        self.0.entry(room.to_string()).or_default().insert(id.to_string());
    }

    /// Empty rooms are dropped.
    pub(crate) fn remove(&self, room: &str, id: &str) {
        if let Some(mut members) = self.0.get_mut(room) {
            members.remove(id);
        }
        self.0.remove_if(room, |_, members| members.is_empty());
    }

    pub(crate) fn members(&self, room: &str) -> BTreeSet<ConnectionId> {
        self.0.get(room).map(|members| members.clone()).unwrap_or_default()
    }

    /// Members of any of `rooms`, each once.
    pub(crate) fn union<'a>(&self, rooms: impl IntoIterator<Item = &'a String>) -> BTreeSet<ConnectionId> {
        rooms.into_iter().flat_map(|room| self.members(room)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rooms(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn join_keeps_order_and_skips_duplicates() {
        let session = Session::new();
        let mut added = Vec::new();
        session.join(&rooms(&["id", "a", "a", "b"]), |r| added.push(r.to_string()));
        session.join(&rooms(&["a"]), |r| added.push(r.to_string()));
        assert_eq!(session.rooms(), rooms(&["id", "a", "b"]));
        assert_eq!(added, rooms(&["id", "a", "b"]));
    }

    #[test]
    fn leave_reports_only_joined_rooms() {
        let session = Session::new();
        session.join(&rooms(&["a"]), |_| {});
        let mut left = Vec::new();
        session.leave("missing", |r| left.push(r.to_string()));
        session.leave("a", |r| left.push(r.to_string()));
        session.leave("a", |r| left.push(r.to_string()));
        assert_eq!(left, rooms(&["a"]));
        assert!(session.rooms().is_empty());
    }

    #[test]
    fn closed_session_ignores_joins() {
        let session = Session::new();
        session.join(&rooms(&["id", "a"]), |_| {});
        let mut left = Vec::new();
        assert!(session.close(|r| left.push(r.to_string())));
        assert!(!session.close(|_| panic!("closed twice")));
        assert_eq!(left, rooms(&["id", "a"]));

        session.join(&rooms(&["b"]), |_| panic!("joined after close"));
        assert!(session.rooms().is_empty());
        assert!(!session.is_open());
    }

    #[test]
    fn room_index_drops_empty_rooms() {
        let index = RoomIndex::default();
        index.add("a", "s1");
        index.add("a", "s2");
        index.add("b", "s2");
        assert_eq!(index.union(&rooms(&["a", "b"])).len(), 2);

        index.remove("a", "s1");
        index.remove("a", "s2");
        assert!(index.members("a").is_empty());
        assert!(index.0.get("a").is_none());
        assert_eq!(index.members("b").into_iter().collect::<Vec<_>>(), rooms(&["s2"]));
    }
}
