//! Call metadata: what a call carries about its socket, and what the
//! response metadata asks the gateway to do afterwards.

use crate::transport::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SOCKET_ID_KEY: &str = "$socketId";
pub const ROOMS_KEY: &str = "$rooms";
pub const USER_KEY: &str = "user";
pub const JOIN_KEY: &str = "$join";
pub const LEAVE_KEY: &str = "$leave";

/// Snapshot of a socket attached to every outgoing call as `meta`.
///
/// `rooms` is in join order, so the socket's own id room comes first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketMeta {
    #[serde(rename = "$socketId")]
    pub socket_id: String,
    #[serde(rename = "$rooms")]
    pub rooms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl SocketMeta {
    pub fn extract(conn: &dyn Connection) -> Self {
        Self {
            socket_id: conn.id().to_string(),
            rooms: conn.rooms(),
            user: conn.user(),
        }
    }

    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(SOCKET_ID_KEY.to_string(), Value::String(self.socket_id));
        map.insert(
            ROOMS_KEY.to_string(),
            Value::Array(self.rooms.into_iter().map(Value::String).collect()),
        );
        if let Some(user) = self.user {
            map.insert(USER_KEY.to_string(), user);
        }
        map
    }
}

/// Identity change requested by a response.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UserUpdate {
    /// The response meta has no `user` key.
    #[default]
    Unchanged,
    /// Replace the identity; `None` logs the socket out.
    Set(Option<Value>),
}

/// Side effects read from response metadata right after a call returns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaEffects {
    pub user: UserUpdate,
    pub join: Vec<String>,
    pub leave: Vec<String>,
}

impl MetaEffects {
    pub fn from_meta(meta: &Map<String, Value>) -> Self {
        let user = match meta.get(USER_KEY) {
            None => UserUpdate::Unchanged,
            Some(Value::Null) => UserUpdate::Set(None),
            Some(user) => UserUpdate::Set(Some(user.clone())),
        };
        Self {
            user,
            join: room_names(meta.get(JOIN_KEY)),
            leave: room_names(meta.get(LEAVE_KEY)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user == UserUpdate::Unchanged && self.join.is_empty() && self.leave.is_empty()
    }
}

/// A room request is a single name or a list of names; anything else is ignored.
fn room_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(room)) => vec![room.clone()],
        Some(Value::Array(rooms)) => rooms
            .iter()
            .filter_map(|room| room.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
