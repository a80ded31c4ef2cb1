//! Server-initiated emissions.

use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

fn default_namespace() -> String {
    "/".to_string()
}

/// Where and how to emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastOptions {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Union of recipients; empty = the whole namespace.
    #[serde(default)]
    pub rooms: Vec<String>,
    #[serde(default)]
    pub volatile: bool,
    #[serde(default)]
    pub local: bool,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            rooms: Vec::new(),
            volatile: false,
            local: false,
        }
    }
}

impl BroadcastOptions {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.rooms.push(room.into());
        self
    }

    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }
}

/// Parameters of the `broadcast` administrative action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub event: String,
    #[serde(flatten)]
    pub options: BroadcastOptions,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Emit `event` with `args`. Fire-and-forget: returns how many local sockets
/// were written to, 0 when the namespace does not exist.
pub fn broadcast(io: &dyn Transport, event: &str, options: &BroadcastOptions, args: Vec<Value>) -> usize {
    if !io.has(&options.namespace) {
        debug!("Broadcast '{}' to unknown namespace '{}'", event, options.namespace);
        return 0;
    }

    let delivered = io.broadcast(options, event, args);
    debug!(
        namespace = %options.namespace,
        rooms = ?options.rooms,
        "Broadcast '{}' delivered to {} socket(s)",
        event,
        delivered
    );
    delivered
}
