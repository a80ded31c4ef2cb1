//! What a served namespace does with its connections.

use super::{Ack, ConnectMiddleware, ConnectionRef, EventHandler, Packet, PacketMiddleware};
use crate::error::ServiceError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Middleware chains and event handlers of one namespace.
///
/// Built by the router when a namespace is registered and shared by every
/// connection of that namespace. Transports call [`admit`](Self::admit)
/// before a connection is accepted and [`deliver`](Self::deliver) for each
/// inbound packet.
pub struct NamespaceService {
    path: String,
    middlewares: Vec<Arc<dyn ConnectMiddleware>>,
    packet_middlewares: Vec<Arc<dyn PacketMiddleware>>,
    handlers: BTreeMap<String, Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for NamespaceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceService")
            .field("path", &self.path)
            .field("middlewares", &self.middlewares.len())
            .field("packet_middlewares", &self.packet_middlewares.len())
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NamespaceService {
    pub fn new(
        path: impl Into<String>,
        middlewares: Vec<Arc<dyn ConnectMiddleware>>,
        packet_middlewares: Vec<Arc<dyn PacketMiddleware>>,
        handlers: BTreeMap<String, Arc<dyn EventHandler>>,
    ) -> Self {
        Self {
            path: path.into(),
            middlewares,
            packet_middlewares,
            handlers,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bound event names, sorted.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the connection middlewares in order. The first error refuses the
    /// connection.
    pub async fn admit(&self, conn: &ConnectionRef) -> Result<(), ServiceError> {
        for middleware in &self.middlewares {
            if let Err(err) = middleware.on_connect(conn).await {
                debug!(namespace = %self.path, "Connection refused: {}", err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Called by the transport once an admitted connection is live.
    pub fn connected(&self, conn: &ConnectionRef) {
        info!(socket_id = %conn.id(), namespace = %self.path, "Client connected");
    }

    /// Feed an inbound packet through the packet middlewares to its handler.
    pub async fn deliver(&self, conn: ConnectionRef, packet: Packet, ack: Option<Ack>) {
        if !conn.is_connected() {
            return;
        }

        for middleware in &self.packet_middlewares {
            if let Err(err) = middleware.on_packet(&conn, &packet).await {
                debug!(socket_id = %conn.id(), "Packet '{}' rejected: {}", packet.event, err);
                let payload = serde_json::to_value(err.to_payload()).unwrap_or(Value::Null);
                conn.emit("error", vec![payload]);
                return;
            }
        }

        match self.handlers.get(&packet.event) {
            Some(handler) => handler.handle(conn, packet.args, ack).await,
            None => warn!(socket_id = %conn.id(), "No handler for event '{}'", packet.event),
        }
    }
}
