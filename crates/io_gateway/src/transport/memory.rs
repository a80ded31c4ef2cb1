//! In-process transport.
//!
//! Clients are created with [`MemoryTransport::connect`] and drive the
//! namespace by calling [`MemoryConnection::receive`]; everything the server
//! writes to them arrives on the [`Frame`] channel returned alongside.

use super::session::{RoomIndex, Session};
use super::{
    normalize_path, Ack, AckResponder, AckResponse, Connection, ConnectionId, ConnectionRef,
    Handshake, NamespaceService, Packet, Transport,
};
use crate::broadcast::BroadcastOptions;
use crate::error::ServiceError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// What the server wrote to one client.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event { event: String, args: Vec<Value> },
    Disconnect { reason: String },
}

struct MemoryNamespace {
    service: Arc<NamespaceService>,
    connections: DashMap<ConnectionId, Arc<MemoryConnection>>,
    rooms: RoomIndex,
}

impl MemoryNamespace {
    fn disconnect_all(&self, reason: &str) -> usize {
        let connections: Vec<Arc<MemoryConnection>> =
            self.connections.iter().map(|c| c.value().clone()).collect();
        for conn in &connections {
            conn.close(reason);
        }
        connections.len()
    }
}

/// Namespace registry for in-process clients.
#[derive(Default)]
pub struct MemoryTransport {
    namespaces: DashMap<String, Arc<MemoryNamespace>>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect a client to `path`.
    ///
    /// The namespace middlewares run first; an admitted connection joins its
    /// own id room before it is returned.
    pub async fn connect(
        &self,
        path: &str,
        handshake: Handshake,
    ) -> Result<(Arc<MemoryConnection>, mpsc::UnboundedReceiver<Frame>), ServiceError> {
        let path = normalize_path(path);
        let namespace = self
            .namespaces
            .get(&path)
            .map(|ns| ns.value().clone())
            .ok_or_else(|| ServiceError::new("ConnectError", "Invalid namespace", 404))?;

        let (frames, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(MemoryConnection {
            id: uuid::Uuid::new_v4().simple().to_string(),
            namespace: path,
            handshake,
            session: Session::new(),
            writable: AtomicBool::new(true),
            frames,
            owner: Arc::downgrade(&namespace),
        });

        let conn_ref: ConnectionRef = conn.clone();
        namespace.service.admit(&conn_ref).await?;

        namespace.connections.insert(conn.id.clone(), conn.clone());
        conn.join(&[conn.id.clone()]).await;
        namespace.service.connected(&conn_ref);
        Ok((conn, rx))
    }

    /// Live connections of `path`.
    pub fn connection_count(&self, path: &str) -> usize {
        self.namespaces
            .get(&normalize_path(path))
            .map(|ns| ns.connections.len())
            .unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    fn serve(&self, path: &str, service: Arc<NamespaceService>) {
        let path = normalize_path(path);
        debug!("Serving namespace '{}'", path);
        let namespace = Arc::new(MemoryNamespace {
            service,
            connections: DashMap::new(),
            rooms: RoomIndex::default(),
        });
        if let Some(previous) = self.namespaces.insert(path, namespace) {
            previous.disconnect_all("namespace replaced");
        }
    }

    fn remove(&self, path: &str) -> Option<usize> {
        let (path, namespace) = self.namespaces.remove(&normalize_path(path))?;
        let disconnected = namespace.disconnect_all("server namespace disconnect");
        info!("Removed namespace '{}', {} client(s) disconnected", path, disconnected);
        Some(disconnected)
    }

    fn has(&self, path: &str) -> bool {
        self.namespaces.contains_key(&normalize_path(path))
    }

    fn namespaces(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    fn connection(&self, path: &str, id: &str) -> Option<ConnectionRef> {
        let namespace = self.namespaces.get(&normalize_path(path))?;
        let conn = namespace.connections.get(id)?.value().clone();
        Some(conn)
    }

    fn room_members(&self, path: &str, room: &str) -> Vec<ConnectionId> {
        self.namespaces
            .get(&normalize_path(path))
            .map(|ns| ns.rooms.members(room).into_iter().collect())
            .unwrap_or_default()
    }

    /// Chained rooms are a union. Volatile emissions skip clients that are
    /// not writable.
    fn broadcast(&self, options: &BroadcastOptions, event: &str, args: Vec<Value>) -> usize {
        let Some(namespace) = self
            .namespaces
            .get(&normalize_path(&options.namespace))
            .map(|ns| ns.value().clone())
        else {
            return 0;
        };

        let targets: Vec<Arc<MemoryConnection>> = if options.rooms.is_empty() {
            namespace.connections.iter().map(|c| c.value().clone()).collect()
        } else {
            namespace
                .rooms
                .union(&options.rooms)
                .iter()
                .filter_map(|id| namespace.connections.get(id).map(|c| c.value().clone()))
                .collect()
        };

        targets
            .iter()
            .filter(|conn| !options.volatile || conn.is_writable())
            .filter(|conn| conn.emit(event, args.clone()))
            .count()
    }
}

/// One in-process client.
pub struct MemoryConnection {
    id: ConnectionId,
    namespace: String,
    handshake: Handshake,
    session: Session,
    writable: AtomicBool,
    frames: mpsc::UnboundedSender<Frame>,
    owner: Weak<MemoryNamespace>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("rooms", &self.session.rooms())
            .field("connected", &self.session.is_open())
            .finish()
    }
}

impl MemoryConnection {
    /// Mark the client as (not) ready for new frames.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire) && !self.frames.is_closed()
    }

    /// Emit `event` from the client with an acknowledgement callback and
    /// wait for the handler to finish. `None` when nothing answered.
    pub async fn receive(self: &Arc<Self>, event: &str, args: Vec<Value>) -> Option<AckResponse> {
        let service = self.owner.upgrade()?.service.clone();
        let (tx, rx) = oneshot::channel();
        let ack = Ack::new(MemoryAck {
            tx,
            conn: Arc::downgrade(self),
        });
        service.deliver(self.clone(), Packet::new(event, args), Some(ack)).await;
        rx.await.ok()
    }

    fn close(&self, reason: &str) {
        let owner = self.owner.upgrade();
        let closed = self.session.close(|room| {
            if let Some(ns) = &owner {
                ns.rooms.remove(room, &self.id);
            }
        });
        if !closed {
            return;
        }
        if let Some(ns) = &owner {
            ns.connections.remove(&self.id);
        }
        let _ = self.frames.send(Frame::Disconnect {
            reason: reason.to_string(),
        });
        debug!(socket_id = %self.id, namespace = %self.namespace, "Client disconnected: {}", reason);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    fn rooms(&self) -> Vec<String> {
        self.session.rooms()
    }

    async fn join(&self, rooms: &[String]) {
        let owner = self.owner.upgrade();
        self.session.join(rooms, |room| {
            if let Some(ns) = &owner {
                ns.rooms.add(room, &self.id);
            }
        });
    }

    async fn leave(&self, room: &str) {
        let owner = self.owner.upgrade();
        self.session.leave(room, |room| {
            if let Some(ns) = &owner {
                ns.rooms.remove(room, &self.id);
            }
        });
    }

    fn user(&self) -> Option<Value> {
        self.session.user()
    }

    fn set_user(&self, user: Option<Value>) {
        self.session.set_user(user);
    }

    fn emit(&self, event: &str, args: Vec<Value>) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.frames
            .send(Frame::Event {
                event: event.to_string(),
                args,
            })
            .is_ok()
    }

    fn disconnect(&self) {
        self.close("server namespace disconnect");
    }
}

/// Answers are dropped once the connection is closed.
struct MemoryAck {
    tx: oneshot::Sender<AckResponse>,
    conn: Weak<MemoryConnection>,
}

impl AckResponder for MemoryAck {
    fn respond(self: Box<Self>, response: AckResponse) -> bool {
        let live = self.conn.upgrade().is_some_and(|conn| conn.is_connected());
        live && self.tx.send(response).is_ok()
    }
}
