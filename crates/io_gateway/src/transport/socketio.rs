//! `socketioxide` transport.
//!
//! Mount the layer from [`socketioxide::SocketIo::new_layer`] in the HTTP
//! server and hand the `SocketIo` half to [`SocketIoTransport::new`]. Each
//! served namespace registers a connect handler guarded by a middleware that
//! runs the [`NamespaceService`] admission chain; every bound event becomes a
//! `socket.on` handler feeding [`NamespaceService::deliver`].
//!
//! Room membership is mirrored per namespace so member lists and delivery
//! counts can be answered without a round trip through the adapter.
//! Top-level sequences are spread by `socketioxide` into positional
//! arguments, which is how multi-argument emits and `(err, result)` acks are
//! written. Volatile emission has no `socketioxide` counterpart; such
//! broadcasts are delivered normally.

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
use socketioxide::extract::{AckSender, SocketRef, TryData};
use socketioxide::handler::ConnectHandler;
use socketioxide::SocketIo;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// [`Transport`] over a `socketioxide` server.
pub struct SocketIoTransport {
    io: SocketIo,
    namespaces: DashMap<String, Arc<SioNamespace>>,
}

impl std::fmt::Debug for SocketIoTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoTransport")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

impl SocketIoTransport {
    pub fn new(io: SocketIo) -> Arc<Self> {
        Arc::new(Self {
            io,
            namespaces: DashMap::new(),
        })
    }

    pub fn io(&self) -> &SocketIo {
        &self.io
    }
}

struct SioNamespace {
    path: String,
    service: Arc<NamespaceService>,
    /// Admitted by the middleware, waiting for the connect handler.
    pending: DashMap<ConnectionId, Arc<SioConnection>>,
    connections: DashMap<ConnectionId, Arc<SioConnection>>,
    rooms: RoomIndex,
}

impl SioNamespace {
    async fn admit(self: &Arc<Self>, socket: SocketRef, auth: Value) -> Result<(), ServiceError> {
        let conn = Arc::new(SioConnection {
            id: socket.id.to_string(),
            namespace: self.path.clone(),
            handshake: handshake(&socket, auth),
            session: Session::new(),
            owner: Arc::downgrade(self),
            socket,
        });
        let conn_ref: ConnectionRef = conn.clone();
        self.service.admit(&conn_ref).await?;
        self.pending.insert(conn.id.clone(), conn);
        Ok(())
    }

    fn on_connect(self: &Arc<Self>, socket: SocketRef) {
        let id = socket.id.to_string();
        let Some((_, conn)) = self.pending.remove(&id) else {
            warn!(socket_id = %id, namespace = %self.path, "Connected without admission, closing");
            let _ = socket.disconnect();
            return;
        };

        self.connections.insert(id.clone(), conn.clone());
        conn.session.join(&[id], |room| {
            self.rooms.add(room, &conn.id);
            let _ = conn.socket.join(room.to_string());
        });

        for event in self.service.events() {
            let weak = Arc::downgrade(&conn);
            let service = self.service.clone();
            let name = event.to_string();
            socket.on(
                event.to_string(),
                move |TryData(data): TryData<Value>, ack: AckSender| {
                    let weak = weak.clone();
                    let service = service.clone();
                    let name = name.clone();
                    async move {
                        let Some(conn) = weak.upgrade() else {
                            return;
                        };
                        let args = match data {
                            Ok(Value::Array(args)) => args,
                            Ok(Value::Null) => Vec::new(),
                            Ok(value) => vec![value],
                            Err(err) => {
                                debug!(socket_id = %conn.id, "Undecodable '{}' payload: {}", name, err);
                                Vec::new()
                            }
                        };
                        let responder = Ack::new(SioAck {
                            ack,
                            conn: Arc::downgrade(&conn),
                        });
                        let conn_ref: ConnectionRef = conn;
                        service.deliver(conn_ref, Packet::new(name, args), Some(responder)).await;
                    }
                },
            );
        }

        let weak = Arc::downgrade(&conn);
        socket.on_disconnect(move |_: SocketRef| {
            if let Some(conn) = weak.upgrade() {
                conn.close();
            }
        });

        let conn_ref: ConnectionRef = conn;
        self.service.connected(&conn_ref);
    }

    fn disconnect_all(&self) -> usize {
        let connections: Vec<Arc<SioConnection>> =
            self.connections.iter().map(|c| c.value().clone()).collect();
        for conn in &connections {
            conn.disconnect();
        }
        self.pending.clear();
        connections.len()
    }
}

impl Transport for SocketIoTransport {
    fn serve(&self, path: &str, service: Arc<NamespaceService>) {
        let path = normalize_path(path);
        if self.namespaces.contains_key(&path) {
            self.remove(&path);
        }

        let namespace = Arc::new(SioNamespace {
            path: path.clone(),
            service,
            pending: DashMap::new(),
            connections: DashMap::new(),
            rooms: RoomIndex::default(),
        });

        let admission = namespace.clone();
        let middleware = move |socket: SocketRef, TryData(auth): TryData<Value>| {
            let namespace = admission.clone();
            async move { namespace.admit(socket, auth.unwrap_or(Value::Null)).await }
        };
        let connected = namespace.clone();
        let handler = move |socket: SocketRef| connected.on_connect(socket);

        self.io.ns(path.clone(), handler.with(middleware));
        self.namespaces.insert(path.clone(), namespace);
        debug!("Serving namespace '{}'", path);
    }

    fn remove(&self, path: &str) -> Option<usize> {
        let path = normalize_path(path);
        let (_, namespace) = self.namespaces.remove(&path)?;
        let disconnected = namespace.disconnect_all();
        self.io.delete_ns(path.as_str());
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

    fn broadcast(&self, options: &BroadcastOptions, event: &str, args: Vec<Value>) -> usize {
        let path = normalize_path(&options.namespace);
        let Some(namespace) = self.namespaces.get(&path).map(|ns| ns.value().clone()) else {
            return 0;
        };
        let Some(mut operator) = self.io.of(path.as_str()) else {
            return 0;
        };

        let recipients = if options.rooms.is_empty() {
            namespace.connections.len()
        } else {
            operator = operator.to(options.rooms.clone());
            namespace.rooms.union(&options.rooms).len()
        };
        if options.local {
            operator = operator.local();
        }

        match operator.emit(event.to_string(), &args) {
            Ok(_) => recipients,
            Err(err) => {
                warn!(namespace = %path, "Broadcast '{}' failed: {}", event, err);
                0
            }
        }
    }
}

/// One `socketioxide` socket inside a served namespace.
pub struct SioConnection {
    socket: SocketRef,
    id: ConnectionId,
    namespace: String,
    handshake: Handshake,
    session: Session,
    owner: Weak<SioNamespace>,
}

impl SioConnection {
    fn close(&self) {
        let owner = self.owner.upgrade();
        let closed = self.session.close(|room| {
            if let Some(ns) = &owner {
                ns.rooms.remove(room, &self.id);
            }
        });
        if closed {
            if let Some(ns) = &owner {
                ns.connections.remove(&self.id);
            }
            debug!(socket_id = %self.id, namespace = %self.namespace, "Client disconnected");
        }
    }
}

#[async_trait]
impl Connection for SioConnection {
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
        self.session.is_open() && self.socket.connected()
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
            let _ = self.socket.join(room.to_string());
        });
    }

    async fn leave(&self, room: &str) {
        let owner = self.owner.upgrade();
        self.session.leave(room, |room| {
            if let Some(ns) = &owner {
                ns.rooms.remove(room, &self.id);
            }
            let _ = self.socket.leave(room.to_string());
        });
    }

    fn user(&self) -> Option<Value> {
        self.session.user()
    }

    fn set_user(&self, user: Option<Value>) {
        self.session.set_user(user);
    }

    fn emit(&self, event: &str, args: Vec<Value>) -> bool {
        self.is_connected() && self.socket.emit(event.to_string(), &args).is_ok()
    }

    fn disconnect(&self) {
        self.close();
        let _ = self.socket.clone().disconnect();
    }
}

struct SioAck {
    ack: AckSender,
    conn: Weak<SioConnection>,
}

impl AckResponder for SioAck {
    fn respond(self: Box<Self>, response: AckResponse) -> bool {
        let live = self.conn.upgrade().is_some_and(|conn| conn.is_connected());
        if !live {
            return false;
        }
        let payload: Vec<Value> = match response.error {
            Some(err) => vec![serde_json::to_value(err).unwrap_or(Value::Null)],
            None => std::iter::once(Value::Null).chain(response.values).collect(),
        };
        self.ack.send(&payload).is_ok()
    }
}

fn handshake(socket: &SocketRef, auth: Value) -> Handshake {
    let parts = socket.req_parts();
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect();
    Handshake {
        query: parse_query(parts.uri.query().unwrap_or_default()),
        headers,
        auth,
        address: None,
    }
}

/// `a=1&b=2` into pairs. Keys without `=` map to an empty value; values are
/// taken verbatim.
fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
