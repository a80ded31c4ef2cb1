//! Socket transport capability set.
//!
//! The router and the dispatcher only see two traits: [`Transport`], the
//! namespace registry with its broadcast and room lookups, and
//! [`Connection`], one live client inside a namespace. What runs when a
//! client connects or emits is described once per namespace by a
//! [`NamespaceService`] and handed to the transport when the namespace is
//! served.
//!
//! Two transports ship with the crate:
//!
//! * [`socketio::SocketIoTransport`] - backed by `socketioxide`, mounted as a
//!   tower layer in an HTTP server
//! * [`memory::MemoryTransport`] - in-process clients driven directly by
//!   tests and embedders

mod ack;
pub mod memory;
mod service;
mod session;
pub mod socketio;

pub use ack::{Ack, AckResponder, AckResponse};
pub use service::NamespaceService;

use crate::broadcast::BroadcastOptions;
use crate::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Connection identifier. Every connection is implicitly a member of the
/// room carrying its own id.
pub type ConnectionId = String;

/// Shared handle to a live connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// Data presented by the client when connecting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Handshake {
    /// Query-string parameters of the connection URL.
    pub query: HashMap<String, String>,
    /// Request headers, lower-cased names.
    pub headers: HashMap<String, String>,
    /// Auth payload sent with the connect packet.
    pub auth: Value,
    /// Remote address, when the wire layer knows it.
    pub address: Option<SocketAddr>,
}

impl Handshake {
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// An inbound event packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub event: String,
    pub args: Vec<Value>,
}

impl Packet {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }
}

/// One live client inside a namespace.
///
/// Rooms are kept in join order, starting with the connection's own id
/// room. `join` and `leave` are idempotent and do nothing once the
/// connection is closed.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> &str;

    fn namespace(&self) -> &str;

    fn handshake(&self) -> &Handshake;

    fn is_connected(&self) -> bool;

    /// Snapshot of joined rooms in join order.
    fn rooms(&self) -> Vec<String>;

    fn in_room(&self, room: &str) -> bool {
        self.rooms().iter().any(|joined| joined == room)
    }

    async fn join(&self, rooms: &[String]);

    /// Leaving a room that was never joined is not an error.
    async fn leave(&self, room: &str);

    /// The identity attached to this connection (`None` = anonymous).
    fn user(&self) -> Option<Value>;

    fn set_user(&self, user: Option<Value>);

    /// Emit an event to this client. Returns `false` when nothing was sent.
    fn emit(&self, event: &str, args: Vec<Value>) -> bool;

    /// Close the connection from the server side.
    fn disconnect(&self);
}

/// The namespace registry a gateway is started against.
///
/// Paths are normalised with [`normalize_path`] by every method.
pub trait Transport: Send + Sync {
    /// Start accepting connections on `path`, replacing any previous service.
    fn serve(&self, path: &str, service: Arc<NamespaceService>);

    /// Stop serving `path` and disconnect its clients. Returns how many were
    /// connected, or `None` if the path was not served.
    fn remove(&self, path: &str) -> Option<usize>;

    fn has(&self, path: &str) -> bool;

    /// Served paths, sorted.
    fn namespaces(&self) -> Vec<String>;

    fn connection(&self, path: &str, id: &str) -> Option<ConnectionRef>;

    /// Ids of the connections of `path` in `room`, sorted.
    fn room_members(&self, path: &str, room: &str) -> Vec<ConnectionId>;

    /// Emit to the namespace named by `options`. Returns how many local
    /// connections the event was written to.
    fn broadcast(&self, options: &BroadcastOptions, event: &str, args: Vec<Value>) -> usize;

    /// Remove every namespace. Returns how many connections were closed.
    fn close(&self) -> usize {
        self.namespaces()
            .iter()
            .filter_map(|path| self.remove(path))
            .sum()
    }
}

/// Runs before a connection is admitted to a namespace. An error refuses
/// the connection and skips every later middleware.
#[async_trait]
pub trait ConnectMiddleware: Send + Sync {
    async fn on_connect(&self, conn: &ConnectionRef) -> Result<(), ServiceError>;
}

/// Runs before each inbound packet is handed to its event handler. An error
/// drops the packet and emits an `error` event to the client.
#[async_trait]
pub trait PacketMiddleware: Send + Sync {
    async fn on_packet(&self, conn: &ConnectionRef, packet: &Packet) -> Result<(), ServiceError>;
}

/// Handles one named event on a connection.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, conn: ConnectionRef, args: Vec<Value>, ack: Option<Ack>);
}

struct FnConnectMiddleware<F>(F);

#[async_trait]
impl<F> ConnectMiddleware for FnConnectMiddleware<F>
where
    F: Fn(&ConnectionRef) -> Result<(), ServiceError> + Send + Sync,
{
    async fn on_connect(&self, conn: &ConnectionRef) -> Result<(), ServiceError> {
        (self.0)(conn)
    }
}

/// Wrap a synchronous closure as a [`ConnectMiddleware`].
pub fn connect_middleware_fn<F>(f: F) -> Arc<dyn ConnectMiddleware>
where
    F: Fn(&ConnectionRef) -> Result<(), ServiceError> + Send + Sync + 'static,
{
    Arc::new(FnConnectMiddleware(f))
}

struct FnPacketMiddleware<F>(F);

#[async_trait]
impl<F> PacketMiddleware for FnPacketMiddleware<F>
where
    F: Fn(&ConnectionRef, &Packet) -> Result<(), ServiceError> + Send + Sync,
{
    async fn on_packet(&self, conn: &ConnectionRef, packet: &Packet) -> Result<(), ServiceError> {
        (self.0)(conn, packet)
    }
}

/// Wrap a synchronous closure as a [`PacketMiddleware`].
pub fn packet_middleware_fn<F>(f: F) -> Arc<dyn PacketMiddleware>
where
    F: Fn(&ConnectionRef, &Packet) -> Result<(), ServiceError> + Send + Sync + 'static,
{
    Arc::new(FnPacketMiddleware(f))
}

struct FnEventHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(ConnectionRef, Vec<Value>, Option<Ack>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, conn: ConnectionRef, args: Vec<Value>, ack: Option<Ack>) {
        (self.0)(conn, args, ack).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn event_handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(ConnectionRef, Vec<Value>, Option<Ack>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnEventHandler(f))
}

/// Normalise a namespace path so it always starts with `/`.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
