//! Namespace routing.
//!
//! Every configured [`NamespaceConfig`] is compiled once into a handler set
//! when the router is built. Handler sets are then attached to transport
//! namespaces, either at start-up (sets whose `create_namespace` is true,
//! keyed by their path) or later on request (dynamic namespaces).
//!
//! A namespace moves through `Unregistered -> Registering -> Active ->
//! Removed`. The router owns the table of active paths; attaching a path
//! twice or detaching an unknown path are errors.

mod auth;
mod config;
mod handler;

pub use auth::{authorizer_fn, Authorizer};
pub use config::{EventDescriptor, NamespaceConfig};
pub use handler::LogOptions;

use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::transport::{
    normalize_path, ConnectMiddleware, EventHandler, NamespaceService, PacketMiddleware, Transport,
};
use auth::AuthorizeMiddleware;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use handler::GeneratedHandler;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A compiled handler set. Read-only once built.
struct HandlerSet {
    authorization: bool,
    create_namespace: bool,
    middlewares: Vec<Arc<dyn ConnectMiddleware>>,
    packet_middlewares: Vec<Arc<dyn PacketMiddleware>>,
    handlers: BTreeMap<String, Arc<dyn EventHandler>>,
}

impl HandlerSet {
    fn compile(config: NamespaceConfig, dispatcher: &Dispatcher, log: LogOptions) -> Self {
        let handlers = config
            .events
            .into_iter()
            .map(|(event, descriptor)| {
                let handler: Arc<dyn EventHandler> = match descriptor {
                    EventDescriptor::Generated(descriptor) => {
                        Arc::new(GeneratedHandler::new(dispatcher.clone(), descriptor, log))
                    }
                    EventDescriptor::Raw(handler) => handler,
                };
                (event, handler)
            })
            .collect();
        Self {
            authorization: config.authorization,
            create_namespace: config.create_namespace,
            middlewares: config.middlewares,
            packet_middlewares: config.packet_middlewares,
            handlers,
        }
    }
}

/// Public description of a handler set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerSetInfo {
    pub name: String,
    pub events: Vec<String>,
    pub authorization: bool,
    #[serde(rename = "createNamespace")]
    pub create_namespace: bool,
    /// Paths currently served by this set.
    pub namespaces: Vec<String>,
}

/// Owns the compiled handler sets and the table of active namespaces.
pub struct NamespaceRouter {
    handler_sets: BTreeMap<String, Arc<HandlerSet>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    active: DashMap<String, String>,
}

impl std::fmt::Debug for NamespaceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceRouter")
            .field("handler_sets", &self.handler_sets.keys().collect::<Vec<_>>())
            .field("authorizer", &self.authorizer.is_some())
            .field("active", &self.active_namespaces())
            .finish()
    }
}

impl NamespaceRouter {
    pub fn build(
        dispatcher: &Dispatcher,
        configs: BTreeMap<String, NamespaceConfig>,
        authorizer: Option<Arc<dyn Authorizer>>,
        log: LogOptions,
    ) -> Self {
        let handler_sets = configs
            .into_iter()
            .map(|(name, config)| (name, Arc::new(HandlerSet::compile(config, dispatcher, log))))
            .collect();
        Self {
            handler_sets,
            authorizer,
            active: DashMap::new(),
        }
    }

    /// Attach every set marked `create_namespace`, using its key as path.
    ///
    /// All or nothing: on the first failure the paths attached so far are
    /// detached again before the error is returned.
    pub fn attach_configured(&self, io: &dyn Transport) -> Result<Vec<String>, GatewayError> {
        let mut attached: Vec<String> = Vec::new();
        for (name, set) in &self.handler_sets {
            if !set.create_namespace {
                continue;
            }
            let path = normalize_path(name);
            if let Err(err) = self.attach(io, &path, name) {
                for path in &attached {
                    let _ = self.detach(io, path);
                }
                warn!("Rolled back {} namespace(s) after attach failure", attached.len());
                return Err(err);
            }
            attached.push(path);
        }
        Ok(attached)
    }

    /// Serve `path` with the handler set `set_name`.
    ///
    /// The authorization gate (when required) goes first, then the set's
    /// connection middlewares in order. Packet middlewares and event
    /// handlers apply to every socket of the namespace.
    pub fn attach(&self, io: &dyn Transport, path: &str, set_name: &str) -> Result<(), GatewayError> {
        let set = self
            .handler_sets
            .get(set_name)
            .ok_or_else(|| GatewayError::UnknownHandlerSet(set_name.to_string()))?;
        let path = normalize_path(path);

        match self.active.entry(path.clone()) {
            Entry::Occupied(_) => return Err(GatewayError::NamespaceExists(path)),
            Entry::Vacant(slot) => {
                slot.insert(set_name.to_string());
            }
        }

        let mut middlewares: Vec<Arc<dyn ConnectMiddleware>> = Vec::new();
        if set.authorization {
            match &self.authorizer {
                Some(authorizer) => middlewares.push(Arc::new(AuthorizeMiddleware::new(
                    authorizer.clone(),
                    path.clone(),
                ))),
                None => warn!(
                    namespace = %path,
                    "Authorization is required but no authorizer is configured; authorization disabled"
                ),
            }
        }
        middlewares.extend(set.middlewares.iter().cloned());

        io.serve(
            &path,
            Arc::new(NamespaceService::new(
                path.clone(),
                middlewares,
                set.packet_middlewares.clone(),
                set.handlers.clone(),
            )),
        );

        info!(namespace = %path, "Namespace registered with handler set '{}'", set_name);
        Ok(())
    }

    /// Disconnect every socket of `path` and stop serving it. Returns the
    /// number of sockets disconnected.
    pub fn detach(&self, io: &dyn Transport, path: &str) -> Result<usize, GatewayError> {
        let path = normalize_path(path);
        if self.active.remove(&path).is_none() {
            return Err(GatewayError::NamespaceNotFound(path));
        }
        Ok(io.remove(&path).unwrap_or(0))
    }

    pub fn is_active(&self, path: &str) -> bool {
        self.active.contains_key(&normalize_path(path))
    }

    pub fn active_namespaces(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn handler_sets(&self) -> Vec<HandlerSetInfo> {
        self.handler_sets
            .iter()
            .map(|(name, set)| {
                let mut namespaces: Vec<String> = self
                    .active
                    .iter()
                    .filter(|e| e.value() == name)
                    .map(|e| e.key().clone())
                    .collect();
                namespaces.sort();
                HandlerSetInfo {
                    name: name.clone(),
                    events: set.handlers.keys().cloned().collect(),
                    authorization: set.authorization,
                    create_namespace: set.create_namespace,
                    namespaces,
                }
            })
            .collect()
    }

    /// Forget every active namespace (the transport is being closed).
    pub(crate) fn clear(&self) {
        self.active.clear();
    }
}
