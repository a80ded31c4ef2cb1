//! The gateway service.
//!
//! A [`Gateway`] is built once (handler sets compiled, patterns checked),
//! started against a [`Transport`], and stopped when the
//! surrounding service shuts down. All derived state lives in the gateway;
//! the settings it was built from are never touched again.

use crate::broadcast::{self, BroadcastOptions};
use crate::broker::ServiceBroker;
use crate::config::GatewaySettings;
use crate::dispatch::{CallDescriptor, Dispatcher};
use crate::error::{GatewayError, ServiceError};
use crate::logging::setup_logging;
use crate::meta::SocketMeta;
use crate::router::{Authorizer, HandlerSetInfo, LogOptions, NamespaceConfig, NamespaceRouter};
use crate::transport::{ConnectionId, ConnectionRef, Transport};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Created,
    Started,
    Stopped,
}

/// Builder for [`Gateway`].
#[derive(Default)]
pub struct GatewayBuilder {
    settings: Option<GatewaySettings>,
    broker: Option<Arc<dyn ServiceBroker>>,
    io: Option<Arc<dyn Transport>>,
    namespaces: BTreeMap<String, NamespaceConfig>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl GatewayBuilder {
    pub fn settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn ServiceBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn transport(mut self, io: Arc<dyn Transport>) -> Self {
        self.io = Some(io);
        self
    }

    /// Add or replace a handler set. Replaces any set of the same key coming
    /// from the settings.
    pub fn namespace(mut self, key: impl Into<String>, config: NamespaceConfig) -> Self {
        self.namespaces.insert(key.into(), config);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn build(self) -> Result<Arc<Gateway>, GatewayError> {
        let broker = self.broker.ok_or(GatewayError::BrokerMissing)?;
        let settings = self.settings.unwrap_or_default();

        let mut configs = settings
            .namespaces
            .iter()
            .map(|(key, ns)| NamespaceConfig::from_settings(ns).map(|config| (key.clone(), config)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        configs.extend(self.namespaces);
        if configs.is_empty() {
            configs.insert(
                "/".to_string(),
                NamespaceConfig::new().call_event("call", CallDescriptor::new()),
            );
        }

        let log = LogOptions {
            request_params: settings.log_request_params,
            log_4xx: settings.log_4xx_responses,
        };
        let dispatcher = Dispatcher::new(broker);
        let router = NamespaceRouter::build(&dispatcher, configs, self.authorizer, log);
        info!(service = %settings.service_name, "Gateway created: {:?}", router);

        Ok(Arc::new(Gateway {
            settings,
            dispatcher,
            router,
            io: self.io,
            state: RwLock::new(GatewayState::Created),
        }))
    }
}

/// Routes socket events to broker actions.
pub struct Gateway {
    settings: GatewaySettings,
    dispatcher: Dispatcher,
    router: NamespaceRouter,
    io: Option<Arc<dyn Transport>>,
    state: RwLock<GatewayState>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("service_name", &self.settings.service_name)
            .field("state", &self.state())
            .field("router", &self.router)
            .finish()
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn state(&self) -> GatewayState {
        *self.state.read()
    }

    pub fn io(&self) -> Option<&Arc<dyn Transport>> {
        self.io.as_ref()
    }

    pub fn router(&self) -> &NamespaceRouter {
        &self.router
    }

    fn transport(&self) -> Result<&dyn Transport, GatewayError> {
        self.io.as_deref().ok_or(GatewayError::TransportMissing)
    }

    /// Install the global tracing subscriber described by `settings.logging`.
    ///
    /// Returns `false` when the settings carry no logging section and the
    /// subscriber was left alone. Fails if a global subscriber is already set.
    pub fn init_logging(&self) -> anyhow::Result<bool> {
        match &self.settings.logging {
            Some(logging) => {
                setup_logging(logging)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Attach every start-up namespace to the transport. If one of them
    /// fails, none stays attached.
    pub fn start(&self) -> Result<(), GatewayError> {
        let io = self.transport()?;
        let mut state = self.state.write();
        if *state == GatewayState::Started {
            warn!("Gateway already started");
            return Ok(());
        }
        let attached = self.router.attach_configured(io)?;
        *state = GatewayState::Started;
        info!(service = %self.settings.service_name, "Gateway started, namespaces: {:?}", attached);
        Ok(())
    }

    /// Detach every active namespace, disconnecting its sockets.
    pub fn stop(&self) -> usize {
        let mut state = self.state.write();
        let disconnected = match &self.io {
            Some(io) => {
                let io = io.as_ref();
                let count = self
                    .router
                    .active_namespaces()
                    .iter()
                    .filter_map(|path| self.router.detach(io, path).ok())
                    .sum::<usize>()
                    + io.close();
                self.router.clear();
                count
            }
            None => 0,
        };
        *state = GatewayState::Stopped;
        info!(service = %self.settings.service_name, "Gateway stopped, {} socket(s) disconnected", disconnected);
        disconnected
    }

    /// Run the call pipeline for `socket` with `descriptor`.
    pub async fn call(
        &self,
        socket: &ConnectionRef,
        action: &Value,
        params: Value,
        descriptor: &CallDescriptor,
    ) -> Result<Value, ServiceError> {
        self.dispatcher
            .dispatch(socket, action, params, descriptor)
            .await
    }

    pub fn socket_get_meta(&self, socket: &ConnectionRef) -> SocketMeta {
        SocketMeta::extract(socket.as_ref())
    }

    /// Attach `user` to the socket; `None` logs it out.
    pub fn socket_save_user(&self, socket: &ConnectionRef, user: Option<Value>) {
        socket.set_user(user);
    }

    pub async fn socket_join_rooms(&self, socket: &ConnectionRef, rooms: &[String]) {
        socket.join(rooms).await;
    }

    pub async fn socket_leave_room(&self, socket: &ConnectionRef, room: &str) {
        socket.leave(room).await;
    }

    /// Serve `path` with a configured handler set.
    pub fn register_namespace(&self, path: &str, handler_set: &str) -> Result<(), GatewayError> {
        let io = self.transport()?;
        self.router.attach(io, path, handler_set)
    }

    /// Stop serving `path`. Returns how many sockets were disconnected.
    pub fn remove_namespace(&self, path: &str) -> Result<usize, GatewayError> {
        let io = self.transport()?;
        self.router.detach(io, path)
    }

    pub fn list_handler_sets(&self) -> Vec<HandlerSetInfo> {
        self.router.handler_sets()
    }

    pub fn broadcast(
        &self,
        event: &str,
        options: &BroadcastOptions,
        args: Vec<Value>,
    ) -> Result<usize, GatewayError> {
        let io = self.transport()?;
        Ok(broadcast::broadcast(io, event, options, args))
    }

    /// Ids of the sockets in `room` of `namespace`, sorted.
    pub fn get_clients(&self, namespace: &str, room: &str) -> Result<Vec<ConnectionId>, GatewayError> {
        let io = self.transport()?;
        Ok(io.room_members(namespace, room))
    }

    pub(crate) fn find_socket(&self, namespace: &str, id: &str) -> Option<ConnectionRef> {
        self.io.as_ref()?.connection(namespace, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::config::LoggingSettings;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::{Connection, Handshake};
    use serde_json::json;

    fn broker() -> Arc<dyn ServiceBroker> {
        Arc::new(LocalBroker::new("test"))
    }

    fn started(io: &Arc<MemoryTransport>) -> Arc<Gateway> {
        let gateway = Gateway::builder()
            .broker(broker())
            .transport(io.clone())
            .build()
            .unwrap();
        gateway.start().unwrap();
        gateway
    }

    #[test]
    fn start_without_transport_fails() {
        let gateway = Gateway::builder().broker(broker()).build().unwrap();
        assert!(matches!(gateway.start(), Err(GatewayError::TransportMissing)));
        assert_eq!(gateway.state(), GatewayState::Created);
    }

    #[test]
    fn build_without_broker_fails() {
        assert!(matches!(Gateway::builder().build(), Err(GatewayError::BrokerMissing)));
    }

    #[test]
    fn empty_settings_default_to_root_call() {
        let io = MemoryTransport::new();
        let gateway = Gateway::builder()
            .broker(broker())
            .settings(GatewaySettings::empty())
            .transport(io.clone())
            .build()
            .unwrap();
        gateway.start().unwrap();
        assert_eq!(io.namespaces(), vec!["/".to_string()]);
        assert_eq!(gateway.list_handler_sets()[0].events, vec!["call".to_string()]);
    }

    #[test]
    fn start_is_once_and_stop_detaches() {
        let io = MemoryTransport::new();
        let gateway = started(&io);
        gateway.start().unwrap();
        assert_eq!(gateway.router().active_namespaces(), vec!["/".to_string()]);

        gateway.stop();
        assert_eq!(gateway.state(), GatewayState::Stopped);
        assert!(gateway.router().active_namespaces().is_empty());
        assert!(io.namespaces().is_empty());
    }

    #[test]
    fn failed_start_leaves_nothing_attached() {
        let io = MemoryTransport::new();
        let gateway = Gateway::builder()
            .broker(broker())
            .settings(GatewaySettings::empty())
            .transport(io.clone())
            .namespace("/chat", NamespaceConfig::new())
            .namespace("chat", NamespaceConfig::new())
            .build()
            .unwrap();

        assert!(matches!(gateway.start(), Err(GatewayError::NamespaceExists(_))));
        assert_eq!(gateway.state(), GatewayState::Created);
        assert!(gateway.router().active_namespaces().is_empty());
        assert!(io.namespaces().is_empty());
    }

    #[test]
    fn logging_follows_settings() {
        let quiet = Gateway::builder()
            .broker(broker())
            .settings(GatewaySettings::empty())
            .build()
            .unwrap();
        assert!(!quiet.init_logging().unwrap());

        let settings = GatewaySettings {
            logging: Some(LoggingSettings::default()),
            ..GatewaySettings::empty()
        };
        let gateway = Gateway::builder().broker(broker()).settings(settings).build().unwrap();
        // Only the first install in this test binary can succeed.
        let _ = gateway.init_logging();
        assert!(gateway.init_logging().is_err());
    }

    #[tokio::test]
    async fn socket_helpers_update_connection() {
        let io = MemoryTransport::new();
        let gateway = started(&io);
        let (conn, _frames) = io.connect("/", Handshake::default()).await.unwrap();
        let socket: ConnectionRef = conn.clone();

        gateway.socket_save_user(&socket, Some(json!({ "id": 3 })));
        gateway
            .socket_join_rooms(&socket, &["lobby".to_string(), "team".to_string()])
            .await;
        gateway.socket_leave_room(&socket, "team").await;

        let meta = gateway.socket_get_meta(&socket);
        assert_eq!(meta.socket_id, conn.id());
        assert_eq!(meta.rooms, vec![conn.id().to_string(), "lobby".to_string()]);
        assert_eq!(meta.user, Some(json!({ "id": 3 })));
        assert_eq!(gateway.get_clients("/", "lobby").unwrap(), vec![conn.id().to_string()]);
        assert!(gateway.get_clients("/", "team").unwrap().is_empty());

        gateway.socket_save_user(&socket, None);
        assert_eq!(gateway.socket_get_meta(&socket).user, None);
        assert!(gateway.find_socket("/", conn.id()).is_some());
    }
}
