use crate::config::NamespaceSettings;
use crate::dispatch::CallDescriptor;
use crate::error::GatewayError;
use crate::transport::{ConnectMiddleware, EventHandler, PacketMiddleware};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What an event name is bound to.
#[derive(Clone)]
pub enum EventDescriptor {
    /// Routed through the call pipeline.
    Generated(CallDescriptor),
    /// Bound to the socket untouched.
    Raw(Arc<dyn EventHandler>),
}

impl std::fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDescriptor::Generated(descriptor) => {
                f.debug_tuple("Generated").field(descriptor).finish()
            }
            EventDescriptor::Raw(_) => f.write_str("Raw(..)"),
        }
    }
}

/// One handler set: a namespace path (`/`, `/admin`) or a named set that
/// dynamic namespaces can reuse.
#[derive(Clone)]
pub struct NamespaceConfig {
    pub authorization: bool,
    /// When false the set is compiled but only attached on request.
    pub create_namespace: bool,
    pub middlewares: Vec<Arc<dyn ConnectMiddleware>>,
    pub packet_middlewares: Vec<Arc<dyn PacketMiddleware>>,
    pub events: BTreeMap<String, EventDescriptor>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            authorization: false,
            create_namespace: true,
            middlewares: Vec::new(),
            packet_middlewares: Vec::new(),
            events: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for NamespaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceConfig")
            .field("authorization", &self.authorization)
            .field("create_namespace", &self.create_namespace)
            .field("middlewares", &self.middlewares.len())
            .field("packet_middlewares", &self.packet_middlewares.len())
            .field("events", &self.events)
            .finish()
    }
}

impl NamespaceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from file settings. Hooks, middlewares and raw handlers can be
    /// attached afterwards.
    pub fn from_settings(settings: &NamespaceSettings) -> Result<Self, GatewayError> {
        let events = settings
            .events
            .iter()
            .map(|(event, call)| {
                CallDescriptor::from_settings(call)
                    .map(|descriptor| (event.clone(), EventDescriptor::Generated(descriptor)))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self {
            authorization: settings.authorization,
            create_namespace: settings.create_namespace,
            middlewares: Vec::new(),
            packet_middlewares: Vec::new(),
            events,
        })
    }

    pub fn authorization(mut self, required: bool) -> Self {
        self.authorization = required;
        self
    }

    pub fn create_namespace(mut self, create: bool) -> Self {
        self.create_namespace = create;
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn ConnectMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn packet_middleware(mut self, middleware: Arc<dyn PacketMiddleware>) -> Self {
        self.packet_middlewares.push(middleware);
        self
    }

    pub fn call_event(mut self, event: impl Into<String>, descriptor: CallDescriptor) -> Self {
        self.events
            .insert(event.into(), EventDescriptor::Generated(descriptor));
        self
    }

    pub fn raw_event(mut self, event: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.events.insert(event.into(), EventDescriptor::Raw(handler));
        self
    }

    /// Rework the generated descriptor bound to `event`. Raw or missing
    /// events are left alone.
    pub fn map_call<F>(mut self, event: &str, f: F) -> Self
    where
        F: FnOnce(CallDescriptor) -> CallDescriptor,
    {
        if let Some(EventDescriptor::Generated(descriptor)) = self.events.get_mut(event) {
            *descriptor = f(std::mem::take(descriptor));
        }
        self
    }
}
