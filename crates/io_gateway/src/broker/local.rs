use super::{ActionEndpoint, CallOptions, CallResponse, ServiceBroker, Visibility};
use crate::error::ServiceError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// What an action handler sees of one call.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub action: String,
    pub params: Value,
    /// Call meta. Mutations are returned to the caller as response meta.
    pub meta: Map<String, Value>,
    pub options: Map<String, Value>,
}

impl ActionContext {
    /// Finish the call with `data`, handing back the current meta.
    pub fn reply(self, data: Value) -> CallResponse {
        CallResponse {
            data,
            meta: self.meta,
        }
    }

    /// Typed access to a top-level parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: ActionContext) -> Result<CallResponse, ServiceError>;
}

struct SyncAction<F>(F);

#[async_trait]
impl<F> ActionHandler for SyncAction<F>
where
    F: Fn(&mut ActionContext) -> Result<Value, ServiceError> + Send + Sync,
{
    async fn handle(&self, mut ctx: ActionContext) -> Result<CallResponse, ServiceError> {
        let data = (self.0)(&mut ctx)?;
        Ok(ctx.reply(data))
    }
}

/// Wrap a synchronous closure as an action.
pub fn action_fn<F>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(&mut ActionContext) -> Result<Value, ServiceError> + Send + Sync + 'static,
{
    Arc::new(SyncAction(f))
}

struct AsyncAction<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for AsyncAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CallResponse, ServiceError>> + Send + 'static,
{
    async fn handle(&self, ctx: ActionContext) -> Result<CallResponse, ServiceError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as an action. Finish with [`ActionContext::reply`].
pub fn async_action_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallResponse, ServiceError>> + Send + 'static,
{
    Arc::new(AsyncAction(f))
}

struct RegisteredAction {
    visibility: Option<Visibility>,
    handler: Arc<dyn ActionHandler>,
}

/// In-process broker: actions registered by name and served on the caller's
/// task.
pub struct LocalBroker {
    node_id: String,
    actions: DashMap<String, RegisteredAction>,
}

impl std::fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBroker")
            .field("node_id", &self.node_id)
            .field("actions", &self.action_names())
            .finish()
    }
}

impl LocalBroker {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            actions: DashMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register (or replace) an action.
    pub fn add_action(
        &self,
        name: impl Into<String>,
        visibility: Option<Visibility>,
        handler: Arc<dyn ActionHandler>,
    ) {
        let name = name.into();
        debug!(node_id = %self.node_id, "Registering action '{}'", name);
        self.actions.insert(
            name,
            RegisteredAction {
                visibility,
                handler,
            },
        );
    }

    pub fn remove_action(&self, name: &str) -> bool {
        self.actions.remove(name).is_some()
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ServiceBroker for LocalBroker {
    async fn call(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<CallResponse, ServiceError> {
        let handler = self
            .actions
            .get(action)
            .map(|entry| entry.handler.clone())
            .ok_or_else(|| ServiceError::service_not_found(action))?;

        let timeout = options.timeout();
        let ctx = ActionContext {
            action: action.to_string(),
            params,
            meta: options.meta,
            options: options.options,
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, handler.handle(ctx))
                .await
                .map_err(|_| ServiceError::request_timeout(action, &self.node_id))?,
            None => handler.handle(ctx).await,
        }
    }

    async fn find_endpoint(&self, action: &str) -> Result<ActionEndpoint, ServiceError> {
        self.actions
            .get(action)
            .map(|entry| ActionEndpoint {
                action: action.to_string(),
                visibility: entry.visibility,
                node_id: self.node_id.clone(),
            })
            .ok_or_else(|| ServiceError::service_not_found(action))
    }
}
