//! Turning one socket call into one broker call.

use crate::alias::{self, MappingPolicy};
use crate::broker::{CallOptions, ServiceBroker, Visibility};
use crate::config::CallSettings;
use crate::error::{GatewayError, ServiceError};
use crate::meta::{MetaEffects, SocketMeta, UserUpdate};
use crate::transport::ConnectionRef;
use crate::whitelist::{Pattern, Whitelist};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// State of one in-flight call, handed to the hooks.
#[derive(Debug, Clone)]
pub struct CallContext {
    namespace: String,
    action: String,
    pub params: Value,
    pub options: CallOptions,
}

impl CallContext {
    /// Fully-qualified action name, after alias resolution.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Runs right before the broker call. May rewrite params and options; an
/// error aborts the call.
#[async_trait]
pub trait BeforeCall: Send + Sync {
    async fn before_call(&self, ctx: &mut CallContext, socket: &ConnectionRef) -> Result<(), ServiceError>;
}

/// Runs right after a successful broker call. `Some` replaces the result.
#[async_trait]
pub trait AfterCall: Send + Sync {
    async fn after_call(
        &self,
        ctx: &CallContext,
        socket: &ConnectionRef,
        result: &Value,
    ) -> Result<Option<Value>, ServiceError>;
}

struct FnBeforeCall<F>(F);

#[async_trait]
impl<F> BeforeCall for FnBeforeCall<F>
where
    F: Fn(&mut CallContext, &ConnectionRef) -> Result<(), ServiceError> + Send + Sync,
{
    async fn before_call(&self, ctx: &mut CallContext, socket: &ConnectionRef) -> Result<(), ServiceError> {
        (self.0)(ctx, socket)
    }
}

pub fn before_call_fn<F>(f: F) -> Arc<dyn BeforeCall>
where
    F: Fn(&mut CallContext, &ConnectionRef) -> Result<(), ServiceError> + Send + Sync + 'static,
{
    Arc::new(FnBeforeCall(f))
}

struct FnAfterCall<F>(F);

#[async_trait]
impl<F> AfterCall for FnAfterCall<F>
where
    F: Fn(&CallContext, &ConnectionRef, &Value) -> Result<Option<Value>, ServiceError> + Send + Sync,
{
    async fn after_call(
        &self,
        ctx: &CallContext,
        socket: &ConnectionRef,
        result: &Value,
    ) -> Result<Option<Value>, ServiceError> {
        (self.0)(ctx, socket, result)
    }
}

pub fn after_call_fn<F>(f: F) -> Arc<dyn AfterCall>
where
    F: Fn(&CallContext, &ConnectionRef, &Value) -> Result<Option<Value>, ServiceError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnAfterCall(f))
}

/// How a structured event becomes a broker call.
#[derive(Clone, Default)]
pub struct CallDescriptor {
    pub whitelist: Whitelist,
    pub aliases: Option<HashMap<String, String>>,
    pub mapping_policy: MappingPolicy,
    pub call_options: Map<String, Value>,
    pub on_before_call: Option<Arc<dyn BeforeCall>>,
    pub on_after_call: Option<Arc<dyn AfterCall>>,
}

impl std::fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("whitelist", &self.whitelist)
            .field("aliases", &self.aliases)
            .field("mapping_policy", &self.mapping_policy)
            .field("call_options", &self.call_options)
            .field("on_before_call", &self.on_before_call.is_some())
            .field("on_after_call", &self.on_after_call.is_some())
            .finish()
    }
}

impl CallDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &CallSettings) -> Result<Self, GatewayError> {
        Ok(Self {
            whitelist: Whitelist::compile(&settings.whitelist)?,
            aliases: settings.aliases.clone(),
            mapping_policy: settings.mapping_policy,
            call_options: settings.call_options.clone(),
            on_before_call: None,
            on_after_call: None,
        })
    }

    pub fn whitelist_glob(mut self, glob: &str) -> Result<Self, GatewayError> {
        self.whitelist.push(Pattern::glob(glob)?);
        Ok(self)
    }

    pub fn whitelist_regex(mut self, regex: &str) -> Result<Self, GatewayError> {
        self.whitelist.push(Pattern::regex(regex)?);
        Ok(self)
    }

    pub fn alias(mut self, name: impl Into<String>, action: impl Into<String>) -> Self {
        self.aliases
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), action.into());
        self
    }

    pub fn mapping_policy(mut self, policy: MappingPolicy) -> Self {
        self.mapping_policy = policy;
        self
    }

    pub fn call_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.call_options.insert(key.into(), value);
        self
    }

    pub fn before_call(mut self, hook: Arc<dyn BeforeCall>) -> Self {
        self.on_before_call = Some(hook);
        self
    }

    pub fn after_call(mut self, hook: Arc<dyn AfterCall>) -> Self {
        self.on_after_call = Some(hook);
        self
    }
}

/// Executes the call pipeline against a broker.
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn ServiceBroker>,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn ServiceBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn ServiceBroker> {
        &self.broker
    }

    /// Run one call for `socket`.
    ///
    /// Validation, alias resolution, whitelist and visibility checks all
    /// happen before the before-hook; the user and room effects of the
    /// response meta are applied after the after-hook.
    pub async fn dispatch(
        &self,
        socket: &ConnectionRef,
        action: &Value,
        params: Value,
        descriptor: &CallDescriptor,
    ) -> Result<Value, ServiceError> {
        let requested = action.as_str().ok_or_else(ServiceError::bad_request)?;

        let action = alias::resolve(
            requested,
            descriptor.aliases.as_ref(),
            descriptor.mapping_policy,
        )
        .map_err(|_| {
            debug!(socket_id = %socket.id(), "'{}' is not mapped", requested);
            ServiceError::service_not_found(requested)
        })?;

        if !descriptor.whitelist.permits(action) {
            debug!(socket_id = %socket.id(), "'{}' is not whitelisted", action);
            return Err(ServiceError::service_not_found(action));
        }

        let options = CallOptions::with_meta(SocketMeta::extract(socket.as_ref()).into_map())
            .merge(&descriptor.call_options);

        match self.broker.find_endpoint(action).await {
            Ok(endpoint) if Visibility::allows_external(endpoint.visibility) => {}
            Ok(endpoint) => {
                debug!(socket_id = %socket.id(), "'{}' has visibility {:?}", action, endpoint.visibility);
                return Err(ServiceError::service_not_found(action));
            }
            Err(err) => {
                debug!(socket_id = %socket.id(), "'{}' has no endpoint: {}", action, err);
                return Err(ServiceError::service_not_found(action));
            }
        }

        let mut ctx = CallContext {
            namespace: socket.namespace().to_string(),
            action: action.to_string(),
            params,
            options,
        };

        if let Some(hook) = &descriptor.on_before_call {
            hook.before_call(&mut ctx, socket).await?;
        }

        let response = self
            .broker
            .call(&ctx.action, ctx.params.clone(), ctx.options.clone())
            .await?;
        let mut result = response.data;

        if let Some(hook) = &descriptor.on_after_call {
            if let Some(replacement) = hook.after_call(&ctx, socket, &result).await? {
                result = replacement;
            }
        }

        apply_effects(socket, MetaEffects::from_meta(&response.meta)).await;
        Ok(result)
    }
}

/// Persist the identity and room changes a response asked for.
pub async fn apply_effects(socket: &ConnectionRef, effects: MetaEffects) {
    if let UserUpdate::Set(user) = effects.user {
        socket.set_user(user);
    }
    if !effects.join.is_empty() {
        socket.join(&effects.join).await;
    }
    join_all(effects.leave.iter().map(|room| socket.leave(room))).await;
}
