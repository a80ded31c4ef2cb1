//! Administrative actions the gateway exposes to its own service.
//!
//! Registered on a [`LocalBroker`] as `<service_name>.<action>`. `call` is
//! registered as private, so generated socket handlers can never reach it.

use crate::broadcast::BroadcastRequest;
use crate::broker::{ActionContext, ActionHandler, CallResponse, LocalBroker, Visibility};
use crate::dispatch::CallDescriptor;
use crate::error::ServiceError;
use crate::gateway::Gateway;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::info;

fn root_namespace() -> String {
    "/".to_string()
}

/// Invoke an action on behalf of a connected socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(default = "root_namespace")]
    pub namespace: String,
    pub socket_id: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetClientsRequest {
    #[serde(default = "root_namespace")]
    pub namespace: String,
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddNamespaceRequest {
    pub namespace: String,
    /// Name of the handler set to serve it with.
    pub handler: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveNamespaceRequest {
    pub namespace: String,
}

/// One administrative action with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayAction {
    Call(CallRequest),
    Broadcast(BroadcastRequest),
    GetClients(GetClientsRequest),
    AddNamespace(AddNamespaceRequest),
    RemoveNamespace(RemoveNamespaceRequest),
    ListIoHandlers,
}

impl GatewayAction {
    /// Action names, relative to the service.
    pub const NAMES: [&'static str; 6] = [
        "call",
        "broadcast",
        "getClients",
        "addNamespace",
        "removeNamespace",
        "listIOHandlers",
    ];

    pub fn parse(name: &str, params: Value) -> Result<Self, ServiceError> {
        let params = if params.is_null() { json!({}) } else { params };
        match name {
            "call" => parse_params(params).map(GatewayAction::Call),
            "broadcast" => parse_params(params).map(GatewayAction::Broadcast),
            "getClients" => parse_params(params).map(GatewayAction::GetClients),
            "addNamespace" => parse_params(params).map(GatewayAction::AddNamespace),
            "removeNamespace" => parse_params(params).map(GatewayAction::RemoveNamespace),
            "listIOHandlers" => Ok(GatewayAction::ListIoHandlers),
            other => Err(ServiceError::service_not_found(other)),
        }
    }

    pub fn visibility(name: &str) -> Option<Visibility> {
        (name == "call").then_some(Visibility::Private)
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ServiceError> {
    serde_json::from_value(params.clone())
        .map_err(|e| ServiceError::validation(format!("Parameters validation error: {e}"), params))
}

impl Gateway {
    /// Execute an administrative action.
    pub async fn handle_action(&self, action: GatewayAction) -> Result<Value, ServiceError> {
        match action {
            GatewayAction::Call(request) => {
                let socket = self
                    .find_socket(&request.namespace, &request.socket_id)
                    .ok_or_else(|| {
                        ServiceError::new(
                            "SocketNotFoundError",
                            format!("Socket '{}' is not connected.", request.socket_id),
                            404,
                        )
                        .with_data(json!({ "socketId": request.socket_id }))
                    })?;
                self.call(
                    &socket,
                    &Value::String(request.action),
                    request.params,
                    &CallDescriptor::new(),
                )
                .await
            }
            GatewayAction::Broadcast(request) => {
                self.broadcast(&request.event, &request.options, request.args)
                    .map_err(|e| e.to_service_error())?;
                Ok(Value::Null)
            }
            GatewayAction::GetClients(request) => self
                .get_clients(&request.namespace, &request.room)
                .map(|ids| json!(ids))
                .map_err(|e| e.to_service_error()),
            GatewayAction::AddNamespace(request) => {
                self.register_namespace(&request.namespace, &request.handler)
                    .map_err(|e| e.to_service_error())?;
                Ok(Value::Null)
            }
            GatewayAction::RemoveNamespace(request) => {
                let disconnected = self
                    .remove_namespace(&request.namespace)
                    .map_err(|e| e.to_service_error())?;
                Ok(json!({ "namespace": request.namespace, "disconnected": disconnected }))
            }
            GatewayAction::ListIoHandlers => serde_json::to_value(self.list_handler_sets())
                .map_err(|e| ServiceError::new("MoleculerError", e.to_string(), 500)),
        }
    }
}

struct AdminAction {
    name: &'static str,
    gateway: Weak<Gateway>,
}

#[async_trait]
impl ActionHandler for AdminAction {
    async fn handle(&self, ctx: ActionContext) -> Result<CallResponse, ServiceError> {
        let gateway = self.gateway.upgrade().ok_or_else(|| {
            ServiceError::new("ServiceNotAvailableError", "Gateway is stopped.", 503).retryable(true)
        })?;
        let action = GatewayAction::parse(self.name, ctx.params.clone())?;
        let data = gateway.handle_action(action).await?;
        Ok(ctx.reply(data))
    }
}

/// Register the administrative actions of `gateway` on `broker`.
pub fn install(broker: &LocalBroker, gateway: &Arc<Gateway>) {
    let service = &gateway.settings().service_name;
    for name in GatewayAction::NAMES {
        broker.add_action(
            format!("{service}.{name}"),
            GatewayAction::visibility(name),
            Arc::new(AdminAction {
                name,
                gateway: Arc::downgrade(gateway),
            }),
        );
    }
    info!(service = %service, "Administrative actions installed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions() {
        assert_eq!(
            GatewayAction::parse("getClients", json!({ "room": "lobby" })).unwrap(),
            GatewayAction::GetClients(GetClientsRequest {
                namespace: "/".into(),
                room: "lobby".into(),
            })
        );
        assert_eq!(
            GatewayAction::parse("listIOHandlers", Value::Null).unwrap(),
            GatewayAction::ListIoHandlers
        );
        match GatewayAction::parse("broadcast", json!({ "event": "msg", "rooms": ["r"], "local": true })).unwrap() {
            GatewayAction::Broadcast(request) => {
                assert_eq!(request.event, "msg");
                assert_eq!(request.options.rooms, vec!["r".to_string()]);
                assert!(request.options.local);
                assert_eq!(request.options.namespace, "/");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn missing_params_are_validation_errors() {
        let err = GatewayAction::parse("addNamespace", json!({ "namespace": "/x" })).unwrap_err();
        assert_eq!(err.name, "ValidationError");
        assert_eq!(err.code, 422);
    }

    #[test]
    fn only_call_is_private() {
        for name in GatewayAction::NAMES {
            let expected = if name == "call" { Some(Visibility::Private) } else { None };
            assert_eq!(GatewayAction::visibility(name), expected);
        }
    }
}
