//! Error types for the gateway.
//!
//! Two families live here:
//!
//! * [`ServiceError`] - the per-call error value. It is what the RPC transport
//!   returns, what hooks and middlewares fail with, and what is reduced to an
//!   [`ErrorPayload`] before it is written to a socket acknowledgement.
//! * [`GatewayError`] - fatal configuration and lifecycle failures that must
//!   never be recovered silently (missing transport, namespace collisions, ...).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Default `type` of [`ServiceError::bad_request`].
pub const ERR_INVALID_FORMAT: &str = "ERR_INVALID_FORMAT";
/// Default `type` of [`ServiceError::unauthorized`].
pub const ERR_INVALID_TOKEN: &str = "ERR_INVALID_TOKEN";
/// `type` of [`ServiceError::service_not_found`].
pub const SERVICE_NOT_FOUND: &str = "SERVICE_NOT_FOUND";

/// An error raised while serving a single call or connection.
///
/// Carries the classification fields that cross the socket boundary
/// (`name`, `message`, `code`, `type`, `data`) plus server-only fields that
/// never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct ServiceError {
    /// Symbolic kind, e.g. `ServiceNotFoundError`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Numeric status code (HTTP-like).
    pub code: u16,
    /// Optional machine-readable sub-type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Whether the caller may retry. Server-side only.
    #[serde(skip)]
    pub retryable: bool,
    /// Diagnostic trace. Server-side only.
    #[serde(skip)]
    pub stack: Option<String>,
}

impl ServiceError {
    pub fn new(name: impl Into<String>, message: impl Into<String>, code: u16) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            code,
            kind: None,
            data: None,
            retryable: false,
            stack: None,
        }
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Malformed invocation shape (e.g. a non-string action name).
    pub fn bad_request() -> Self {
        Self::new("BadRequestError", "Bad Request", 400).with_type(ERR_INVALID_FORMAT)
    }

    /// The single "not found" category shared by unknown, non-public,
    /// whitelist-filtered and restrict-unmapped actions.
    pub fn service_not_found(action: &str) -> Self {
        Self::new(
            "ServiceNotFoundError",
            format!("Service '{action}' is not found."),
            404,
        )
        .with_type(SERVICE_NOT_FOUND)
        .with_data(json!({ "action": action }))
        .retryable(true)
    }

    /// Connection-level refusal raised by an authorization gate.
    pub fn unauthorized(kind: Option<&str>, data: Option<Value>) -> Self {
        let mut err = Self::new("UnAuthorizedError", "Unauthorized", 401)
            .with_type(kind.unwrap_or(ERR_INVALID_TOKEN));
        err.data = data;
        err
    }

    /// Parameter validation failure reported by a downstream action.
    pub fn validation(message: impl Into<String>, data: Value) -> Self {
        Self::new("ValidationError", message, 422)
            .with_type("VALIDATION_ERROR")
            .with_data(data)
    }

    /// The call did not complete within its `timeout` option.
    pub fn request_timeout(action: &str, node_id: &str) -> Self {
        Self::new(
            "RequestTimeoutError",
            format!("Request is timed out when call '{action}' action on '{node_id}' node."),
            504,
        )
        .with_type("REQUEST_TIMEOUT")
        .with_data(json!({ "action": action, "nodeID": node_id }))
        .retryable(true)
    }

    /// A business error caused by the caller (4xx).
    pub fn client(message: impl Into<String>, code: u16, kind: impl Into<String>, data: Value) -> Self {
        Self::new("MoleculerClientError", message, code)
            .with_type(kind)
            .with_data(data)
    }

    /// True for 4xx codes, which are only logged when explicitly requested.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_not_found(&self) -> bool {
        self.name == "ServiceNotFoundError"
    }

    /// Reduce to the object that is allowed to cross the socket boundary.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::from(self)
    }
}

/// The reduced error object delivered through an acknowledgement callback.
///
/// Only `name`, `message`, `code`, `type` and `data` survive the reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
    pub code: u16,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ServiceError> for ErrorPayload {
    fn from(err: &ServiceError) -> Self {
        Self {
            name: err.name.clone(),
            message: err.message.clone(),
            code: err.code,
            kind: err.kind.clone(),
            data: err.data.clone(),
        }
    }
}

impl From<ServiceError> for ErrorPayload {
    fn from(err: ServiceError) -> Self {
        Self {
            name: err.name,
            message: err.message,
            code: err.code,
            kind: err.kind,
            data: err.data,
        }
    }
}

/// Fatal gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// `start()` was called without a socket transport attached.
    #[error("socket transport is not attached")]
    TransportMissing,
    /// No RPC broker was supplied to the builder.
    #[error("service broker is not configured")]
    BrokerMissing,
    /// The namespace path is already active.
    #[error("namespace '{0}' is already registered")]
    NamespaceExists(String),
    /// The namespace path was never registered (or was already removed).
    #[error("namespace '{0}' is not registered")]
    NamespaceNotFound(String),
    /// A dynamic namespace referenced a handler set that does not exist.
    #[error("handler set '{0}' is not configured")]
    UnknownHandlerSet(String),
    /// A whitelist regex failed to compile.
    #[error("invalid whitelist pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl GatewayError {
    /// Convert to a [`ServiceError`] for the administrative action surface.
    pub fn to_service_error(&self) -> ServiceError {
        let (name, code) = match self {
            GatewayError::NamespaceExists(_) => ("NamespaceExistsError", 409),
            GatewayError::NamespaceNotFound(_) => ("NamespaceNotFoundError", 404),
            GatewayError::UnknownHandlerSet(_) => ("HandlerSetNotFoundError", 404),
            _ => ("GatewayError", 500),
        };
        ServiceError::new(name, self.to_string(), code)
    }
}
