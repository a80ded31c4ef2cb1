//! The RPC side of the gateway.
//!
//! The gateway never talks to a service mesh directly; it is handed a
//! [`ServiceBroker`] and only ever needs two things from it: invoke an action
//! by name, and tell whether an action may be reached from the outside.

mod local;

pub use local::{action_fn, async_action_fn, ActionContext, ActionHandler, LocalBroker};

use crate::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// An action's own declaration of who may call it.
///
/// Only `published` actions (or actions that declare nothing) are reachable
/// through a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Published,
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn allows_external(visibility: Option<Visibility>) -> bool {
        matches!(visibility, None | Some(Visibility::Published))
    }
}

/// Where an action lives and how it is exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEndpoint {
    pub action: String,
    pub visibility: Option<Visibility>,
    pub node_id: String,
}

/// Options attached to a call. Serialises flat: `{ "meta": {...}, "timeout": 500 }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl CallOptions {
    pub fn with_meta(meta: Map<String, Value>) -> Self {
        Self {
            meta,
            options: Map::new(),
        }
    }

    /// Shallow-merge fixed options over these. A `meta` key in `fixed` is
    /// ignored; the extracted metadata always wins.
    pub fn merge(mut self, fixed: &Map<String, Value>) -> Self {
        for (key, value) in fixed {
            if key == "meta" {
                continue;
            }
            self.options.insert(key.clone(), value.clone());
        }
        self
    }

    /// `timeout` option, in milliseconds. Zero means no timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.options
            .get("timeout")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }
}

/// Result of a call: the returned data plus the (possibly mutated) meta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResponse {
    pub data: Value,
    pub meta: Map<String, Value>,
}

impl CallResponse {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            meta: Map::new(),
        }
    }
}

/// The RPC transport capability.
#[async_trait]
pub trait ServiceBroker: Send + Sync {
    /// Invoke `action`. Errors are returned as raised by the action.
    async fn call(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<CallResponse, ServiceError>;

    /// Locate `action`, failing with a not-found error when nothing serves it.
    async fn find_endpoint(&self, action: &str) -> Result<ActionEndpoint, ServiceError>;
}
