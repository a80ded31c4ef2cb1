//! Acknowledgement callbacks.

use crate::error::{ErrorPayload, ServiceError};
use serde_json::Value;

/// What the server answered to an acknowledged packet: `respond(err, ...values)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AckResponse {
    pub error: Option<ErrorPayload>,
    pub values: Vec<Value>,
}

impl AckResponse {
    /// First result value, or the error.
    pub fn into_result(self) -> Result<Value, ErrorPayload> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.values.into_iter().next().unwrap_or(Value::Null)),
        }
    }
}

/// Writes one acknowledgement back to the client. Implemented by each
/// transport.
pub trait AckResponder: Send {
    /// Returns `false` when the response was discarded, for instance because
    /// the connection is gone.
    fn respond(self: Box<Self>, response: AckResponse) -> bool;
}

/// One-shot respond function handed to event handlers.
pub struct Ack(Box<dyn AckResponder>);

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Ack(..)")
    }
}

impl Ack {
    pub fn new(responder: impl AckResponder + 'static) -> Self {
        Self(Box::new(responder))
    }

    pub fn send(self, error: Option<ErrorPayload>, values: Vec<Value>) -> bool {
        self.0.respond(AckResponse { error, values })
    }

    pub fn send_ok(self, value: Value) -> bool {
        self.send(None, vec![value])
    }

    pub fn send_error(self, err: &ServiceError) -> bool {
        self.send(Some(err.to_payload()), Vec::new())
    }
}
