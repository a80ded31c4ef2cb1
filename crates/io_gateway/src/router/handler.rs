use crate::config::LogLevel;
use crate::dispatch::{CallDescriptor, Dispatcher};
use crate::transport::{Ack, ConnectionRef, EventHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Per-call logging knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Level at which request params are logged; `None` = never.
    pub request_params: Option<LogLevel>,
    /// Log 4xx failures too, not only server-side ones.
    pub log_4xx: bool,
}

/// The handler generated for a structured event.
///
/// Expects `[action, params?]` and answers the acknowledgement with either
/// the call result or the reduced error.
pub(crate) struct GeneratedHandler {
    dispatcher: Dispatcher,
    descriptor: Arc<CallDescriptor>,
    log: LogOptions,
}

impl GeneratedHandler {
    pub(crate) fn new(dispatcher: Dispatcher, descriptor: CallDescriptor, log: LogOptions) -> Self {
        Self {
            dispatcher,
            descriptor: Arc::new(descriptor),
            log,
        }
    }
}

#[async_trait]
impl EventHandler for GeneratedHandler {
    async fn handle(&self, socket: ConnectionRef, args: Vec<Value>, ack: Option<Ack>) {
        let mut args = args.into_iter();
        let action = args.next().unwrap_or(Value::Null);
        let params = args.next().unwrap_or(Value::Null);

        let name = match &action {
            Value::String(name) => name.clone(),
            other => other.to_string(),
        };
        info!(socket_id = %socket.id(), "=> Client '{}' call '{}'", socket.id(), name);
        if let Some(level) = self.log.request_params {
            log_params(level, &name, &params);
        }

        match self
            .dispatcher
            .dispatch(&socket, &action, params, &self.descriptor)
            .await
        {
            Ok(result) => {
                info!(socket_id = %socket.id(), "<= Success '{}'", name);
                if let Some(ack) = ack {
                    ack.send_ok(result);
                }
            }
            Err(err) => {
                if self.log.log_4xx || !err.is_client_error() {
                    error!(
                        socket_id = %socket.id(),
                        action = %name,
                        code = err.code,
                        data = ?err.data,
                        "   Request error! {}",
                        err
                    );
                } else {
                    debug!(socket_id = %socket.id(), action = %name, "Client error: {}", err);
                }
                if let Some(ack) = ack {
                    ack.send_error(&err);
                }
            }
        }
    }
}

fn log_params(level: LogLevel, action: &str, params: &Value) {
    match level {
        LogLevel::Trace => trace!(action = %action, "   Params: {}", params),
        LogLevel::Debug => debug!(action = %action, "   Params: {}", params),
        LogLevel::Info => info!(action = %action, "   Params: {}", params),
        LogLevel::Warn => warn!(action = %action, "   Params: {}", params),
        LogLevel::Error => error!(action = %action, "   Params: {}", params),
    }
}
