use crate::error::ServiceError;
use crate::transport::{ConnectMiddleware, ConnectionRef};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Decides whether a connection may enter an authorized namespace.
///
/// `Ok(Some(user))` admits and attaches `user`, `Ok(None)` admits
/// anonymously, an error refuses the connection.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, socket: &ConnectionRef, namespace: &str) -> Result<Option<Value>, ServiceError>;
}

struct FnAuthorizer<F>(F);

#[async_trait]
impl<F, Fut> Authorizer for FnAuthorizer<F>
where
    F: Fn(ConnectionRef, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, ServiceError>> + Send + 'static,
{
    async fn authorize(&self, socket: &ConnectionRef, namespace: &str) -> Result<Option<Value>, ServiceError> {
        (self.0)(socket.clone(), namespace.to_string()).await
    }
}

pub fn authorizer_fn<F, Fut>(f: F) -> Arc<dyn Authorizer>
where
    F: Fn(ConnectionRef, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, ServiceError>> + Send + 'static,
{
    Arc::new(FnAuthorizer(f))
}

/// The authorization gate, installed ahead of every other connection
/// middleware of its namespace.
pub(crate) struct AuthorizeMiddleware {
    authorizer: Arc<dyn Authorizer>,
    namespace: String,
}

impl AuthorizeMiddleware {
    pub(crate) fn new(authorizer: Arc<dyn Authorizer>, namespace: String) -> Self {
        Self { authorizer, namespace }
    }
}

#[async_trait]
impl ConnectMiddleware for AuthorizeMiddleware {
    async fn on_connect(&self, socket: &ConnectionRef) -> Result<(), ServiceError> {
        match self.authorizer.authorize(socket, &self.namespace).await {
            Ok(user) => {
                if user.is_some() {
                    info!(socket_id = %socket.id(), namespace = %self.namespace, "Client authorized");
                }
                socket.set_user(user);
                Ok(())
            }
            Err(err) => {
                debug!(socket_id = %socket.id(), namespace = %self.namespace, "Authorization failed: {}", err);
                Err(err)
            }
        }
    }
}
