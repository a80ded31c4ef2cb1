//! # IO Gateway - Socket Events to Service Actions
//!
//! A routing and policy layer that exposes the actions of a service broker
//! over persistent socket connections. Clients emit a structured event
//! (usually `call`) naming an action; the gateway checks it against the
//! namespace's policy, invokes the action and answers the acknowledgement.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Namespace Router** ([`router`]) - compiles handler sets and attaches
//!   them to transport namespaces, statically or on demand
//! * **Call Dispatcher** ([`dispatch`]) - the per-call pipeline: validation,
//!   aliases, whitelist, visibility, hooks, user and room effects
//! * **Transport** ([`transport`]) - the namespace, room and connection
//!   capabilities the gateway needs, served by `socketioxide` in production
//!   and by an in-process double in tests
//! * **Broker** ([`broker`]) - the RPC capability, plus an in-process
//!   [`broker::LocalBroker`]
//!
//! ### Call Flow
//!
//! 1. Client emits `call` with `(action, params?, ack)`
//! 2. Packet middlewares of the socket run in order
//! 3. The generated handler resolves aliases and checks the whitelist
//! 4. The broker is asked whether the action is visible from outside
//! 5. Before-hook, broker call, after-hook
//! 6. `user`, `$join` and `$leave` of the response meta are applied
//! 7. The result (or the reduced error) is sent through the ack
//!
//! ```ignore
//! let broker = Arc::new(LocalBroker::new("node-1"));
//! let (layer, io) = socketioxide::SocketIo::new_layer();
//! let gateway = Gateway::builder()
//!     .broker(broker.clone())
//!     .transport(SocketIoTransport::new(io))
//!     .namespace("/", NamespaceConfig::new().call_event(
//!         "call",
//!         CallDescriptor::new().whitelist_glob("math.*")?,
//!     ))
//!     .build()?;
//! gateway.init_logging()?;
//! admin::install(&broker, &gateway);
//! gateway.start()?;
//! let app = axum::Router::new().layer(layer);
//! ```

pub mod admin;
pub mod alias;
pub mod broadcast;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod meta;
pub mod router;
pub mod transport;
pub mod whitelist;

pub use admin::GatewayAction;
pub use alias::MappingPolicy;
pub use broadcast::{BroadcastOptions, BroadcastRequest};
pub use broker::{CallOptions, CallResponse, LocalBroker, ServiceBroker, Visibility};
pub use config::{load_config, GatewaySettings};
pub use dispatch::{after_call_fn, before_call_fn, CallContext, CallDescriptor, Dispatcher};
pub use error::{ErrorPayload, GatewayError, ServiceError};
pub use gateway::{Gateway, GatewayBuilder, GatewayState};
pub use meta::SocketMeta;
pub use router::{authorizer_fn, Authorizer, EventDescriptor, HandlerSetInfo, NamespaceConfig};
pub use transport::socketio::SocketIoTransport;
pub use transport::{Connection, ConnectionRef, Handshake, Transport};
pub use whitelist::{Pattern, Whitelist, WhitelistEntry};
