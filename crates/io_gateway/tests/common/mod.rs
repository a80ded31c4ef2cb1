#![allow(dead_code)]

use io_gateway::broker::{action_fn, async_action_fn, ActionContext};
use io_gateway::dispatch::{after_call_fn, before_call_fn};
use io_gateway::error::ErrorPayload;
use io_gateway::transport::memory::{Frame, MemoryConnection, MemoryTransport};
use io_gateway::transport::{
    connect_middleware_fn, event_handler_fn, packet_middleware_fn, AckResponse,
};
use io_gateway::{
    admin, authorizer_fn, CallDescriptor, Connection, ConnectionRef, Gateway, GatewaySettings,
    Handshake, LocalBroker, MappingPolicy, NamespaceConfig, ServiceError, Visibility,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const TOKEN: &str = "12345";

/// Ordered record of everything the pipeline touched.
#[derive(Clone, Default)]
pub struct Flow(Arc<Mutex<Vec<String>>>);

impl Flow {
    pub fn push(&self, step: impl Into<String>) {
        self.0.lock().push(step.into());
    }

    /// Drain the recorded steps.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// A fake client: a connection plus the frames the server wrote to it.
pub struct TestClient {
    pub conn: Arc<MemoryConnection>,
    /// The same connection as the gateway sees it.
    pub socket: ConnectionRef,
    frames: UnboundedReceiver<Frame>,
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient").finish_non_exhaustive()
    }
}

impl TestClient {
    pub async fn connect(io: &MemoryTransport, path: &str) -> Result<Self, ServiceError> {
        Self::connect_with(io, path, Handshake::default()).await
    }

    pub async fn connect_with(io: &MemoryTransport, path: &str, handshake: Handshake) -> Result<Self, ServiceError> {
        let (conn, frames) = io.connect(path, handshake).await?;
        let socket: ConnectionRef = conn.clone();
        Ok(Self { conn, socket, frames })
    }

    pub fn id(&self) -> String {
        self.conn.id().to_string()
    }

    /// Emit an event expecting an acknowledgement.
    pub async fn emit_with_ack(&self, event: &str, args: Vec<Value>) -> Option<AckResponse> {
        self.conn.receive(event, args).await
    }

    /// `call` with `(action, params)`.
    pub async fn call(&self, action: impl Into<Value>, params: Value) -> Result<Value, ErrorPayload> {
        self.emit_with_ack("call", vec![action.into(), params])
            .await
            .expect("call was not acknowledged")
            .into_result()
    }

    /// Next `(event, args)` emitted to this client, if any is queued.
    pub fn try_next_event(&mut self) -> Option<(String, Vec<Value>)> {
        while let Ok(frame) = self.frames.try_recv() {
            if let Frame::Event { event, args } = frame {
                return Some((event, args));
            }
        }
        None
    }

    pub fn was_disconnected(&mut self) -> bool {
        while let Ok(frame) = self.frames.try_recv() {
            if matches!(frame, Frame::Disconnect { .. }) {
                return true;
            }
        }
        false
    }
}

fn int_param(ctx: &ActionContext, key: &str) -> i64 {
    ctx.param(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Services the tests call into.
pub fn broker(flow: &Flow) -> Arc<LocalBroker> {
    let broker = Arc::new(LocalBroker::new("node-test"));

    let add_flow = flow.clone();
    broker.add_action(
        "math.add",
        None,
        action_fn(move |ctx| {
            add_flow.push("action: math.add");
            Ok(json!(int_param(ctx, "a") + int_param(ctx, "b")))
        }),
    );
    broker.add_action(
        "math.div",
        None,
        action_fn(|ctx| {
            let b = int_param(ctx, "b");
            if b == 0 {
                return Err(ServiceError::client("Divide by zero", 400, "DIV_ZERO", ctx.params.clone()));
            }
            Ok(json!(int_param(ctx, "a") / b))
        }),
    );
    broker.add_action("math.secret", Some(Visibility::Protected), action_fn(|_| Ok(json!(42))));
    broker.add_action("greeter.hello", None, action_fn(|_| Ok(json!("Hello"))));

    broker.add_action(
        "rooms.join",
        None,
        action_fn(|ctx| {
            let room = ctx.param("room").cloned().unwrap_or(Value::Null);
            ctx.meta.insert("$join".into(), room);
            Ok(json!(true))
        }),
    );
    broker.add_action(
        "rooms.enter",
        None,
        action_fn(|ctx| {
            let room = ctx.param("room").cloned().unwrap_or(Value::Null);
            ctx.meta.insert("$join".into(), room);
            ctx.meta.insert("user".into(), json!({ "id": "member" }));
            Ok(json!(true))
        }),
    );
    broker.add_action(
        "rooms.leave",
        None,
        action_fn(|ctx| {
            let room = ctx.param("room").cloned().unwrap_or(Value::Null);
            ctx.meta.insert("$leave".into(), room);
            Ok(json!(true))
        }),
    );
    broker.add_action(
        "rooms.get",
        None,
        action_fn(|ctx| Ok(ctx.meta.get("$rooms").cloned().unwrap_or(Value::Null))),
    );

    broker.add_action(
        "users.login",
        None,
        action_fn(|ctx| {
            ctx.meta.insert("user".into(), json!({ "id": 1, "name": "John" }));
            Ok(json!("logged in"))
        }),
    );
    broker.add_action(
        "users.logout",
        None,
        action_fn(|ctx| {
            ctx.meta.insert("user".into(), Value::Null);
            Ok(json!("logged out"))
        }),
    );
    broker.add_action(
        "users.me",
        None,
        action_fn(|ctx| Ok(ctx.meta.get("user").cloned().unwrap_or(Value::Null))),
    );
    broker.add_action(
        "slow.login",
        None,
        async_action_fn(|mut ctx| async move {
            let delay = ctx.param("delay").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let user = ctx.param("user").cloned().unwrap_or(Value::Null);
            ctx.meta.insert("user".into(), user);
            ctx.meta.insert("$join".into(), json!("slow-room"));
            Ok(ctx.reply(json!("done")))
        }),
    );

    let secret_flow = flow.clone();
    broker.add_action(
        "top-secret.hello",
        None,
        action_fn(move |ctx| {
            secret_flow.push("action: top-secret.hello");
            Ok(json!({ "meta": Value::Object(ctx.meta.clone()), "options": Value::Object(ctx.options.clone()) }))
        }),
    );
    broker
}

fn hooked_call(flow: &Flow, descriptor: CallDescriptor) -> CallDescriptor {
    let before = flow.clone();
    let after = flow.clone();
    descriptor
        .before_call(before_call_fn(move |_, _| {
            before.push("before hook");
            Ok(())
        }))
        .after_call(after_call_fn(move |_, _, _| {
            after.push("after hook");
            Ok(None)
        }))
}

/// Namespaces used across the tests.
pub fn namespaces(flow: &Flow) -> Vec<(String, NamespaceConfig)> {
    let ns_flow = flow.clone();
    let packet_flow = flow.clone();
    let custom_flow = flow.clone();
    let root = NamespaceConfig::new()
        .middleware(connect_middleware_fn(move |_| {
            ns_flow.push("namespace middleware");
            Ok(())
        }))
        .packet_middleware(packet_middleware_fn(move |_, _| {
            packet_flow.push("packet middleware");
            Ok(())
        }))
        .call_event(
            "call",
            hooked_call(
                flow,
                CallDescriptor::new()
                    .whitelist_glob("math.*")
                    .and_then(|d| d.whitelist_glob("rooms.*"))
                    .and_then(|d| d.whitelist_glob("users.*"))
                    .and_then(|d| d.whitelist_glob("slow.*"))
                    .and_then(|d| d.whitelist_regex(r"^io\.\w+$"))
                    .expect("valid patterns")
                    .alias("div", "math.div"),
            ),
        )
        .raw_event(
            "custom",
            event_handler_fn(move |_socket, args, ack| {
                let flow = custom_flow.clone();
                async move {
                    let a = args.first().and_then(|p| p.get("a")).and_then(Value::as_i64).unwrap_or(0);
                    flow.push(format!("custom-{a}"));
                    if let Some(ack) = ack {
                        ack.send_ok(json!("custom-ok"));
                    }
                }
            }),
        );

    let admin_ns_flow = flow.clone();
    let admin_packet_flow = flow.clone();
    let admin = NamespaceConfig::new()
        .authorization(true)
        .middleware(connect_middleware_fn(move |_| {
            admin_ns_flow.push("admin namespace middleware");
            Ok(())
        }))
        .packet_middleware(packet_middleware_fn(move |_, _| {
            admin_packet_flow.push("admin packet middleware");
            Ok(())
        }))
        .call_event(
            "call",
            hooked_call(
                flow,
                CallDescriptor::new()
                    .whitelist_glob("top-secret.*")
                    .expect("valid pattern")
                    .call_option("timeout", json!(500)),
            ),
        );

    let restricted = NamespaceConfig::new().call_event(
        "call",
        CallDescriptor::new()
            .alias("add", "math.add")
            .mapping_policy(MappingPolicy::Restrict),
    );

    let dynamic = NamespaceConfig::new().create_namespace(false).call_event(
        "call",
        CallDescriptor::new().whitelist_glob("math.*").expect("valid pattern"),
    );

    vec![
        ("/".to_string(), root),
        ("/admin".to_string(), admin),
        ("/restricted".to_string(), restricted),
        ("dynamic".to_string(), dynamic),
    ]
}

pub struct Fixture {
    pub flow: Flow,
    pub broker: Arc<LocalBroker>,
    pub io: Arc<MemoryTransport>,
    pub gateway: Arc<Gateway>,
}

impl Fixture {
    pub async fn connect(&self, path: &str) -> TestClient {
        TestClient::connect(&self.io, path).await.expect("connection refused")
    }

    pub async fn connect_with_token(&self, path: &str, token: &str) -> Result<TestClient, ServiceError> {
        TestClient::connect_with(&self.io, path, Handshake::default().with_query("token", token)).await
    }

    /// Call an action the way the surrounding service would.
    pub async fn service_call(&self, action: &str, params: Value) -> Result<Value, ServiceError> {
        use io_gateway::{CallOptions, ServiceBroker};
        self.broker
            .call(action, params, CallOptions::default())
            .await
            .map(|res| res.data)
    }
}

/// A started gateway with administrative actions installed.
pub fn fixture() -> Fixture {
    let flow = Flow::default();
    let broker = broker(&flow);
    let io = MemoryTransport::new();

    let auth_flow = flow.clone();
    let mut builder = Gateway::builder()
        .settings(GatewaySettings::empty())
        .broker(broker.clone())
        .transport(io.clone())
        .authorizer(authorizer_fn(move |socket, _namespace| {
            let flow = auth_flow.clone();
            async move {
                flow.push("auth");
                match socket.handshake().query("token") {
                    Some(TOKEN) => Ok(Some(json!({ "id": 1, "name": "John" }))),
                    _ => Err(ServiceError::unauthorized(None, None)),
                }
            }
        }));
    for (key, config) in namespaces(&flow) {
        builder = builder.namespace(key, config);
    }

    let gateway = builder.build().expect("gateway builds");
    admin::install(&broker, &gateway);
    gateway.start().expect("gateway starts");
    flow.take();

    Fixture { flow, broker, io, gateway }
}
