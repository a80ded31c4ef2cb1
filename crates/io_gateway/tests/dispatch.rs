mod common;

use common::{broker, fixture, Flow, TestClient};
use io_gateway::dispatch::after_call_fn;
use io_gateway::transport::memory::MemoryTransport;
use io_gateway::transport::packet_middleware_fn;
use io_gateway::{
    CallDescriptor, Connection, Gateway, GatewaySettings, NamespaceConfig, ServiceError, Transport,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn gateway_with(io: &Arc<MemoryTransport>, config: NamespaceConfig) -> Arc<Gateway> {
    let gateway = Gateway::builder()
        .settings(GatewaySettings::empty())
        .broker(broker(&Flow::default()))
        .transport(io.clone())
        .namespace("/", config)
        .build()
        .unwrap();
    gateway.start().unwrap();
    gateway
}

#[tokio::test]
async fn call_runs_hooks_around_action() {
    let fx = fixture();
    let client = fx.connect("/").await;

    let res = client.call("math.add", json!({ "a": 1, "b": 2 })).await;
    assert_eq!(res, Ok(json!(3)));
    assert_eq!(
        fx.flow.take(),
        vec![
            "namespace middleware",
            "packet middleware",
            "before hook",
            "action: math.add",
            "after hook",
        ]
    );
}

#[tokio::test]
async fn numeric_action_is_bad_request() {
    let fx = fixture();
    let client = fx.connect("/").await;
    fx.flow.take();

    let err = client.call(123, json!({ "a": 1, "b": 2 })).await.unwrap_err();
    assert_eq!(err.name, "BadRequestError");
    assert_eq!(err.message, "Bad Request");
    assert_eq!(err.code, 400);
    assert_eq!(err.kind.as_deref(), Some("ERR_INVALID_FORMAT"));
    assert_eq!(fx.flow.take(), vec!["packet middleware"]);
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let fx = fixture();
    let client = fx.connect("/").await;

    let err = client.call("math.derive", Value::Null).await.unwrap_err();
    assert_eq!(err.name, "ServiceNotFoundError");
    assert_eq!(err.message, "Service 'math.derive' is not found.");
    assert_eq!(err.code, 404);
    assert_eq!(err.kind.as_deref(), Some("SERVICE_NOT_FOUND"));
    assert_eq!(err.data, Some(json!({ "action": "math.derive" })));
}

#[tokio::test]
async fn filtered_and_hidden_actions_look_missing() {
    let fx = fixture();
    let client = fx.connect("/").await;

    let missing = client.call("math.derive", Value::Null).await.unwrap_err();
    let filtered = client.call("greeter.hello", Value::Null).await.unwrap_err();
    let hidden = client.call("math.secret", Value::Null).await.unwrap_err();

    for err in [&missing, &filtered, &hidden] {
        assert_eq!(err.name, "ServiceNotFoundError");
        assert_eq!(err.code, 404);
    }
    assert_eq!(filtered.message, "Service 'greeter.hello' is not found.");
    assert_eq!(hidden.message, "Service 'math.secret' is not found.");
}

#[tokio::test]
async fn private_call_action_is_unreachable() {
    let fx = fixture();
    let client = fx.connect("/").await;

    let err = client
        .call("io.call", json!({ "socketId": client.id(), "action": "math.add" }))
        .await
        .unwrap_err();
    assert_eq!(err.name, "ServiceNotFoundError");

    // published administrative actions pass the same whitelist
    let clients = client.call("io.getClients", json!({ "room": client.id() })).await;
    assert_eq!(clients, Ok(json!([client.id()])));
}

#[tokio::test]
async fn restrict_policy_hides_unmapped_names() {
    let fx = fixture();
    let client = fx.connect("/restricted").await;

    assert_eq!(client.call("add", json!({ "a": 2, "b": 3 })).await, Ok(json!(5)));
    let err = client.call("math.add", json!({ "a": 2, "b": 3 })).await.unwrap_err();
    assert_eq!(err.name, "ServiceNotFoundError");
    assert_eq!(err.message, "Service 'math.add' is not found.");
}

#[tokio::test]
async fn alias_passes_action_errors_through() {
    let fx = fixture();
    let client = fx.connect("/").await;

    assert_eq!(client.call("div", json!({ "a": 10, "b": 5 })).await, Ok(json!(2)));

    let err = client.call("div", json!({ "a": 10, "b": 0 })).await.unwrap_err();
    assert_eq!(err.name, "MoleculerClientError");
    assert_eq!(err.message, "Divide by zero");
    assert_eq!(err.code, 400);
    assert_eq!(err.kind.as_deref(), Some("DIV_ZERO"));
    assert_eq!(err.data, Some(json!({ "a": 10, "b": 0 })));
}

#[tokio::test]
async fn omitted_params_are_null() {
    let fx = fixture();
    let client = fx.connect("/").await;

    let res = client
        .emit_with_ack("call", vec![json!("math.add")])
        .await
        .unwrap()
        .into_result();
    assert_eq!(res, Ok(json!(0)));
}

#[tokio::test]
async fn raw_handler_bypasses_pipeline() {
    let fx = fixture();
    let client = fx.connect("/").await;
    fx.flow.take();

    let res = client
        .emit_with_ack("custom", vec![json!({ "a": 5 })])
        .await
        .unwrap()
        .into_result();
    assert_eq!(res, Ok(json!("custom-ok")));
    assert_eq!(fx.flow.take(), vec!["packet middleware", "custom-5"]);
}

#[tokio::test]
async fn rejected_packet_emits_error_event() {
    let io = MemoryTransport::new();
    let _gateway = gateway_with(
        &io,
        NamespaceConfig::new()
            .packet_middleware(packet_middleware_fn(|_, packet| {
                if packet.event == "call" {
                    Err(ServiceError::new("PacketRejected", "no calls today", 403))
                } else {
                    Ok(())
                }
            }))
            .call_event("call", CallDescriptor::new()),
    );
    let mut client = TestClient::connect(&io, "/").await.unwrap();

    assert!(client.emit_with_ack("call", vec![json!("math.add")]).await.is_none());
    let (event, args) = client.try_next_event().unwrap();
    assert_eq!(event, "error");
    assert_eq!(args[0]["name"], json!("PacketRejected"));
}

#[tokio::test]
async fn failing_after_hook_discards_response_meta() {
    let io = MemoryTransport::new();
    let _gateway = gateway_with(
        &io,
        NamespaceConfig::new().call_event(
            "call",
            CallDescriptor::new().after_call(after_call_fn(|_, _, _| {
                Err(ServiceError::new("AfterHookError", "result rejected", 500))
            })),
        ),
    );
    let client = TestClient::connect(&io, "/").await.unwrap();
    client.socket.set_user(Some(json!({ "id": "before" })));

    let err = client
        .call("rooms.enter", json!({ "room": "room-01" }))
        .await
        .unwrap_err();
    assert_eq!(err.name, "AfterHookError");
    assert_eq!(err.code, 500);
    assert_eq!(client.socket.rooms(), vec![client.id()]);
    assert_eq!(client.socket.user(), Some(json!({ "id": "before" })));
    assert!(io.room_members("/", "room-01").is_empty());
}

#[tokio::test]
async fn unknown_event_is_ignored() {
    let fx = fixture();
    let client = fx.connect("/").await;
    assert!(client.emit_with_ack("nothing", Vec::new()).await.is_none());
}
