//! Integration tests for the in-memory session transport.
//!
//! Each test drives a real [`WidgetServer`] through [`DuplexTransport`]
//! exactly as the multiplexer does.

use std::time::Duration;

use serde_json::{json, Value};

use widget_relay::mcp::handler::{ToolRegistry, WidgetServer};
use widget_relay::mcp::tools::WidgetToolRegistry;
use widget_relay::mcp::transport::DuplexTransport;
use widget_relay::session::{SessionId, SessionTransport, TransportReply};
use widget_relay::AppError;

use super::test_helpers::{test_app_state, test_config};

fn connect() -> DuplexTransport {
    let state = test_app_state(test_config("http://127.0.0.1:9"));
    let mut server = WidgetServer::new(state);
    WidgetToolRegistry
        .register(&mut server)
        .expect("tools register");
    DuplexTransport::connect(SessionId::generate(), server, Duration::from_secs(5))
}

fn initialize(id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "transport-test", "version": "0.0.0" }
        }
    })
}

async fn handshake(transport: &DuplexTransport) {
    transport
        .handle_request(initialize(1))
        .await
        .expect("initialize answered");
    let ack = transport
        .handle_request(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await
        .expect("initialized accepted");
    assert_eq!(ack, TransportReply::Accepted);
}

#[tokio::test]
async fn initialize_is_answered_with_matching_id() {
    let transport = connect();

    let reply = transport
        .handle_request(initialize(7))
        .await
        .expect("initialize answered");

    let TransportReply::Message(reply) = reply else {
        panic!("initialize must produce a reply");
    };
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["serverInfo"]["name"], "widget-relay");
    assert!(reply["result"]["capabilities"]["tools"].is_object());
    assert!(reply["result"]["capabilities"]["resources"].is_object());
}

#[tokio::test]
async fn requests_after_handshake_are_routed_by_id() {
    let transport = connect();
    handshake(&transport).await;

    let (tools, resources) = tokio::join!(
        transport.handle_request(json!({ "jsonrpc": "2.0", "id": "a", "method": "tools/list" })),
        transport.handle_request(json!({ "jsonrpc": "2.0", "id": "b", "method": "resources/list" })),
    );

    let TransportReply::Message(tools) = tools.expect("tools/list") else {
        panic!("tools/list must produce a reply");
    };
    let TransportReply::Message(resources) = resources.expect("resources/list") else {
        panic!("resources/list must produce a reply");
    };
    assert_eq!(tools["id"], "a");
    assert_eq!(tools["result"]["tools"].as_array().map(Vec::len), Some(2));
    assert_eq!(resources["id"], "b");
    assert_eq!(resources["result"]["resources"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn batches_are_rejected() {
    let transport = connect();

    let err = transport
        .handle_request(json!([initialize(1)]))
        .await
        .expect_err("batch rejected");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn close_fires_closure_and_rejects_requests() {
    let transport = connect();
    handshake(&transport).await;
    let closed = transport.closed();

    transport.close();
    transport.close();

    tokio::time::timeout(Duration::from_secs(1), closed.cancelled())
        .await
        .expect("closure signalled");
    let err = transport
        .handle_request(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await
        .expect_err("closed transport rejects requests");
    assert!(matches!(err, AppError::Transport(_)));
}

#[tokio::test]
async fn server_without_initialize_shuts_down() {
    let transport = connect();
    let closed = transport.closed();

    let outcome = transport
        .handle_request(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .await;

    match outcome {
        Err(err) => assert!(matches!(err, AppError::Transport(_))),
        Ok(TransportReply::Message(reply)) => assert!(reply.get("error").is_some()),
        Ok(TransportReply::Accepted) => panic!("request must not be accepted silently"),
    }
    tokio::time::timeout(Duration::from_secs(1), closed.cancelled())
        .await
        .expect("server shut down after failed handshake");
}
