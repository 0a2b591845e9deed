//! End-to-end checks that all three transports carry the same envelope.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use servis_rpc::transport::{http, line, ws};
use servis_rpc::{Envelope, ErrorCode, HttpRpcClient, RpcError, ServiceCaller, Tool, ToolServer};
use tokio::net::TcpListener;

fn test_server() -> Arc<ToolServer> {
    let mut server = ToolServer::new("test-suite", "0.0.0");
    server
        .register(Tool::new(
            "add",
            "adds two integers",
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "integer"},
                    "b": {"type": "integer"}
                },
                "required": ["a", "b"]
            }),
            |params| async move {
                let a = params["a"].as_i64().unwrap_or_default();
                let b = params["b"].as_i64().unwrap_or_default();
                Ok(json!({"sum": a + b}))
            },
        ))
        .unwrap();
    server
        .register(Tool::new(
            "sleepy",
            "sleeps before replying",
            json!({"type": "object"}),
            |_| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            },
        ))
        .unwrap();
    Arc::new(server)
}

#[tokio::test]
async fn line_transport_roundtrip() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(line::serve(listener, test_server()));

    let client = line::connect(&addr.to_string()).await?;
    let out = client.call("add", json!({"a": 2, "b": 3})).await?;
    assert_eq!(out, json!({"sum": 5}));

    // Unknown tool surfaces the canonical routing code.
    let err = client.call("nope", json!({})).await.unwrap_err();
    match err {
        RpcError::Remote { code, .. } => assert_eq!(code, ErrorCode::MethodNotFound),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn websocket_transport_roundtrip() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(ws::serve(listener, test_server()));

    let client = ws::connect(&format!("ws://{addr}/ws")).await?;
    let out = client.call("add", json!({"a": 40, "b": 2})).await?;
    assert_eq!(out, json!({"sum": 42}));

    // String digits coerce through the schema gate.
    let out = client.call("add", json!({"a": "1", "b": "2"})).await?;
    assert_eq!(out, json!({"sum": 3}));
    Ok(())
}

#[tokio::test]
async fn http_transport_roundtrip() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(http::serve(listener, test_server()));

    let client = HttpRpcClient::new(format!("http://{addr}/rpc"));
    let out = client.call("add", json!({"a": -1, "b": 1})).await?;
    assert_eq!(out, json!({"sum": 0}));

    let err = client
        .call_tool("add", json!({"a": "x", "b": 1}), Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        RpcError::Remote { code, .. } => assert_eq!(code, ErrorCode::InvalidParams),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn slow_call_times_out_client_side() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(line::serve(listener, test_server()));

    let client = line::connect(&addr.to_string()).await?;
    let err = client
        .call_with_timeout("sleepy", json!({}), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout));
    Ok(())
}

#[tokio::test]
async fn notifications_cross_the_line_transport_silently() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(line::serve(listener, test_server()));

    let client = line::connect(&addr.to_string()).await?;
    client.notify("add", json!({"a": 1, "b": 1})).await?;
    // A follow-up request still works on the same connection.
    let out = client.call("add", json!({"a": 1, "b": 1})).await?;
    assert_eq!(out, json!({"sum": 2}));
    Ok(())
}

#[test]
fn envelope_shape_matches_the_wire_examples() {
    let req = Envelope::request("u-1", "register_service", json!({"name": "audio"}));
    let text = serde_json::to_string(&req).unwrap();
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["id"], "u-1");
    assert_eq!(parsed["type"], "request");
    assert_eq!(parsed["method"], "register_service");
}
