//! Registry lifecycle exercised through the tool surface, the way remote
//! services use it.

use std::sync::Arc;

use serde_json::{json, Value};
use servis_registry::tools::register_tools;
use servis_registry::{RegistryConfig, ServiceRegistry};
use servis_rpc::{Envelope, ErrorCode, ToolServer};

async fn call(server: &ToolServer, id: &str, method: &str, params: Value) -> Envelope {
    server
        .dispatch(Envelope::request(id, method, params))
        .await
        .expect("request yields a reply")
}

fn registry_server(registry: Arc<ServiceRegistry>) -> ToolServer {
    let mut server = ToolServer::new("service-discovery", "1.0.0");
    register_tools(&mut server, registry).unwrap();
    server
}

#[tokio::test]
async fn register_discover_and_evict() -> anyhow::Result<()> {
    let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
    let server = registry_server(registry.clone());

    let reply = call(
        &server,
        "u-1",
        "register_service",
        json!({
            "name": "audio",
            "host": "localhost",
            "port": 8100,
            "capabilities": ["play", "pause"],
        }),
    )
    .await;
    assert!(reply.error.is_none(), "{:?}", reply.error);

    // Filtered discovery finds the capability.
    let reply = call(&server, "u-2", "discover_services", json!({"capability": "pause"})).await;
    let result = reply.result.unwrap();
    assert_eq!(result["total"], 1);
    assert_eq!(result["services"][0]["name"], "audio");

    // Second registration under the same name is rejected.
    let reply = call(
        &server,
        "u-3",
        "register_service",
        json!({"name": "audio", "host": "localhost", "port": 9, "capabilities": []}),
    )
    .await;
    assert_eq!(reply.error.unwrap().code, ErrorCode::AlreadyRegistered);

    // With a zero heartbeat timeout the entry goes stale immediately and the
    // sweep drops it, after which discovery returns the empty list.
    registry.config_set("heartbeat_timeout_seconds", &json!(0))?;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    registry.cleanup_stale();
    let reply = call(&server, "u-4", "discover_services", json!({})).await;
    assert_eq!(reply.result.unwrap()["total"], 0);
    Ok(())
}

#[tokio::test]
async fn heartbeat_restores_health() -> anyhow::Result<()> {
    let registry = Arc::new(ServiceRegistry::default());
    let server = registry_server(registry.clone());

    call(
        &server,
        "u-1",
        "register_service",
        json!({"name": "comms", "host": "localhost", "port": 8200, "capabilities": ["send_message"]}),
    )
    .await;

    let reply = call(&server, "u-2", "service_heartbeat", json!({"name": "comms"})).await;
    assert!(reply.error.is_none());
    let entry = registry.get("comms").unwrap();
    assert_eq!(entry.health_status, servis_registry::HealthStatus::Healthy);

    let reply = call(&server, "u-3", "service_heartbeat", json!({"name": "ghost"})).await;
    assert_eq!(reply.error.unwrap().code, ErrorCode::NotFound);
    Ok(())
}

#[tokio::test]
async fn configuration_tool_round_trip() -> anyhow::Result<()> {
    let registry = Arc::new(ServiceRegistry::default());
    let server = registry_server(registry);

    let reply = call(
        &server,
        "u-1",
        "manage_configuration",
        json!({"action": "set", "key": "heartbeat_timeout_seconds", "value": 10}),
    )
    .await;
    assert!(reply.error.is_none());

    let reply = call(
        &server,
        "u-2",
        "manage_configuration",
        json!({"action": "get", "key": "heartbeat_timeout_seconds"}),
    )
    .await;
    assert_eq!(reply.result.unwrap()["value"], 10);

    let reply = call(
        &server,
        "u-3",
        "manage_configuration",
        json!({"action": "get", "key": "no_such_key"}),
    )
    .await;
    assert_eq!(reply.error.unwrap().code, ErrorCode::UnknownKey);

    let reply = call(&server, "u-4", "manage_configuration", json!({"action": "reset"})).await;
    assert!(reply.error.is_none());
    Ok(())
}

#[tokio::test]
async fn restart_keeps_unspecified_fields() -> anyhow::Result<()> {
    let registry = Arc::new(ServiceRegistry::default());
    let server = registry_server(registry);

    call(
        &server,
        "u-1",
        "register_service",
        json!({"name": "hw", "host": "10.0.0.2", "port": 8081, "capabilities": ["gpio"]}),
    )
    .await;
    let reply = call(&server, "u-2", "restart_service", json!({"name": "hw", "port": 8082})).await;
    let service = &reply.result.unwrap()["service"];
    assert_eq!(service["host"], "10.0.0.2");
    assert_eq!(service["port"], 8082);
    assert_eq!(service["capabilities"][0], "gpio");
    Ok(())
}
