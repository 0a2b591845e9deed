//! The registry tool surface.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use servis_rpc::{input_schema_for, ErrorCode, Tool, ToolError, ToolServer};

use crate::entry::{NewService, ServiceEntry};
use crate::registry::{RegistryError, ServiceRegistry};

impl From<RegistryError> for ToolError {
    fn from(err: RegistryError) -> Self {
        let code = match err {
            RegistryError::AlreadyRegistered(_) => ErrorCode::AlreadyRegistered,
            RegistryError::NotFound(_) => ErrorCode::NotFound,
            RegistryError::UnknownKey(_) => ErrorCode::UnknownKey,
            RegistryError::InvalidValue { .. } => ErrorCode::InvalidParams,
        };
        ToolError::new(code, err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegisterServiceParams {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capabilities: Vec<String>,
    pub health_endpoint: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServiceNameParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DiscoverServicesParams {
    pub capability: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RestartServiceParams {
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MonitorServicesParams {
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ManageConfigurationParams {
    /// One of `get`, `set`, `reset`.
    pub action: String,
    pub key: Option<String>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct EmptyParams {}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|err| ToolError::invalid_params(err.to_string()))
}

fn entry_json(entry: &ServiceEntry) -> Value {
    serde_json::to_value(entry).unwrap_or(Value::Null)
}

/// Register the §4.3 tool set onto a server.
pub fn register_tools(
    server: &mut ToolServer,
    registry: Arc<ServiceRegistry>,
) -> Result<(), ToolError> {
    let reg = registry.clone();
    server.register(Tool::new(
        "register_service",
        "Register a new service with the discovery system",
        input_schema_for::<RegisterServiceParams>(),
        move |params| {
            let registry = reg.clone();
            async move {
                let p: RegisterServiceParams = parse(params)?;
                let entry = registry.register(NewService {
                    name: p.name,
                    host: p.host,
                    port: p.port,
                    service_type: Default::default(),
                    capabilities: p.capabilities.into_iter().collect(),
                    health_endpoint: p.health_endpoint,
                    metadata: p.metadata.unwrap_or_default(),
                })?;
                Ok(json!({
                    "message": format!("service {} registered", entry.name),
                    "service": entry_json(&entry),
                }))
            }
        },
    ))?;

    let reg = registry.clone();
    server.register(Tool::new(
        "service_heartbeat",
        "Send a heartbeat to keep a service alive",
        input_schema_for::<ServiceNameParams>(),
        move |params| {
            let registry = reg.clone();
            async move {
                let p: ServiceNameParams = parse(params)?;
                let at = registry.heartbeat(&p.name)?;
                Ok(json!({"name": p.name, "last_heartbeat": at}))
            }
        },
    ))?;

    let reg = registry.clone();
    server.register(Tool::new(
        "unregister_service",
        "Remove a service from the registry",
        input_schema_for::<ServiceNameParams>(),
        move |params| {
            let registry = reg.clone();
            async move {
                let p: ServiceNameParams = parse(params)?;
                let removed = registry.unregister(&p.name);
                Ok(json!({"name": p.name, "removed": removed}))
            }
        },
    ))?;

    let reg = registry.clone();
    server.register(Tool::new(
        "discover_services",
        "Discover available services, optionally filtered by capability",
        input_schema_for::<DiscoverServicesParams>(),
        move |params| {
            let registry = reg.clone();
            async move {
                let p: DiscoverServicesParams = parse(params)?;
                let services = registry.discover(p.capability.as_deref());
                Ok(json!({
                    "services": services.iter().map(entry_json).collect::<Vec<_>>(),
                    "total": services.len(),
                }))
            }
        },
    ))?;

    let reg = registry.clone();
    server.register(Tool::new(
        "check_service_health",
        "Check the health status of all registered services",
        input_schema_for::<EmptyParams>(),
        move |_params| {
            let registry = reg.clone();
            async move {
                let report = registry.check_health();
                let mut out = serde_json::to_value(&report).unwrap_or(Value::Null);
                if let Some(map) = out.as_object_mut() {
                    map.insert("timestamp".into(), json!(Utc::now()));
                }
                Ok(out)
            }
        },
    ))?;

    let reg = registry.clone();
    server.register(Tool::new(
        "restart_service",
        "Atomically re-register a service, keeping unspecified fields",
        input_schema_for::<RestartServiceParams>(),
        move |params| {
            let registry = reg.clone();
            async move {
                let p: RestartServiceParams = parse(params)?;
                let entry = registry.restart(
                    &p.name,
                    p.host,
                    p.port,
                    p.capabilities
                        .map(|caps| caps.into_iter().collect::<BTreeSet<_>>()),
                )?;
                Ok(json!({
                    "message": format!("service {} restarted", entry.name),
                    "service": entry_json(&entry),
                }))
            }
        },
    ))?;

    let reg = registry.clone();
    server.register(Tool::new(
        "monitor_services",
        "Detailed monitoring information for one service or the whole fleet",
        input_schema_for::<MonitorServicesParams>(),
        move |params| {
            let registry = reg.clone();
            async move {
                let p: MonitorServicesParams = parse(params)?;
                let now = Utc::now();
                match p.service_name {
                    Some(name) => {
                        let entry = registry
                            .get(&name)
                            .ok_or_else(|| ToolError::not_found(format!("service '{name}' not found")))?;
                        Ok(json!({
                            "service": entry_json(&entry),
                            "uptime_seconds": (now - entry.registered_at).num_seconds(),
                            "timestamp": now,
                        }))
                    }
                    None => {
                        let services: Vec<Value> = registry
                            .discover(None)
                            .iter()
                            .map(|entry| {
                                json!({
                                    "service": entry_json(entry),
                                    "uptime_seconds": (now - entry.registered_at).num_seconds(),
                                })
                            })
                            .collect();
                        Ok(json!({
                            "services": services,
                            "total_services": services.len(),
                            "timestamp": now,
                        }))
                    }
                }
            }
        },
    ))?;

    let reg = registry;
    server.register(Tool::new(
        "manage_configuration",
        "Get, set or reset registry configuration keys",
        input_schema_for::<ManageConfigurationParams>(),
        move |params| {
            let registry = reg.clone();
            async move {
                let p: ManageConfigurationParams = parse(params)?;
                match p.action.as_str() {
                    "get" => match p.key {
                        Some(key) => {
                            let value = registry.config_get(&key)?;
                            Ok(json!({"key": key, "value": value}))
                        }
                        None => Ok(json!({"configuration": registry.config_snapshot()})),
                    },
                    "set" => {
                        let key = p.key.ok_or_else(|| {
                            ToolError::invalid_params("'key' is required for set")
                        })?;
                        let value = p.value.ok_or_else(|| {
                            ToolError::invalid_params("'value' is required for set")
                        })?;
                        registry.config_set(&key, &value)?;
                        Ok(json!({"message": format!("configuration {key} updated")}))
                    }
                    "reset" => {
                        registry.config_reset(p.key.as_deref())?;
                        Ok(json!({"message": "configuration reset"}))
                    }
                    other => Err(ToolError::invalid_params(format!(
                        "unknown action '{other}'"
                    ))),
                }
            }
        },
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_registry_tools_register() {
        let mut server = ToolServer::new("registry", "0.1.0");
        register_tools(&mut server, Arc::new(ServiceRegistry::default())).unwrap();
        let names = server.tool_names();
        for expected in [
            "register_service",
            "service_heartbeat",
            "unregister_service",
            "discover_services",
            "check_service_health",
            "restart_service",
            "monitor_services",
            "manage_configuration",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
