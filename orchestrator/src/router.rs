//! Dispatch of routed commands to their owning services.
//!
//! The routing table is the identity `intent -> (service, tool)` carried by
//! the intent schemas. Services are resolved against the registry; the
//! router keeps one client per remote service and supports in-process
//! callers for services hosted in the orchestrator binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use servis_registry::{ServiceRegistry, ServiceType};
use servis_rpc::transport::ws;
use servis_rpc::{Envelope, ErrorCode, HttpRpcClient, RpcError, ServiceCaller, ToolServer};

/// In-process caller wrapping a tool server hosted in the same process.
pub struct LocalCaller {
    server: Arc<ToolServer>,
}

impl LocalCaller {
    pub fn new(server: Arc<ToolServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ServiceCaller for LocalCaller {
    async fn call_tool(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let request = Envelope::request(Uuid::new_v4().to_string(), method, params);
        let reply = tokio::time::timeout(timeout, self.server.dispatch(request))
            .await
            .map_err(|_| RpcError::Timeout)?;
        match reply {
            Some(envelope) => match envelope.error {
                Some(err) => Err(RpcError::remote(err.code, err.message)),
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            },
            None => Ok(Value::Null),
        }
    }
}

pub struct ServiceRouter {
    registry: Arc<ServiceRegistry>,
    clients: Mutex<HashMap<String, Arc<dyn ServiceCaller>>>,
}

impl ServiceRouter {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Install a caller for a service hosted in this process (or a test
    /// double). Remote connections are never attempted for it.
    pub fn register_local(&self, service: &str, caller: Arc<dyn ServiceCaller>) {
        self.clients
            .lock()
            .expect("clients lock")
            .insert(service.to_string(), caller);
    }

    /// Services currently registered, for user-visible suggestions.
    pub fn available_services(&self) -> Vec<String> {
        self.registry
            .discover(None)
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }

    fn cached_caller(&self, service: &str) -> Option<Arc<dyn ServiceCaller>> {
        self.clients.lock().expect("clients lock").get(service).cloned()
    }

    async fn connect(&self, service: &str) -> Result<Arc<dyn ServiceCaller>, RpcError> {
        let entry = self.registry.get(service).ok_or_else(|| {
            RpcError::remote(
                ErrorCode::ServiceUnavailable,
                format!("service {service} is not registered"),
            )
        })?;
        let caller: Arc<dyn ServiceCaller> = match entry.service_type {
            ServiceType::Http => Arc::new(HttpRpcClient::new(format!(
                "http://{}:{}/rpc",
                entry.host, entry.port
            ))),
            ServiceType::Mcp => {
                let client = ws::connect(&format!("ws://{}:{}/ws", entry.host, entry.port)).await?;
                Arc::new(client)
            }
        };
        self.clients
            .lock()
            .expect("clients lock")
            .insert(service.to_string(), caller.clone());
        Ok(caller)
    }

    /// Call `tool` on `service`, recording per-service health bookkeeping.
    pub async fn dispatch(
        &self,
        service: &str,
        tool: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if !self.registry.contains(service) && self.cached_caller(service).is_none() {
            return Err(RpcError::remote(
                ErrorCode::ServiceUnavailable,
                format!("service {service} is not registered"),
            ));
        }

        let caller = match self.cached_caller(service) {
            Some(caller) => caller,
            None => self.connect(service).await?,
        };

        let started = Instant::now();
        let outcome = caller.call_tool(tool, params, timeout).await;
        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(_) => {
                debug!(%service, %tool, elapsed, "service dispatch ok");
                self.registry.record_success(service, elapsed);
            }
            Err(err) => {
                warn!(%service, %tool, %err, "service dispatch failed");
                self.registry.record_error(service);
                // A dead connection should not poison future dispatches.
                if matches!(err, RpcError::TransportClosed | RpcError::Connect(_)) {
                    self.clients.lock().expect("clients lock").remove(service);
                }
            }
        }
        outcome
    }
}
