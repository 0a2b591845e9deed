//! Registered service records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Http,
    Mcp,
}

impl Default for ServiceType {
    fn default() -> Self {
        ServiceType::Http
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
    Error,
}

/// Registration request, before the registry stamps bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewService {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub health_endpoint: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One live entry in the registry. `name` is unique; `last_heartbeat` is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub service_type: ServiceType,
    pub capabilities: BTreeSet<String>,
    pub health_endpoint: Option<String>,
    pub health_status: HealthStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    /// Seconds taken by the most recent dispatch through this service.
    pub response_time: Option<f64>,
    pub error_count: u64,
    pub metadata: Map<String, Value>,
}

impl ServiceEntry {
    pub fn from_new(new: NewService, now: DateTime<Utc>) -> Self {
        Self {
            name: new.name,
            host: new.host,
            port: new.port,
            service_type: new.service_type,
            capabilities: new.capabilities,
            health_endpoint: new.health_endpoint,
            health_status: HealthStatus::Healthy,
            last_heartbeat: now,
            registered_at: now,
            response_time: None,
            error_count: 0,
            metadata: new.metadata,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}
