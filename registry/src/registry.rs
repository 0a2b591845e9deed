//! The registry proper: a single-writer map of service entries plus the
//! runtime-tunable configuration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::entry::{HealthStatus, NewService, ServiceEntry};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("service '{0}' not found")]
    NotFound(String),
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
    #[error("invalid value for configuration key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Runtime-tunable settings, exposed through `manage_configuration`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub heartbeat_timeout: Duration,
    pub cleanup_interval: Duration,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mdns_service_type: String,
    pub enable_mdns: bool,
    pub enable_mqtt: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mdns_service_type: "_ai-servis._tcp.local.".to_string(),
            enable_mdns: true,
            enable_mqtt: true,
        }
    }
}

impl RegistryConfig {
    pub const KEYS: [&'static str; 7] = [
        "heartbeat_timeout_seconds",
        "cleanup_interval_seconds",
        "mqtt_broker",
        "mqtt_port",
        "mdns_service_type",
        "enable_mdns",
        "enable_mqtt",
    ];

    pub fn get(&self, key: &str) -> Result<Value, RegistryError> {
        match key {
            "heartbeat_timeout_seconds" => Ok(json!(self.heartbeat_timeout.as_secs())),
            "cleanup_interval_seconds" => Ok(json!(self.cleanup_interval.as_secs())),
            "mqtt_broker" => Ok(json!(self.mqtt_broker)),
            "mqtt_port" => Ok(json!(self.mqtt_port)),
            "mdns_service_type" => Ok(json!(self.mdns_service_type)),
            "enable_mdns" => Ok(json!(self.enable_mdns)),
            "enable_mqtt" => Ok(json!(self.enable_mqtt)),
            other => Err(RegistryError::UnknownKey(other.to_string())),
        }
    }

    pub fn set(&mut self, key: &str, value: &Value) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match key {
            "heartbeat_timeout_seconds" => {
                self.heartbeat_timeout =
                    Duration::from_secs(as_u64(value).ok_or_else(|| invalid("expected seconds"))?);
            }
            "cleanup_interval_seconds" => {
                self.cleanup_interval =
                    Duration::from_secs(as_u64(value).ok_or_else(|| invalid("expected seconds"))?);
            }
            "mqtt_broker" => {
                self.mqtt_broker = value
                    .as_str()
                    .ok_or_else(|| invalid("expected a string"))?
                    .to_string();
            }
            "mqtt_port" => {
                let port = as_u64(value).ok_or_else(|| invalid("expected a port number"))?;
                self.mqtt_port =
                    u16::try_from(port).map_err(|_| invalid("port out of range"))?;
            }
            "mdns_service_type" => {
                self.mdns_service_type = value
                    .as_str()
                    .ok_or_else(|| invalid("expected a string"))?
                    .to_string();
            }
            "enable_mdns" => {
                self.enable_mdns = as_bool(value).ok_or_else(|| invalid("expected a boolean"))?;
            }
            "enable_mqtt" => {
                self.enable_mqtt = as_bool(value).ok_or_else(|| invalid("expected a boolean"))?;
            }
            other => return Err(RegistryError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn reset(&mut self, key: &str) -> Result<(), RegistryError> {
        let defaults = RegistryConfig::default();
        let value = defaults.get(key)?;
        self.set(key, &value)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for key in Self::KEYS {
            if let Ok(value) = self.get(key) {
                out.insert(key.to_string(), value);
            }
        }
        out
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Registry mutations observable by the discovery bridges.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered(ServiceEntry),
    Unregistered(String),
    Heartbeat(String),
}

/// Aggregate health summary.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub total_services: usize,
    pub healthy_services: usize,
    pub unhealthy_services: usize,
    pub health_percentage: f64,
    pub services: HashMap<String, HealthStatus>,
}

pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
    config: RwLock<RegistryConfig>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            services: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            events,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> RegistryConfig {
        self.config.read().expect("config lock").clone()
    }

    pub fn config_get(&self, key: &str) -> Result<Value, RegistryError> {
        self.config.read().expect("config lock").get(key)
    }

    pub fn config_set(&self, key: &str, value: &Value) -> Result<(), RegistryError> {
        self.config.write().expect("config lock").set(key, value)
    }

    pub fn config_reset(&self, key: Option<&str>) -> Result<(), RegistryError> {
        let mut config = self.config.write().expect("config lock");
        match key {
            Some(key) => config.reset(key),
            None => {
                *config = RegistryConfig::default();
                Ok(())
            }
        }
    }

    pub fn config_snapshot(&self) -> Map<String, Value> {
        self.config.read().expect("config lock").snapshot()
    }

    /// Register a new service. Fails when the name is taken.
    pub fn register(&self, new: NewService) -> Result<ServiceEntry, RegistryError> {
        let mut services = self.services.write().expect("services lock");
        if services.contains_key(&new.name) {
            return Err(RegistryError::AlreadyRegistered(new.name));
        }
        let entry = ServiceEntry::from_new(new, Utc::now());
        info!(service = %entry.name, host = %entry.host, port = entry.port, "registered service");
        services.insert(entry.name.clone(), entry.clone());
        let _ = self.events.send(RegistryEvent::Registered(entry.clone()));
        Ok(entry)
    }

    /// Register or overwrite: used by discovery bridges where the incoming
    /// record wins a name conflict.
    pub fn replace(&self, new: NewService) -> ServiceEntry {
        let mut services = self.services.write().expect("services lock");
        if services.remove(&new.name).is_some() {
            warn!(service = %new.name, "replacing existing registration");
        }
        let entry = ServiceEntry::from_new(new, Utc::now());
        services.insert(entry.name.clone(), entry.clone());
        let _ = self.events.send(RegistryEvent::Registered(entry.clone()));
        entry
    }

    /// Record a heartbeat. `last_heartbeat` never moves backwards.
    pub fn heartbeat(&self, name: &str) -> Result<DateTime<Utc>, RegistryError> {
        let mut services = self.services.write().expect("services lock");
        let entry = services
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        entry.last_heartbeat = entry.last_heartbeat.max(Utc::now());
        entry.health_status = HealthStatus::Healthy;
        let _ = self.events.send(RegistryEvent::Heartbeat(name.to_string()));
        Ok(entry.last_heartbeat)
    }

    /// Remove a service. Silent when the name is absent.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .services
            .write()
            .expect("services lock")
            .remove(name)
            .is_some();
        if removed {
            info!(service = %name, "unregistered service");
            let _ = self.events.send(RegistryEvent::Unregistered(name.to_string()));
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<ServiceEntry> {
        self.services.read().expect("services lock").get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().expect("services lock").contains_key(name)
    }

    /// List entries, optionally filtered by an advertised capability.
    pub fn discover(&self, capability: Option<&str>) -> Vec<ServiceEntry> {
        let services = self.services.read().expect("services lock");
        let mut entries: Vec<ServiceEntry> = services
            .values()
            .filter(|entry| capability.map_or(true, |cap| entry.has_capability(cap)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Mark each entry healthy or unhealthy by heartbeat age and return the
    /// aggregate summary.
    pub fn check_health(&self) -> HealthReport {
        let timeout = chrono::Duration::from_std(self.config().heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let now = Utc::now();
        let mut services = self.services.write().expect("services lock");
        let mut statuses = HashMap::new();
        let mut healthy = 0usize;
        for entry in services.values_mut() {
            entry.health_status = if now - entry.last_heartbeat > timeout {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            };
            if entry.health_status == HealthStatus::Healthy {
                healthy += 1;
            }
            statuses.insert(entry.name.clone(), entry.health_status);
        }
        let total = services.len();
        HealthReport {
            status: if healthy == total { "healthy" } else { "degraded" }.to_string(),
            total_services: total,
            healthy_services: healthy,
            unhealthy_services: total - healthy,
            health_percentage: if total == 0 {
                100.0
            } else {
                (healthy as f64 / total as f64 * 10000.0).round() / 100.0
            },
            services: statuses,
        }
    }

    /// Atomic unregister + register that keeps any field not supplied.
    pub fn restart(
        &self,
        name: &str,
        host: Option<String>,
        port: Option<u16>,
        capabilities: Option<std::collections::BTreeSet<String>>,
    ) -> Result<ServiceEntry, RegistryError> {
        let mut services = self.services.write().expect("services lock");
        let current = services
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let entry = ServiceEntry::from_new(
            NewService {
                name: current.name,
                host: host.unwrap_or(current.host),
                port: port.unwrap_or(current.port),
                service_type: current.service_type,
                capabilities: capabilities.unwrap_or(current.capabilities),
                health_endpoint: current.health_endpoint,
                metadata: current.metadata,
            },
            Utc::now(),
        );
        info!(service = %entry.name, "restarted service registration");
        services.insert(entry.name.clone(), entry.clone());
        let _ = self.events.send(RegistryEvent::Registered(entry.clone()));
        Ok(entry)
    }

    /// Drop entries that have missed heartbeats for twice the timeout.
    pub fn cleanup_stale(&self) -> Vec<String> {
        let timeout = chrono::Duration::from_std(self.config().heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let now = Utc::now();
        let mut services = self.services.write().expect("services lock");
        let stale: Vec<String> = services
            .values()
            .filter(|entry| now - entry.last_heartbeat > timeout * 2)
            .map(|entry| entry.name.clone())
            .collect();
        for name in &stale {
            warn!(service = %name, "evicting stale service");
            services.remove(name);
            let _ = self.events.send(RegistryEvent::Unregistered(name.clone()));
        }
        stale
    }

    /// Dispatch bookkeeping: successful call through a service.
    pub fn record_success(&self, name: &str, response_time: f64) {
        let mut services = self.services.write().expect("services lock");
        if let Some(entry) = services.get_mut(name) {
            entry.response_time = Some(response_time);
            entry.health_status = HealthStatus::Healthy;
        }
    }

    /// Dispatch bookkeeping: failed call through a service.
    pub fn record_error(&self, name: &str) {
        let mut services = self.services.write().expect("services lock");
        if let Some(entry) = services.get_mut(name) {
            entry.error_count += 1;
            entry.health_status = HealthStatus::Error;
        }
    }

    pub fn len(&self) -> usize {
        self.services.read().expect("services lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Background eviction task running every `cleanup_interval`.
    pub fn spawn_eviction_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = registry.config().cleanup_interval;
                tokio::time::sleep(interval).await;
                let removed = registry.cleanup_stale();
                if !removed.is_empty() {
                    info!(count = removed.len(), "eviction sweep removed stale services");
                }
            }
        })
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
