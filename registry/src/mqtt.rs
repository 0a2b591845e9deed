//! MQTT discovery bridge.
//!
//! Mirrors `ai-servis/services/{name}/{register,heartbeat,unregister}`
//! messages into the registry, with effects identical to the direct tool
//! calls, and republishes direct registrations for peers.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::entry::NewService;
use crate::registry::{RegistryEvent, ServiceRegistry};

const TOPIC_PREFIX: &str = "ai-servis/services";

/// Wire payload for `.../register`.
#[derive(Debug, Deserialize)]
struct RegistrationPayload {
    host: String,
    port: u16,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    health_endpoint: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Bridge handle; aborts the background tasks on shutdown.
pub struct MqttBridge {
    subscriber: tokio::task::JoinHandle<()>,
    publisher: tokio::task::JoinHandle<()>,
}

impl MqttBridge {
    /// Connect to the broker named by the registry configuration and start
    /// both directions of the bridge.
    pub async fn start(registry: Arc<ServiceRegistry>) -> Result<Self, String> {
        let config = registry.config();
        let client_id = format!("servis-registry-{:08x}", rand::random::<u32>());
        let mut options = MqttOptions::new(client_id, config.mqtt_broker.clone(), config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        for suffix in ["register", "heartbeat", "unregister"] {
            client
                .subscribe(format!("{TOPIC_PREFIX}/+/{suffix}"), QoS::AtLeastOnce)
                .await
                .map_err(|err| format!("mqtt subscribe: {err}"))?;
        }
        info!(broker = %config.mqtt_broker, port = config.mqtt_port, "mqtt bridge started");

        let sub_registry = registry.clone();
        let subscriber = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&sub_registry, &publish.topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "mqtt connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Republish direct registrations so peers on the broker see them.
        let mut events = registry.events();
        let pub_client = client.clone();
        let publisher = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::Registered(entry)) => {
                        // Entries that arrived via a bridge are not echoed back.
                        if entry.metadata.contains_key("discovery_method") {
                            continue;
                        }
                        let topic = format!("{TOPIC_PREFIX}/{}/register", entry.name);
                        let payload = json!({
                            "host": entry.host,
                            "port": entry.port,
                            "capabilities": entry.capabilities,
                            "health_endpoint": entry.health_endpoint,
                            "metadata": entry.metadata,
                        });
                        if let Err(err) = pub_client
                            .publish(topic, QoS::AtLeastOnce, false, payload.to_string())
                            .await
                        {
                            warn!(%err, "mqtt publish failed");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "mqtt publisher lagged behind registry events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            subscriber,
            publisher,
        })
    }

    pub fn shutdown(self) {
        self.subscriber.abort();
        self.publisher.abort();
    }
}

fn handle_publish(registry: &ServiceRegistry, topic: &str, payload: &[u8]) {
    let parts: Vec<&str> = topic.split('/').collect();
    let (name, kind) = match parts.as_slice() {
        ["ai-servis", "services", name, kind] => (*name, *kind),
        _ => {
            debug!(%topic, "ignoring message on unexpected topic");
            return;
        }
    };

    match kind {
        "register" => match serde_json::from_slice::<RegistrationPayload>(payload) {
            Ok(reg) => {
                let mut metadata = reg.metadata;
                metadata.insert("discovery_method".into(), json!("mqtt"));
                let new = NewService {
                    name: name.to_string(),
                    host: reg.host,
                    port: reg.port,
                    service_type: Default::default(),
                    capabilities: reg.capabilities.into_iter().collect(),
                    health_endpoint: reg.health_endpoint,
                    metadata,
                };
                if let Err(err) = registry.register(new) {
                    debug!(service = %name, %err, "mqtt registration rejected");
                }
            }
            Err(err) => warn!(service = %name, %err, "undecodable mqtt registration"),
        },
        "heartbeat" => {
            if let Err(err) = registry.heartbeat(name) {
                debug!(service = %name, %err, "mqtt heartbeat for unknown service");
            }
        }
        "unregister" => {
            registry.unregister(name);
        }
        other => debug!(%other, "unknown mqtt message kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceRegistry;

    #[test]
    fn register_heartbeat_unregister_cycle_over_topics() {
        let registry = ServiceRegistry::default();
        let payload = json!({
            "host": "10.0.0.5",
            "port": 8200,
            "capabilities": ["send_message"],
        })
        .to_string();

        handle_publish(
            &registry,
            "ai-servis/services/comms/register",
            payload.as_bytes(),
        );
        let entry = registry.get("comms").expect("registered via mqtt");
        assert_eq!(entry.host, "10.0.0.5");
        assert_eq!(entry.metadata.get("discovery_method"), Some(&json!("mqtt")));

        handle_publish(&registry, "ai-servis/services/comms/heartbeat", b"");
        handle_publish(&registry, "ai-servis/services/comms/unregister", b"");
        assert!(registry.get("comms").is_none());
    }

    #[test]
    fn junk_topics_and_payloads_are_ignored() {
        let registry = ServiceRegistry::default();
        handle_publish(&registry, "other/topic", b"{}");
        handle_publish(
            &registry,
            "ai-servis/services/x/register",
            b"not valid json",
        );
        assert!(registry.is_empty());
    }
}
