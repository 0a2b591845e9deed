//! mDNS discovery bridge.
//!
//! Browses the configured service type on the local network and mirrors
//! resolved records into the registry. Capabilities come from the TXT record
//! key `capabilities` (comma-separated). A resolved record with a name that
//! already exists wins the conflict and replaces the entry.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use serde_json::{json, Map};
use tracing::{error, info, warn};

use crate::entry::NewService;
use crate::registry::ServiceRegistry;

/// Browser handle; dropping it or calling [`MdnsBrowser::shutdown`] stops
/// the background thread.
pub struct MdnsBrowser {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MdnsBrowser {
    /// Start browsing for the registry's configured mDNS service type.
    pub fn start(registry: Arc<ServiceRegistry>) -> Result<Self, String> {
        let service_type = registry.config().mdns_service_type;
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("mdns-browser".into())
            .spawn(move || {
                if let Err(err) = browse_loop(&service_type, registry, stop_rx) {
                    error!(%err, "mdns browser stopped with error");
                }
            })
            .map_err(|err| format!("failed to spawn mdns browser: {err}"))?;
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    pub fn shutdown(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

fn browse_loop(
    service_type: &str,
    registry: Arc<ServiceRegistry>,
    stop_rx: Receiver<()>,
) -> Result<(), String> {
    let daemon = ServiceDaemon::new().map_err(|err| format!("mdns daemon: {err}"))?;
    let receiver = daemon
        .browse(service_type)
        .map_err(|err| format!("mdns browse: {err}"))?;
    info!(%service_type, "mdns browser started");

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                if let Some(new) = resolved_to_service(&info) {
                    info!(service = %new.name, host = %new.host, port = new.port, "mdns service resolved");
                    registry.replace(new);
                }
            }
            Ok(ServiceEvent::ServiceRemoved(_ty, fullname)) => {
                let name = instance_name(&fullname);
                if registry.unregister(&name) {
                    info!(service = %name, "mdns service removed");
                }
            }
            Ok(_) => {}
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = daemon.shutdown();
    info!("mdns browser stopped");
    Ok(())
}

fn instance_name(fullname: &str) -> String {
    fullname.split('.').next().unwrap_or(fullname).to_string()
}

fn resolved_to_service(info: &ServiceInfo) -> Option<NewService> {
    let name = instance_name(info.get_fullname());
    let host = info
        .get_addresses()
        .iter()
        .next()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| info.get_hostname().trim_end_matches('.').to_string());
    let capabilities = info
        .get_properties()
        .get_property_val_str("capabilities")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|cap| !cap.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if name.is_empty() {
        warn!(fullname = %info.get_fullname(), "mdns record without usable name");
        return None;
    }

    let mut metadata = Map::new();
    metadata.insert("discovery_method".into(), json!("mdns"));
    metadata.insert("service_type".into(), json!(info.get_type()));

    Some(NewService {
        name,
        host,
        port: info.get_port(),
        service_type: Default::default(),
        capabilities,
        health_endpoint: None,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_strips_the_service_suffix() {
        assert_eq!(instance_name("audio._ai-servis._tcp.local."), "audio");
        assert_eq!(instance_name("plain"), "plain");
    }

    #[test]
    fn capabilities_txt_parsing() {
        let mut props = std::collections::HashMap::new();
        props.insert("capabilities".to_string(), "play, pause,stop".to_string());
        let info = ServiceInfo::new(
            "_ai-servis._tcp.local.",
            "audio",
            "host.local.",
            "192.168.1.10",
            8100,
            props,
        )
        .unwrap();
        let new = resolved_to_service(&info).unwrap();
        assert_eq!(new.name, "audio");
        assert_eq!(new.port, 8100);
        assert!(new.capabilities.contains("play"));
        assert!(new.capabilities.contains("pause"));
        assert!(new.capabilities.contains("stop"));
        assert_eq!(new.metadata.get("discovery_method"), Some(&json!("mdns")));
    }
}
