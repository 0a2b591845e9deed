//! The servis orchestrator process.
//!
//! Hosts the core tool surface (pipeline + registry), the in-process
//! module services (communications queue, audio sync, hardware bridge),
//! the discovery bridges, and the three UI adapters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use servis_audio::{PositionSource, SyncConfig, SyncEngine};
use servis_comms::{Channel, LoggingProvider, MessageQueueManager, ProviderRegistry, QueueConfig};
use servis_hardware::GpioClient;
use servis_orchestrator::{
    observability, AuthVerifier, CommandProcessor, HttpAuthClient, IntentClassifier, LocalCaller,
    OrchestratorConfig, ServiceRouter, SessionManager,
};
use servis_registry::mdns::MdnsBrowser;
use servis_registry::mqtt::MqttBridge;
use servis_registry::{NewService, ServiceRegistry};
use servis_rpc::transport::{http, ws};
use servis_rpc::ToolServer;
use servis_ui::{MobileAdapter, TextAdapter, UiAdapter, WebAdapter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local services hosted by this process, with their advertised
/// capabilities. The full audio assistant and the other platform modules
/// are external peers; only the sync engine runs in-process.
const LOCAL_SERVICES: [(&str, &[&str]); 4] = [
    ("ai-servis-core", &["process_command", "analyze_intent"]),
    ("ai-communications", &["send_message", "message_queue"]),
    ("audio-sync", &["sync"]),
    ("hardware-bridge", &["gpio"]),
];

#[derive(Debug, Parser)]
#[command(name = "servis-orchestrator", version, about = "servis core orchestrator")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Disable the mDNS discovery bridge.
    #[arg(long)]
    no_mdns: bool,
    /// Disable the MQTT discovery bridge.
    #[arg(long)]
    no_mqtt: bool,
}

/// Playback positions are pushed by zone players once they attach; until
/// then every read is absent and the sync engine idles.
struct IdlePositions;

#[async_trait]
impl PositionSource for IdlePositions {
    async fn zone_position(&self, _zone_id: &str) -> Option<f64> {
        None
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();
    let args = Args::parse();
    let config = OrchestratorConfig::load(args.config.as_deref());

    // Service registry and its discovery bridges.
    let registry = Arc::new(ServiceRegistry::default());
    let _eviction = registry.spawn_eviction_loop();
    let registry_config = registry.config();
    let _mdns = if registry_config.enable_mdns && !args.no_mdns {
        match MdnsBrowser::start(registry.clone()) {
            Ok(browser) => Some(browser),
            Err(err) => {
                warn!(%err, "mdns discovery unavailable");
                None
            }
        }
    } else {
        None
    };
    let _mqtt = if registry_config.enable_mqtt && !args.no_mqtt {
        match MqttBridge::start(registry.clone()).await {
            Ok(bridge) => Some(bridge),
            Err(err) => {
                warn!(%err, "mqtt bridge unavailable");
                None
            }
        }
    } else {
        None
    };

    // In-process module services share one tool server.
    let mut module_server = ToolServer::new("ai-servis-modules", VERSION);

    let mut providers = ProviderRegistry::new();
    for channel in Channel::ALL {
        providers.register(Arc::new(LoggingProvider::new(channel)));
    }
    let queue_manager = Arc::new(MessageQueueManager::new(QueueConfig::default(), providers));
    let _queue_loop = queue_manager.start();
    servis_comms::tools::register_tools(&mut module_server, queue_manager.clone())
        .map_err(|err| anyhow::anyhow!("comms tools: {err}"))?;

    let sync_engine = Arc::new(SyncEngine::new(SyncConfig::default(), Arc::new(IdlePositions)));
    let _sync_loop = sync_engine.start();
    servis_audio::tools::register_tools(&mut module_server, sync_engine.clone())
        .map_err(|err| anyhow::anyhow!("audio tools: {err}"))?;

    let gpio = Arc::new(GpioClient::new(config.gpio_addr.clone()));
    servis_hardware::tools::register_tools(&mut module_server, gpio)
        .map_err(|err| anyhow::anyhow!("hardware tools: {err}"))?;
    let module_server = Arc::new(module_server);

    // Router resolves local services in-process, remote ones via registry.
    let router = Arc::new(ServiceRouter::new(registry.clone()));
    let local_modules: Arc<LocalCaller> = Arc::new(LocalCaller::new(module_server));
    for (name, capabilities) in LOCAL_SERVICES {
        if name != "ai-servis-core" {
            router.register_local(name, local_modules.clone());
        }
        let registration = registry.register(NewService {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            service_type: Default::default(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            health_endpoint: None,
            metadata: Default::default(),
        });
        if let Err(err) = registration {
            warn!(%err, service = name, "local service registration failed");
        }
    }

    // The pipeline.
    let sessions = Arc::new(SessionManager::new(config.session_ttl));
    let _session_sweep = sessions.spawn_sweep(config.session_sweep_interval);
    let classifier = Arc::new(IntentClassifier::new(Some(config.model_path.clone())));
    let auth: Option<Arc<dyn AuthVerifier>> = config
        .auth_url
        .as_ref()
        .map(|url| Arc::new(HttpAuthClient::new(url.clone())) as Arc<dyn AuthVerifier>);
    let processor = Arc::new(CommandProcessor::new(
        config.pipeline.clone(),
        classifier,
        router.clone(),
        sessions,
        auth,
    ));
    processor.start();

    // Core tool surface: orchestrator tools plus the registry tools.
    let mut core_server = ToolServer::new("ai-servis-core", VERSION);
    servis_orchestrator::tools::register_tools(&mut core_server, processor.clone())
        .map_err(|err| anyhow::anyhow!("orchestrator tools: {err}"))?;
    servis_registry::tools::register_tools(&mut core_server, registry.clone())
        .map_err(|err| anyhow::anyhow!("registry tools: {err}"))?;
    let core_server = Arc::new(core_server);

    let ws_listener = TcpListener::bind(&config.ws_addr).await?;
    tokio::spawn(ws::serve(ws_listener, core_server.clone()));
    let http_listener = TcpListener::bind(&config.http_addr).await?;
    tokio::spawn(http::serve(http_listener, core_server.clone()));

    // UI adapters talk to the core surface in-process.
    let ui_caller = Arc::new(LocalCaller::new(core_server.clone()));
    let web = Arc::new(WebAdapter::new(config.web_ui_addr.clone(), ui_caller.clone()));
    web.start().await.map_err(|err| anyhow::anyhow!("{err}"))?;
    let text = Arc::new(TextAdapter::new(config.text_ui_addr.clone(), ui_caller.clone()));
    text.start().await.map_err(|err| anyhow::anyhow!("{err}"))?;
    let mobile = Arc::new(MobileAdapter::new(config.mobile_ui_addr.clone(), ui_caller));
    mobile.start().await.map_err(|err| anyhow::anyhow!("{err}"))?;

    // Sync corrections reach web clients as push events.
    {
        let mut corrections = sync_engine.corrections();
        let web = web.clone();
        tokio::spawn(async move {
            while let Ok(event) = corrections.recv().await {
                if let Ok(frame) = serde_json::to_string(&event) {
                    web.broadcast_message(&frame).await;
                }
            }
        });
    }

    // Keep the local registrations alive.
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                for (name, _) in LOCAL_SERVICES {
                    let _ = registry.heartbeat(name);
                }
            }
        });
    }

    info!(
        ws = %config.ws_addr,
        http = %config.http_addr,
        web = %config.web_ui_addr,
        "servis orchestrator started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    processor.stop();
    queue_manager.stop();
    sync_engine.stop();
    web.stop().await;
    text.stop().await;
    mobile.stop().await;
    Ok(())
}
