//! Orchestrator configuration: optional TOML file, env overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::pipeline::PipelineConfig;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// WebSocket RPC endpoint for module connections.
    pub ws_addr: String,
    /// HTTP RPC endpoint.
    pub http_addr: String,
    /// Web UI adapter endpoint.
    pub web_ui_addr: String,
    /// Text/CLI adapter endpoint.
    pub text_ui_addr: String,
    /// Mobile adapter endpoint.
    pub mobile_ui_addr: String,
    /// GPIO daemon endpoint.
    pub gpio_addr: String,
    /// External auth service base URL; anonymous-only when absent.
    pub auth_url: Option<String>,
    /// Persisted classifier model location.
    pub model_path: PathBuf,
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
    pub pipeline: PipelineConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ws_addr: "0.0.0.0:8090".to_string(),
            http_addr: "0.0.0.0:8080".to_string(),
            web_ui_addr: "0.0.0.0:8088".to_string(),
            text_ui_addr: "0.0.0.0:8087".to_string(),
            mobile_ui_addr: "0.0.0.0:8089".to_string(),
            gpio_addr: "127.0.0.1:8081".to_string(),
            auth_url: None,
            model_path: PathBuf::from("models/intent_classifier.json"),
            session_ttl: Duration::from_secs(3600),
            session_sweep_interval: Duration::from_secs(300),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// The subset of keys a deployment may pin in its TOML file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    ws_addr: Option<String>,
    http_addr: Option<String>,
    web_ui_addr: Option<String>,
    text_ui_addr: Option<String>,
    mobile_ui_addr: Option<String>,
    gpio_addr: Option<String>,
    auth_url: Option<String>,
    model_path: Option<PathBuf>,
    session_ttl_seconds: Option<u64>,
    command_timeout_seconds: Option<u64>,
    max_queue_size: Option<usize>,
    worker_count: Option<usize>,
    cache_ttl_seconds: Option<u64>,
}

impl OrchestratorConfig {
    /// Defaults, then the config file if present, then env overrides.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = Self::default();
        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(raw) => match toml::from_str::<FileConfig>(&raw) {
                    Ok(file) => config.apply_file(file),
                    Err(err) => warn!(%err, path = %path.display(), "config file unusable, using defaults"),
                },
                Err(err) => warn!(%err, path = %path.display(), "config file unreadable, using defaults"),
            }
        }
        config.apply_env();
        config
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.ws_addr {
            self.ws_addr = v;
        }
        if let Some(v) = file.http_addr {
            self.http_addr = v;
        }
        if let Some(v) = file.web_ui_addr {
            self.web_ui_addr = v;
        }
        if let Some(v) = file.text_ui_addr {
            self.text_ui_addr = v;
        }
        if let Some(v) = file.mobile_ui_addr {
            self.mobile_ui_addr = v;
        }
        if let Some(v) = file.gpio_addr {
            self.gpio_addr = v;
        }
        if let Some(v) = file.auth_url {
            self.auth_url = Some(v);
        }
        if let Some(v) = file.model_path {
            self.model_path = v;
        }
        if let Some(v) = file.session_ttl_seconds {
            self.session_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.command_timeout_seconds {
            self.pipeline.default_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.max_queue_size {
            self.pipeline.max_queue_size = v;
        }
        if let Some(v) = file.worker_count {
            self.pipeline.worker_count = v;
        }
        if let Some(v) = file.cache_ttl_seconds {
            self.pipeline.cache_ttl = Duration::from_secs(v);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SERVIS_WS_ADDR") {
            self.ws_addr = v;
        }
        if let Ok(v) = std::env::var("SERVIS_HTTP_ADDR") {
            self.http_addr = v;
        }
        if let Ok(v) = std::env::var("SERVIS_GPIO_ADDR") {
            self.gpio_addr = v;
        }
        if let Ok(v) = std::env::var("SERVIS_AUTH_URL") {
            self.auth_url = Some(v);
        }
        if let Ok(v) = std::env::var("SERVIS_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = env_u64("SERVIS_SESSION_TTL_SECONDS") {
            self.session_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("SERVIS_COMMAND_TIMEOUT_SECONDS") {
            self.pipeline.default_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("SERVIS_WORKER_COUNT") {
            self.pipeline.worker_count = v as usize;
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.pipeline.default_timeout, Duration::from_secs(30));
        assert_eq!(config.pipeline.worker_count, 10);
        assert_eq!(config.pipeline.max_queue_size, 10_000);
        assert_eq!(config.gpio_addr, "127.0.0.1:8081");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servis.toml");
        std::fs::write(
            &path,
            "worker_count = 4\ncommand_timeout_seconds = 5\ngpio_addr = \"10.0.0.9:8081\"\n",
        )
        .unwrap();
        let config = OrchestratorConfig::load(Some(&path));
        assert_eq!(config.pipeline.worker_count, 4);
        assert_eq!(config.pipeline.default_timeout, Duration::from_secs(5));
        assert_eq!(config.gpio_addr, "10.0.0.9:8081");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = OrchestratorConfig::load(Some(Path::new("/nonexistent/servis.toml")));
        assert_eq!(config.pipeline.worker_count, 10);
    }
}
