//! Mobile adapter: REST endpoints plus a WebSocket for live updates.
//!
//! Devices register before use; requests lacking `X-Device-ID` are
//! rejected, except registration and health.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use servis_rpc::ServiceCaller;

use crate::adapter::{AdapterStats, CommandMessage, ConnectionInfo, StatsSnapshot, UiAdapter, UiError};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RegisterDevice {
    device_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct UnregisterDevice {
    device_id: String,
}

#[derive(Debug, Deserialize)]
struct PushToken {
    device_id: String,
    push_token: String,
}

struct Connection {
    info: ConnectionInfo,
    out: mpsc::Sender<String>,
}

#[derive(Clone)]
struct MobileState {
    orchestrator: Arc<dyn ServiceCaller>,
    devices: Arc<Mutex<HashMap<String, DeviceInfo>>>,
    connections: Arc<Mutex<HashMap<String, Connection>>>,
    stats: Arc<AdapterStats>,
}

pub struct MobileAdapter {
    addr: String,
    state: MobileState,
    cancel: CancellationToken,
}

impl MobileAdapter {
    pub fn new(addr: impl Into<String>, orchestrator: Arc<dyn ServiceCaller>) -> Self {
        Self {
            addr: addr.into(),
            state: MobileState {
                orchestrator,
                devices: Arc::new(Mutex::new(HashMap::new())),
                connections: Arc::new(Mutex::new(HashMap::new())),
                stats: Arc::new(AdapterStats::default()),
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Snapshot of the active connections.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.state
            .connections
            .lock()
            .expect("connections lock")
            .values()
            .map(|c| c.info.clone())
            .collect()
    }

    /// Registered devices.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.state
            .devices
            .lock()
            .expect("devices lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/command", post(handle_command))
            .route("/api/unregister", post(handle_unregister))
            .route("/api/push_token", post(handle_push_token))
            .route("/ws", get(handle_upgrade))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_device,
            ))
            // Registration and health stay reachable without a device id.
            .route("/api/register", post(handle_register))
            .route("/api/health", get(handle_health))
            .with_state(self.state.clone())
    }
}

/// Auth middleware: the device must exist and name itself in X-Device-ID.
async fn require_device(
    State(state): State<MobileState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let device_id = request
        .headers()
        .get("X-Device-ID")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    match device_id {
        Some(id) if state.devices.lock().expect("devices lock").contains_key(&id) => {
            next.run(request).await
        }
        Some(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unknown device"})),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing X-Device-ID header"})),
        )
            .into_response(),
    }
}

async fn handle_register(
    State(state): State<MobileState>,
    Json(body): Json<RegisterDevice>,
) -> impl IntoResponse {
    let device = DeviceInfo {
        device_id: body.device_id.clone(),
        user_id: body.user_id,
        push_token: None,
        registered_at: Utc::now(),
    };
    info!(device = %device.device_id, user = %device.user_id, "mobile device registered");
    state
        .devices
        .lock()
        .expect("devices lock")
        .insert(body.device_id, device.clone());
    Json(json!({"registered": true, "device": device}))
}

async fn handle_unregister(
    State(state): State<MobileState>,
    Json(body): Json<UnregisterDevice>,
) -> impl IntoResponse {
    let removed = state
        .devices
        .lock()
        .expect("devices lock")
        .remove(&body.device_id)
        .is_some();
    Json(json!({"removed": removed}))
}

async fn handle_push_token(
    State(state): State<MobileState>,
    Json(body): Json<PushToken>,
) -> impl IntoResponse {
    let mut devices = state.devices.lock().expect("devices lock");
    match devices.get_mut(&body.device_id) {
        Some(device) => {
            device.push_token = Some(body.push_token);
            Json(json!({"updated": true})).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown device"})),
        )
            .into_response(),
    }
}

async fn handle_command(
    State(state): State<MobileState>,
    Json(mut message): Json<CommandMessage>,
) -> impl IntoResponse {
    state.stats.message_in();
    if message.interface_type.is_empty() {
        message.interface_type = "mobile".to_string();
    }
    let reply = state
        .orchestrator
        .call_tool("process_command", message.to_params(), COMMAND_TIMEOUT)
        .await;
    state.stats.message_out();
    match reply {
        Ok(result) => Json(result),
        Err(err) => {
            state.stats.error();
            Json(json!({"success": false, "response": err.to_string()}))
        }
    }
}

async fn handle_health(State(state): State<MobileState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "devices": state.devices.lock().expect("devices lock").len(),
        "stats": state.stats.snapshot(),
    }))
}

async fn handle_upgrade(State(state): State<MobileState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: MobileState) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(32);

    {
        let mut connections = state.connections.lock().expect("connections lock");
        connections.insert(
            connection_id.clone(),
            Connection {
                info: ConnectionInfo::new(connection_id.clone()),
                out: out_tx.clone(),
            },
        );
    }
    state.stats.connection_opened();
    debug!(connection = %connection_id, "mobile socket opened");

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        state.stats.message_in();
        let mut command = serde_json::from_str::<CommandMessage>(text.as_str())
            .unwrap_or_else(|_| CommandMessage::new(text.as_str(), "mobile"));
        if command.interface_type.is_empty() {
            command.interface_type = "mobile".to_string();
        }
        let reply = state
            .orchestrator
            .call_tool("process_command", command.to_params(), COMMAND_TIMEOUT)
            .await;
        let frame = match reply {
            Ok(result) => result.to_string(),
            Err(err) => {
                state.stats.error();
                json!({"success": false, "response": err.to_string()}).to_string()
            }
        };
        state.stats.message_out();
        if out_tx.send(frame).await.is_err() {
            break;
        }
    }

    state
        .connections
        .lock()
        .expect("connections lock")
        .remove(&connection_id);
    state.stats.connection_closed();
    drop(out_tx);
    let _ = writer.await;
}

#[async_trait]
impl UiAdapter for MobileAdapter {
    fn name(&self) -> &str {
        "mobile"
    }

    async fn start(&self) -> Result<(), UiError> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|err| UiError::Bind(format!("{}: {err}", self.addr)))?;
        info!(addr = %self.addr, "mobile adapter listening");
        let router = self.router();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = async move { axum::serve(listener, router).await } => {}
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }

    async fn send_message(&self, message: &str, connection_id: Option<&str>) -> Result<(), UiError> {
        let target = {
            let connections = self.state.connections.lock().expect("connections lock");
            match connection_id {
                Some(id) => connections
                    .get(id)
                    .map(|c| c.out.clone())
                    .ok_or_else(|| UiError::ConnectionNotFound(id.to_string()))?,
                None => connections
                    .values()
                    .next()
                    .map(|c| c.out.clone())
                    .ok_or_else(|| UiError::ConnectionNotFound("<any>".to_string()))?,
            }
        };
        target
            .send(message.to_string())
            .await
            .map_err(|err| UiError::Delivery(err.to_string()))?;
        self.state.stats.message_out();
        Ok(())
    }

    async fn broadcast_message(&self, message: &str) -> usize {
        let targets: Vec<mpsc::Sender<String>> = {
            let connections = self.state.connections.lock().expect("connections lock");
            connections.values().map(|c| c.out.clone()).collect()
        };
        let mut delivered = 0;
        for target in targets {
            if target.send(message.to_string()).await.is_ok() {
                delivered += 1;
                self.state.stats.message_out();
            }
        }
        delivered
    }

    fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }
}
