//! Web adapter: HTTP for one-shot commands, WebSocket for streaming, and
//! a broadcast that reaches every active socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};
use uuid::Uuid;

use servis_rpc::ServiceCaller;

use crate::adapter::{AdapterStats, CommandMessage, ConnectionInfo, StatsSnapshot, UiAdapter, UiError};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

struct Connection {
    info: ConnectionInfo,
    out: mpsc::Sender<String>,
}

#[derive(Clone)]
struct WebState {
    orchestrator: Arc<dyn ServiceCaller>,
    connections: Arc<Mutex<HashMap<String, Connection>>>,
    stats: Arc<AdapterStats>,
}

pub struct WebAdapter {
    addr: String,
    state: WebState,
    cancel: CancellationToken,
}

impl WebAdapter {
    pub fn new(addr: impl Into<String>, orchestrator: Arc<dyn ServiceCaller>) -> Self {
        Self {
            addr: addr.into(),
            state: WebState {
                orchestrator,
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

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/command", post(handle_command))
            .route("/api/health", get(handle_health))
            .route("/ws", get(handle_upgrade))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }
}

async fn handle_command(
    State(state): State<WebState>,
    Json(mut message): Json<CommandMessage>,
) -> impl IntoResponse {
    state.stats.message_in();
    if message.interface_type.is_empty() {
        message.interface_type = "web".to_string();
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

async fn handle_health(State(state): State<WebState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "stats": state.stats.snapshot()}))
}

async fn handle_upgrade(State(state): State<WebState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: WebState) {
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
    debug!(connection = %connection_id, "web socket opened");

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
        // A frame is either a full CommandMessage or bare command text.
        let mut command = serde_json::from_str::<CommandMessage>(text.as_str())
            .unwrap_or_else(|_| CommandMessage::new(text.as_str(), "web"));
        if command.interface_type.is_empty() {
            command.interface_type = "web".to_string();
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
    debug!(connection = %connection_id, "web socket closed");
}

#[async_trait]
impl UiAdapter for WebAdapter {
    fn name(&self) -> &str {
        "web"
    }

    async fn start(&self) -> Result<(), UiError> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|err| UiError::Bind(format!("{}: {err}", self.addr)))?;
        info!(addr = %self.addr, "web adapter listening");
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
