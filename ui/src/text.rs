//! Text/CLI adapter: a TCP line endpoint. One command per line, the
//! response (or error) printed back on its own line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use servis_rpc::ServiceCaller;

use crate::adapter::{AdapterStats, CommandMessage, ConnectionInfo, StatsSnapshot, UiAdapter, UiError};

const PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

struct Connection {
    info: ConnectionInfo,
    out: mpsc::Sender<String>,
}

pub struct TextAdapter {
    addr: String,
    orchestrator: Arc<dyn ServiceCaller>,
    connections: Arc<Mutex<HashMap<String, Connection>>>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
}

impl TextAdapter {
    pub fn new(addr: impl Into<String>, orchestrator: Arc<dyn ServiceCaller>) -> Self {
        Self {
            addr: addr.into(),
            orchestrator,
            connections: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(AdapterStats::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Snapshot of the active connections.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .lock()
            .expect("connections lock")
            .values()
            .map(|c| c.info.clone())
            .collect()
    }

    async fn serve_connection(
        stream: TcpStream,
        orchestrator: Arc<dyn ServiceCaller>,
        connections: Arc<Mutex<HashMap<String, Connection>>>,
        stats: Arc<AdapterStats>,
    ) {
        let connection_id = Uuid::new_v4().to_string();
        let framed = Framed::new(stream, LinesCodec::new());
        let (mut sink, mut lines) = framed.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(32);

        {
            let mut map = connections.lock().expect("connections lock");
            map.insert(
                connection_id.clone(),
                Connection {
                    info: ConnectionInfo::new(connection_id.clone()),
                    out: out_tx.clone(),
                },
            );
        }
        stats.connection_opened();
        debug!(connection = %connection_id, "text connection opened");

        let writer = tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if sink.send(line).await.is_err() {
                    break;
                }
            }
        });

        // A session persists across lines on the same connection.
        let mut session_id: Option<String> = None;
        while let Some(Ok(line)) = lines.next().await {
            let text = line.trim().to_string();
            if text.is_empty() {
                continue;
            }
            if text == "quit" || text == "exit" {
                break;
            }
            stats.message_in();
            let mut message = CommandMessage::new(text, "text");
            message.session_id = session_id.clone();
            let reply = orchestrator
                .call_tool("process_command", message.to_params(), PROMPT_TIMEOUT)
                .await;
            let line = match reply {
                Ok(result) => {
                    if let Some(sid) = result
                        .get("data")
                        .and_then(|d| d.get("session_id"))
                        .and_then(Value::as_str)
                    {
                        session_id = Some(sid.to_string());
                    }
                    result
                        .get("response")
                        .and_then(Value::as_str)
                        .unwrap_or("(no response)")
                        .to_string()
                }
                Err(err) => {
                    stats.error();
                    format!("error: {err}")
                }
            };
            stats.message_out();
            if out_tx.send(line).await.is_err() {
                break;
            }
        }

        connections
            .lock()
            .expect("connections lock")
            .remove(&connection_id);
        stats.connection_closed();
        drop(out_tx);
        let _ = writer.await;
        debug!(connection = %connection_id, "text connection closed");
    }
}

#[async_trait]
impl UiAdapter for TextAdapter {
    fn name(&self) -> &str {
        "text"
    }

    async fn start(&self) -> Result<(), UiError> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|err| UiError::Bind(format!("{}: {err}", self.addr)))?;
        info!(addr = %self.addr, "text adapter listening");

        let orchestrator = self.orchestrator.clone();
        let connections = self.connections.clone();
        let stats = self.stats.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(Self::serve_connection(
                            stream,
                            orchestrator.clone(),
                            connections.clone(),
                            stats.clone(),
                        ));
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }

    async fn send_message(&self, message: &str, connection_id: Option<&str>) -> Result<(), UiError> {
        let target = {
            let connections = self.connections.lock().expect("connections lock");
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
        self.stats.message_out();
        Ok(())
    }

    async fn broadcast_message(&self, message: &str) -> usize {
        let targets: Vec<mpsc::Sender<String>> = {
            let connections = self.connections.lock().expect("connections lock");
            connections.values().map(|c| c.out.clone()).collect()
        };
        let mut delivered = 0;
        for target in targets {
            if target.send(message.to_string()).await.is_ok() {
                delivered += 1;
                self.stats.message_out();
            } else {
                warn!("text broadcast hit a dead connection");
            }
        }
        delivered
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
