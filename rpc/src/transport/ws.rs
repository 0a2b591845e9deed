//! WebSocket transport: one envelope per UTF-8 text frame.
//!
//! Responses are keyed by id and may arrive out of order; either side may
//! push notifications. Reconnect is the client's responsibility.

use std::sync::Arc;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

use crate::client::RpcClient;
use crate::envelope;
use crate::error::RpcError;
use crate::server::ToolServer;
use crate::DEFAULT_CALL_TIMEOUT;

/// Router exposing the server on `GET /ws`.
pub fn router(server: Arc<ToolServer>) -> Router {
    Router::new()
        .route("/ws", get(upgrade_handler))
        .with_state(server)
}

/// Serve the WebSocket endpoint on its own listener.
pub async fn serve(listener: TcpListener, server: Arc<ToolServer>) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), server = server.name(), "websocket transport listening");
    axum::serve(listener, router(server)).await
}

async fn upgrade_handler(
    State(server): State<Arc<ToolServer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, server))
}

async fn serve_socket(socket: WebSocket, server: Arc<ToolServer>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(AxumMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            AxumMessage::Text(text) => text,
            AxumMessage::Close(_) => break,
            _ => continue,
        };
        let env = match envelope::decode(text.as_str()) {
            Ok(env) => env,
            Err(err) => {
                debug!(%err, "undecodable websocket frame skipped");
                continue;
            }
        };
        let server = server.clone();
        let out = out_tx.clone();
        tokio::spawn(async move {
            if let Some(reply) = server.dispatch(env).await {
                if let Ok(frame) = envelope::encode(&reply) {
                    let _ = out.send(frame).await;
                }
            }
        });
    }

    drop(out_tx);
    let _ = writer.await;
}

/// Connect a client to a WebSocket endpoint (`ws://host:port/ws`).
pub async fn connect(url: &str) -> Result<RpcClient, RpcError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| RpcError::Connect(format!("{url}: {err}")))?;
    let (mut sink, mut stream) = ws.split();

    let (writer_tx, mut writer_rx) = mpsc::channel::<String>(64);
    let client = RpcClient::new(writer_tx, DEFAULT_CALL_TIMEOUT);

    tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if sink.send(WsMessage::text(frame)).await.is_err() {
                break;
            }
        }
    });

    let reader_client = client.clone();
    tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                WsMessage::Text(text) => {
                    if let Ok(env) = envelope::decode(text.as_str()) {
                        reader_client.route_incoming(env).await;
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        reader_client.fail_pending().await;
    });

    Ok(client)
}
