//! HTTP transport: the request envelope is the request body, the response
//! envelope the response body. Status is 200 for any reply envelope,
//! including errors; notifications yield 204 as nothing is sent back.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::info;

use crate::envelope::Envelope;
use crate::server::ToolServer;

/// Router exposing the server on `POST /rpc`.
pub fn router(server: Arc<ToolServer>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .with_state(server)
}

/// Serve the HTTP endpoint on its own listener.
pub async fn serve(listener: TcpListener, server: Arc<ToolServer>) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), server = server.name(), "http transport listening");
    axum::serve(listener, router(server)).await
}

async fn handle_rpc(
    State(server): State<Arc<ToolServer>>,
    Json(env): Json<Envelope>,
) -> Response {
    match server.dispatch(env).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
