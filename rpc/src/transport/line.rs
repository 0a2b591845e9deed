//! Line-delimited JSON transport: one envelope per newline-terminated line.
//!
//! Used for the GPIO daemon and for process-to-process bridges, and as the
//! stdio carrier when a service is driven by a parent process.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::client::RpcClient;
use crate::envelope;
use crate::error::RpcError;
use crate::server::ToolServer;
use crate::DEFAULT_CALL_TIMEOUT;

/// Accept loop: every connection is served until its peer disconnects.
pub async fn serve(listener: TcpListener, server: Arc<ToolServer>) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), server = server.name(), "line transport listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "line connection accepted");
        let server = server.clone();
        tokio::spawn(async move {
            serve_connection(stream, server).await;
            debug!(%peer, "line connection closed");
        });
    }
}

async fn serve_connection(stream: TcpStream, server: Arc<ToolServer>) {
    let framed = Framed::new(stream, LinesCodec::new());
    let (mut sink, mut lines) = framed.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "line read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let env = match envelope::decode(&line) {
            Ok(env) => env,
            Err(err) => {
                debug!(%err, "undecodable line skipped");
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

/// Connect a client over a line-delimited TCP socket.
pub async fn connect(addr: &str) -> Result<RpcClient, RpcError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|err| RpcError::Connect(format!("{addr}: {err}")))?;
    let framed = Framed::new(stream, LinesCodec::new());
    let (mut sink, mut lines) = framed.split();

    let (writer_tx, mut writer_rx) = mpsc::channel::<String>(64);
    let client = RpcClient::new(writer_tx, DEFAULT_CALL_TIMEOUT);

    tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let reader_client = client.clone();
    tokio::spawn(async move {
        while let Some(Ok(line)) = lines.next().await {
            if let Ok(env) = envelope::decode(&line) {
                reader_client.route_incoming(env).await;
            }
        }
        reader_client.fail_pending().await;
    });

    Ok(client)
}

/// Serve the envelope protocol over stdin/stdout. Logging must go to stderr
/// so frames on stdout stay clean.
pub async fn serve_stdio(server: Arc<ToolServer>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(env) = envelope::decode(&line) else {
            debug!("undecodable stdio line skipped");
            continue;
        };
        if let Some(reply) = server.dispatch(env).await {
            let frame = envelope::encode(&reply).map_err(std::io::Error::other)?;
            stdout.write_all(frame.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
