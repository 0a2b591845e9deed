//! RPC client runtime.
//!
//! A connected client (WebSocket or line transport) keeps a pending-request
//! map keyed by envelope id; a reader task resolves entries as responses
//! arrive, out of order. Notifications and events are fanned out on a
//! broadcast channel. The HTTP client is stateless: one request envelope,
//! one response body.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time;
use tracing::debug;

use crate::envelope::{self, Envelope, EnvelopeKind};
use crate::error::RpcError;
use crate::DEFAULT_CALL_TIMEOUT;

/// Anything the orchestrator can dispatch a tool call through.
#[async_trait]
pub trait ServiceCaller: Send + Sync {
    async fn call_tool(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError>;
}

#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    seq: AtomicU64,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
    writer: mpsc::Sender<String>,
    notices: broadcast::Sender<Envelope>,
    default_timeout: Duration,
}

impl RpcClient {
    /// Build a client over an already-connected transport. The transport
    /// owns the socket: it drains `writer_rx` onto the wire and feeds every
    /// inbound envelope back through [`RpcClient::route_incoming`].
    pub(crate) fn new(writer: mpsc::Sender<String>, default_timeout: Duration) -> Self {
        let (notices, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ClientInner {
                seq: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                writer,
                notices,
                default_timeout,
            }),
        }
    }

    fn next_id(&self) -> String {
        format!("c-{}", self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Call a tool with the default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_with_timeout(method, params, self.inner.default_timeout)
            .await
    }

    /// Call a tool, awaiting the matching response until `timeout`.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id();
        let env = Envelope::request(id.clone(), method, params);
        let frame = envelope::encode(&env)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id.clone(), tx);

        if self.inner.writer.send(frame).await.is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(RpcError::TransportClosed);
        }

        match time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => match resp.error {
                Some(err) => Err(RpcError::remote(err.code, err.message)),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            },
            Ok(Err(_cancelled)) => Err(RpcError::TransportClosed),
            Err(_elapsed) => {
                self.inner.pending.lock().await.remove(&id);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Send a notification; no reply is expected.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let frame = envelope::encode(&Envelope::notification(method, params))?;
        self.inner
            .writer
            .send(frame)
            .await
            .map_err(|_| RpcError::TransportClosed)
    }

    /// Subscribe to notifications and events pushed by the peer.
    pub fn notifications(&self) -> broadcast::Receiver<Envelope> {
        self.inner.notices.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.writer.is_closed()
    }

    /// Route one inbound envelope from the transport reader.
    pub(crate) async fn route_incoming(&self, env: Envelope) {
        match env.kind {
            EnvelopeKind::Response => {
                if let Some(id) = env.id.clone() {
                    let mut pending = self.inner.pending.lock().await;
                    if let Some(tx) = pending.remove(&id) {
                        let _ = tx.send(env);
                    } else {
                        debug!(%id, "response with no pending request");
                    }
                }
            }
            EnvelopeKind::Notification | EnvelopeKind::Event => {
                let _ = self.inner.notices.send(env);
            }
            EnvelopeKind::Request => {
                debug!("peer-initiated request ignored by client");
            }
        }
    }

    /// Complete every pending call with `transport_closed`. Called by the
    /// transport when its reader ends.
    pub(crate) async fn fail_pending(&self) {
        let mut pending = self.inner.pending.lock().await;
        for (_, tx) in pending.drain() {
            // Dropping the sender cancels the oneshot, which the caller
            // reports uniformly as a closed transport.
            drop(tx);
        }
    }
}

#[async_trait]
impl ServiceCaller for RpcClient {
    async fn call_tool(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.call_with_timeout(method, params, timeout).await
    }
}

/// Stateless HTTP client: the request envelope is the request body and the
/// response envelope is the response body, status 200 either way.
#[derive(Clone)]
pub struct HttpRpcClient {
    http: reqwest::Client,
    endpoint: String,
    seq: Arc<AtomicU64>,
}

impl HttpRpcClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_tool(method, params, DEFAULT_CALL_TIMEOUT).await
    }
}

#[async_trait]
impl ServiceCaller for HttpRpcClient {
    async fn call_tool(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = format!("h-{}", self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        let env = Envelope::request(id, method, params);
        let resp: Envelope = self
            .http
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&env)
            .send()
            .await?
            .json()
            .await?;
        match resp.error {
            Some(err) => Err(RpcError::remote(err.code, err.message)),
            None => Ok(resp.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached_client() -> (RpcClient, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (RpcClient::new(tx, Duration::from_millis(200)), rx)
    }

    #[tokio::test]
    async fn ids_are_monotonically_increasing() {
        let (client, _rx) = detached_client();
        assert_eq!(client.next_id(), "c-1");
        assert_eq!(client.next_id(), "c-2");
        assert_eq!(client.next_id(), "c-3");
    }

    #[tokio::test]
    async fn call_times_out_and_clears_the_pending_entry() {
        let (client, mut rx) = detached_client();
        let err = client
            .call_with_timeout("ping", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout));
        // The frame was written even though no response came back.
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"ping\""));
        assert!(client.inner.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn out_of_order_responses_resolve_by_id() {
        let (client, mut rx) = detached_client();
        let c1 = client.clone();
        let first = tokio::spawn(async move { c1.call("a", json!({})).await });
        let c2 = client.clone();
        let second = tokio::spawn(async move { c2.call("b", json!({})).await });

        // Wait for both frames, then answer in reverse arrival order,
        // tagging each reply with the method that requested it.
        for _ in 0..2 {
            let frame = envelope::decode(&rx.recv().await.unwrap()).unwrap();
            let method = frame.method.unwrap();
            client
                .route_incoming(Envelope::response(frame.id.unwrap(), json!({"method": method})))
                .await;
        }

        assert_eq!(first.await.unwrap().unwrap(), json!({"method": "a"}));
        assert_eq!(second.await.unwrap().unwrap(), json!({"method": "b"}));
    }

    #[tokio::test]
    async fn disconnect_fails_every_pending_call() {
        let (client, mut rx) = detached_client();
        let c1 = client.clone();
        let call = tokio::spawn(async move { c1.call("slow", json!({})).await });
        let _ = rx.recv().await;
        client.fail_pending().await;
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));
    }

    #[tokio::test]
    async fn error_responses_surface_the_remote_code() {
        let (client, mut rx) = detached_client();
        let c1 = client.clone();
        let call = tokio::spawn(async move { c1.call("x", json!({})).await });
        let frame = rx.recv().await.unwrap();
        let id = envelope::decode(&frame).unwrap().id.unwrap();
        client
            .route_incoming(Envelope::error_response(
                id,
                crate::ErrorCode::NotFound,
                "missing",
            ))
            .await;
        match call.await.unwrap().unwrap_err() {
            RpcError::Remote { code, message } => {
                assert_eq!(code, crate::ErrorCode::NotFound);
                assert_eq!(message, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
