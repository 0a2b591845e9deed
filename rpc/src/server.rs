//! Tool server runtime: dispatches incoming envelopes to registered tools.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::envelope::{Envelope, EnvelopeKind, ErrorCode};
use crate::schema;
use crate::tool::{Tool, ToolError, ToolRegistry};
use crate::DEFAULT_HANDLER_CONCURRENCY;

/// A server owns a tool registry and a cap on concurrently running
/// handlers. Excess requests wait on the semaphore in FIFO order.
pub struct ToolServer {
    name: String,
    version: String,
    tools: ToolRegistry,
    limiter: Arc<Semaphore>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_concurrency(name, version, DEFAULT_HANDLER_CONCURRENCY)
    }

    pub fn with_concurrency(
        name: impl Into<String>,
        version: impl Into<String>,
        max_concurrent_handlers: usize,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: ToolRegistry::new(),
            limiter: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), ToolError> {
        self.tools.register(tool)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    /// Handle one incoming envelope. Requests produce exactly one reply;
    /// notifications run their handler without one; responses and events
    /// addressed to a server are ignored.
    pub async fn dispatch(&self, env: Envelope) -> Option<Envelope> {
        match env.kind {
            EnvelopeKind::Request => {
                let Some(id) = env.id else {
                    warn!(server = %self.name, "request without id dropped");
                    return None;
                };
                let Some(method) = env.method else {
                    return Some(Envelope::error_response(
                        id,
                        ErrorCode::MethodNotFound,
                        "request carries no method",
                    ));
                };
                Some(self.invoke(id, &method, env.params).await)
            }
            EnvelopeKind::Notification => {
                if let Some(method) = env.method {
                    if let Some(tool) = self.tools.get(&method) {
                        match schema::check_params(env.params.as_ref(), &tool.input_schema) {
                            Ok(params) => {
                                tokio::spawn(async move {
                                    if let Err(err) = tool.call(params).await {
                                        debug!(%method, %err, "notification handler failed");
                                    }
                                });
                            }
                            Err(errors) => {
                                debug!(%method, ?errors, "notification params rejected");
                            }
                        }
                    }
                }
                None
            }
            EnvelopeKind::Response | EnvelopeKind::Event => None,
        }
    }

    async fn invoke(&self, id: String, method: &str, params: Option<Value>) -> Envelope {
        let Some(tool) = self.tools.get(method) else {
            return Envelope::error_response(
                id,
                ErrorCode::MethodNotFound,
                format!("no tool named '{method}'"),
            );
        };

        let params = match schema::check_params(params.as_ref(), &tool.input_schema) {
            Ok(params) => params,
            Err(errors) => {
                return Envelope::error_response(id, ErrorCode::InvalidParams, errors.join("; "));
            }
        };

        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .expect("handler semaphore is never closed");

        // Run the handler in its own task so a panic surfaces as an error
        // response instead of tearing down the connection loop.
        let handle = tokio::spawn(async move { tool.call(params).await });
        match handle.await {
            Ok(Ok(result)) => Envelope::response(id, result),
            Ok(Err(err)) => Envelope::error_response(id, err.code, err.message),
            Err(join_err) => {
                warn!(%method, error = %join_err, "tool handler aborted");
                Envelope::error_response(id, ErrorCode::ProcessingError, "handler aborted")
            }
        }
    }
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.tools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_with_echo() -> ToolServer {
        let mut server = ToolServer::new("test", "0.0.0");
        server
            .register(Tool::new(
                "echo",
                "echo params",
                json!({
                    "type": "object",
                    "properties": {"value": {"type": "integer"}},
                    "required": ["value"]
                }),
                |params| async move { Ok(params) },
            ))
            .unwrap();
        server
            .register(Tool::new(
                "always_fails",
                "returns a handler error",
                json!({"type": "object"}),
                |_| async move { Err::<Value, _>(ToolError::handler("boom")) },
            ))
            .unwrap();
        server
    }

    #[tokio::test]
    async fn request_dispatch_roundtrip() {
        let server = server_with_echo();
        let reply = server
            .dispatch(Envelope::request("1", "echo", json!({"value": 7})))
            .await
            .expect("request yields a reply");
        assert_eq!(reply.kind, EnvelopeKind::Response);
        assert_eq!(reply.result, Some(json!({"value": 7})));
    }

    #[tokio::test]
    async fn missing_tool_yields_method_not_found() {
        let server = server_with_echo();
        let reply = server
            .dispatch(Envelope::request("2", "nope", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.error.unwrap().code, ErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn invalid_params_are_rejected_before_the_handler() {
        let server = server_with_echo();
        let reply = server
            .dispatch(Envelope::request("3", "echo", json!({"value": "not-a-number"})))
            .await
            .unwrap();
        assert_eq!(reply.error.unwrap().code, ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn handler_errors_carry_their_code() {
        let server = server_with_echo();
        let reply = server
            .dispatch(Envelope::request("4", "always_fails", json!({})))
            .await
            .unwrap();
        let error = reply.error.unwrap();
        assert_eq!(error.code, ErrorCode::HandlerError);
        assert_eq!(error.message, "boom");
    }

    #[tokio::test]
    async fn notifications_produce_no_reply() {
        let server = server_with_echo();
        let reply = server
            .dispatch(Envelope::notification("echo", json!({"value": 1})))
            .await;
        assert!(reply.is_none());
    }
}
