//! Authentication boundary.
//!
//! The orchestrator never inspects tokens itself; it consults the external
//! auth service with `verify_token` and `check_permission`. No token means
//! an anonymous session.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// User info for a valid token, `None` otherwise.
    async fn verify_token(&self, token: &str) -> Option<Value>;

    /// Whether the token holds a permission such as `service:hardware`.
    async fn check_permission(&self, token: &str, permission: &str) -> bool;
}

/// HTTP client for the external auth service.
pub struct HttpAuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AuthVerifier for HttpAuthClient {
    async fn verify_token(&self, token: &str) -> Option<Value> {
        let url = format!("{}/api/verify_token", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({"token": token}))
            .send()
            .await;
        match response {
            Ok(response) => {
                let body: Value = response.json().await.ok()?;
                if body.get("valid").and_then(Value::as_bool).unwrap_or(false) {
                    body.get("payload").cloned()
                } else {
                    None
                }
            }
            Err(err) => {
                warn!(%err, "auth service unreachable during verify");
                None
            }
        }
    }

    async fn check_permission(&self, token: &str, permission: &str) -> bool {
        let url = format!("{}/api/check_permission", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({"token": token, "permission": permission}))
            .send()
            .await;
        match response {
            Ok(response) => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("has_permission").and_then(Value::as_bool))
                .unwrap_or(false),
            Err(err) => {
                warn!(%err, "auth service unreachable during permission check");
                false
            }
        }
    }
}
