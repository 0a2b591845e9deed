//! Shared adapter contract.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UiError {
    #[error("adapter bind failed: {0}")]
    Bind(String),
    #[error("connection {0} not found")]
    ConnectionNotFound(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Canonical command payload every adapter produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub text: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub interface_type: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl CommandMessage {
    pub fn new(text: impl Into<String>, interface_type: &str) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            user_id: None,
            auth_token: None,
            interface_type: interface_type.to_string(),
            context: Map::new(),
        }
    }

    /// Parameters for the orchestrator's `process_command` tool.
    pub fn to_params(&self) -> Value {
        json!({
            "text": self.text,
            "session_id": self.session_id,
            "user_id": self.user_id,
            "auth_token": self.auth_token,
            "interface_type": self.interface_type,
            "context": self.context,
        })
    }
}

/// One connected peer, identified by an opaque id.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(connection_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            connection_id: connection_id.into(),
            user_id: None,
            session_id: None,
            created_at: now,
            last_activity: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub connections: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub errors: u64,
}

/// Atomic counters shared by every adapter.
#[derive(Debug, Default)]
pub struct AdapterStats {
    connections: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    errors: AtomicU64,
}

impl AdapterStats {
    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn message_in(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_out(&self) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
pub trait UiAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), UiError>;

    async fn stop(&self);

    /// Deliver to one connection, or to an adapter-chosen default when no
    /// id is given.
    async fn send_message(&self, message: &str, connection_id: Option<&str>) -> Result<(), UiError>;

    /// Deliver to every active connection; returns how many received it.
    async fn broadcast_message(&self, message: &str) -> usize;

    fn stats(&self) -> StatsSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_counters_track_traffic() {
        let stats = AdapterStats::default();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.message_in();
        stats.message_out();
        stats.message_out();
        stats.error();

        let snap = stats.snapshot();
        assert_eq!(snap.connections, 1);
        assert_eq!(snap.messages_in, 1);
        assert_eq!(snap.messages_out, 2);
        assert_eq!(snap.errors, 1);
    }

    #[test]
    fn connection_count_never_underflows() {
        let stats = AdapterStats::default();
        stats.connection_closed();
        assert_eq!(stats.snapshot().connections, 0);
    }

    #[test]
    fn command_message_params_shape() {
        let mut message = CommandMessage::new("play music", "web");
        message.user_id = Some("alice".into());
        let params = message.to_params();
        assert_eq!(params["text"], "play music");
        assert_eq!(params["interface_type"], "web");
        assert_eq!(params["user_id"], "alice");
    }
}
