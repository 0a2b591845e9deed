//! Command pipeline: validation, priority queue, bounded-concurrency
//! execution, timeouts, result cache and metrics.

pub mod cache;
pub mod metrics;
pub mod processor;
pub mod queue;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::intent::IntentKind;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("command queue is full")]
    QueueFull,
    #[error("pipeline is stopped")]
    Stopped,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CommandPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for CommandPriority {
    fn default() -> Self {
        CommandPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Queued | CommandStatus::Processing)
    }
}

/// An incoming command before classification.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: String,
    pub text: String,
    pub context: Map<String, Value>,
    pub priority: CommandPriority,
    pub timeout: Duration,
    pub submitted_at: DateTime<Utc>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub auth_token: Option<String>,
    pub interface_type: Option<String>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            context: Map::new(),
            priority: CommandPriority::Normal,
            timeout: Duration::from_secs(30),
            submitted_at: Utc::now(),
            session_id: None,
            user_id: None,
            auth_token: None,
            interface_type: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Terminal record for a command, cached by command id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: String,
    pub success: bool,
    pub response: String,
    pub data: Value,
    pub suggestions: Vec<String>,
    /// Seconds from pickup to terminal state.
    pub execution_time: f64,
    pub service_used: Option<String>,
    pub error_details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl CommandResult {
    pub fn success(command_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            response: response.into(),
            data: Value::Null,
            suggestions: Vec::new(),
            execution_time: 0.0,
            service_used: None,
            error_details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        command_id: impl Into<String>,
        response: impl Into<String>,
        kind: &str,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            response: response.into(),
            data: Value::Null,
            suggestions: Vec::new(),
            execution_time: 0.0,
            service_used: None,
            error_details: Some(serde_json::json!({"type": kind})),
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of an in-flight command, visible through `get_command_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSnapshot {
    pub command_id: String,
    pub intent: IntentKind,
    pub confidence: f64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_queue_size: usize,
    pub worker_count: usize,
    pub default_timeout: Duration,
    pub max_command_length: usize,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub confidence_floor: f64,
    /// Cache sweep plus metrics-reset check cadence.
    pub maintenance_interval: Duration,
    pub metrics_reset_threshold: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            worker_count: 10,
            default_timeout: Duration::from_secs(30),
            max_command_length: 1_000,
            cache_capacity: 1_000,
            cache_ttl: Duration::from_secs(300),
            confidence_floor: 0.3,
            maintenance_interval: Duration::from_secs(3_600),
            metrics_reset_threshold: 10_000,
        }
    }
}
