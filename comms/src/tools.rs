//! Queue manager tool surface.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use servis_rpc::{input_schema_for, ErrorCode, Tool, ToolError, ToolServer};

use crate::message::{Channel, Message, MessagePriority, RetryStrategy};
use crate::queue::{MessageQueueManager, QueueError};

impl From<QueueError> for ToolError {
    fn from(err: QueueError) -> Self {
        let code = match err {
            QueueError::QueueFull(_) => ErrorCode::QueueFull,
            QueueError::Stopped => ErrorCode::ServiceUnavailable,
        };
        ToolError::new(code, err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnqueueParams {
    pub channel: Channel,
    pub from: String,
    pub to: String,
    pub body: String,
    pub subject: Option<String>,
    pub priority: Option<MessagePriority>,
    pub max_retries: Option<u32>,
    pub retry_strategy: Option<RetryStrategy>,
    pub metadata: Option<Map<String, Value>>,
}

/// Routed-command surface: the orchestrator's communication intent lands
/// here with extracted parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendMessageParams {
    pub recipient: String,
    pub message: Option<String>,
    pub platform: Option<Channel>,
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChannelParams {
    pub channel: Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatusParams {
    pub channel: Option<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageHistoryParams {
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct NoParams {}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|err| ToolError::invalid_params(err.to_string()))
}

/// Register the queue manager tools onto a server.
pub fn register_tools(
    server: &mut ToolServer,
    manager: Arc<MessageQueueManager>,
) -> Result<(), ToolError> {
    let mgr = manager.clone();
    server.register(Tool::new(
        "enqueue",
        "Queue a message for delivery on a channel",
        input_schema_for::<EnqueueParams>(),
        move |params| {
            let manager = mgr.clone();
            async move {
                let p: EnqueueParams = parse(params)?;
                let mut message = Message::new(p.channel, p.from, p.to, p.body);
                if let Some(subject) = p.subject {
                    message = message.with_subject(subject);
                }
                if let Some(priority) = p.priority {
                    message = message.with_priority(priority);
                }
                if let Some(metadata) = p.metadata {
                    message.metadata = metadata;
                }
                let id = manager.enqueue(message, p.max_retries, p.retry_strategy)?;
                Ok(json!({"message_id": id, "status": "queued"}))
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "send_message",
        "Queue an outbound message from a routed communication command",
        input_schema_for::<SendMessageParams>(),
        move |params| {
            let manager = mgr.clone();
            async move {
                let p: SendMessageParams = parse(params)?;
                let channel = p.platform.unwrap_or(Channel::Sms);
                let from = p.user_id.unwrap_or_else(|| "servis".to_string());
                let message =
                    Message::new(channel, from, p.recipient.clone(), p.message.unwrap_or_default());
                let id = manager.enqueue(message, None, None)?;
                Ok(json!({
                    "success": true,
                    "response": format!("Message to {} queued on {}", p.recipient, channel),
                    "data": {"message_id": id, "channel": channel},
                }))
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "dequeue",
        "Remove and return the next due message for a channel",
        input_schema_for::<ChannelParams>(),
        move |params| {
            let manager = mgr.clone();
            async move {
                let p: ChannelParams = parse(params)?;
                match manager.dequeue(p.channel) {
                    Some(qm) => Ok(serde_json::to_value(qm)
                        .map_err(|err| ToolError::handler(err.to_string()))?),
                    None => Ok(Value::Null),
                }
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "pause",
        "Suspend dispatch while still accepting enqueues",
        input_schema_for::<NoParams>(),
        move |_params| {
            let manager = mgr.clone();
            async move {
                manager.pause();
                Ok(json!({"status": manager.status()}))
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "resume",
        "Resume dispatch after a pause",
        input_schema_for::<NoParams>(),
        move |_params| {
            let manager = mgr.clone();
            async move {
                manager.resume();
                Ok(json!({"status": manager.status()}))
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "clear_queue",
        "Drop every queued message for a channel",
        input_schema_for::<ChannelParams>(),
        move |params| {
            let manager = mgr.clone();
            async move {
                let p: ChannelParams = parse(params)?;
                let cleared = manager.clear_queue(p.channel);
                Ok(json!({"channel": p.channel, "cleared": cleared}))
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "get_queue_status",
        "Queue depth and due/retry counts, per channel or overall",
        input_schema_for::<QueueStatusParams>(),
        move |params| {
            let manager = mgr.clone();
            async move {
                let p: QueueStatusParams = parse(params)?;
                Ok(manager.queue_status(p.channel))
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "get_statistics",
        "Aggregate delivery statistics",
        input_schema_for::<NoParams>(),
        move |_params| {
            let manager = mgr.clone();
            async move {
                let stats = manager.statistics();
                Ok(json!({
                    "statistics": stats,
                    "queue_status": manager.status(),
                }))
            }
        },
    ))?;

    let mgr = manager.clone();
    server.register(Tool::new(
        "receive_messages",
        "Poll a channel's provider for inbound messages",
        input_schema_for::<ChannelParams>(),
        move |params| {
            let manager = mgr.clone();
            async move {
                let p: ChannelParams = parse(params)?;
                let messages = manager
                    .receive_messages(p.channel)
                    .await
                    .map_err(|err| ToolError::handler(err.to_string()))?;
                Ok(json!({"channel": p.channel, "messages": messages}))
            }
        },
    ))?;

    let mgr = manager;
    server.register(Tool::new(
        "get_message_history",
        "Delivery attempt history for a message id",
        input_schema_for::<MessageHistoryParams>(),
        move |params| {
            let manager = mgr.clone();
            async move {
                let p: MessageHistoryParams = parse(params)?;
                let history = manager.get_message_history(&p.message_id);
                Ok(json!({
                    "message_id": p.message_id,
                    "attempts": history,
                }))
            }
        },
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::queue::QueueConfig;

    #[test]
    fn all_queue_tools_register() {
        let manager = Arc::new(MessageQueueManager::new(
            QueueConfig::default(),
            ProviderRegistry::new(),
        ));
        let mut server = ToolServer::new("ai-communications", "0.1.0");
        register_tools(&mut server, manager).unwrap();
        let names = server.tool_names();
        for expected in [
            "send_message",
            "enqueue",
            "dequeue",
            "pause",
            "resume",
            "clear_queue",
            "get_queue_status",
            "get_statistics",
            "receive_messages",
            "get_message_history",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
