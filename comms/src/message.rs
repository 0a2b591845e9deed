//! Message model shared by the queue manager and providers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Whatsapp,
    Telegram,
    Twitter,
    Signal,
    Facebook,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Sms,
        Channel::Email,
        Channel::Whatsapp,
        Channel::Telegram,
        Channel::Twitter,
        Channel::Signal,
        Channel::Facebook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Whatsapp => "whatsapp",
            Channel::Telegram => "telegram",
            Channel::Twitter => "twitter",
            Channel::Signal => "signal",
            Channel::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

/// One outbound message. Owned by the queue until it reaches a final state,
/// after which only its attempt history is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel: Channel,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Value>,
    pub status: MessageStatus,
    pub priority: MessagePriority,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(
        channel: Channel,
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel,
            from: from.into(),
            to: to.into(),
            subject: None,
            body: body.into(),
            attachments: Vec::new(),
            status: MessageStatus::Pending,
            priority: MessagePriority::Normal,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error_message: None,
            metadata: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// How retry delays grow. Messages without an explicit strategy fall back
/// to the manager's configured interval table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Immediate,
    ExpBackoff,
    LinearBackoff,
    Fixed,
}

impl RetryStrategy {
    /// Delay before the retry with 0-based index `retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::ExpBackoff => {
                Duration::from_secs(2u64.saturating_pow(retry.min(32)).min(300))
            }
            RetryStrategy::LinearBackoff => Duration::from_secs(30 * u64::from(retry)),
            RetryStrategy::Fixed => Duration::from_secs(60),
        }
    }
}

/// Delay from the configured interval table, clamped to its last entry.
pub fn table_delay(intervals: &[u64], retry: u32) -> Duration {
    if intervals.is_empty() {
        return Duration::from_secs(60);
    }
    let idx = (retry as usize).min(intervals.len() - 1);
    Duration::from_secs(intervals[idx])
}

/// Message plus its retry bookkeeping while it sits in a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message: Message,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<RetryStrategy>,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn new(message: Message, max_retries: u32, retry_strategy: Option<RetryStrategy>) -> Self {
        let now = Utc::now();
        Self {
            message,
            retry_count: 0,
            max_retries,
            retry_strategy,
            next_retry_at: now,
            created_at: now,
            last_attempt_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }
}

/// One outbound call to a provider, appended to the message's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempt_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Seconds spent in the provider call.
    pub response_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_follow_the_policy_table() {
        assert_eq!(RetryStrategy::Immediate.delay(3), Duration::ZERO);
        assert_eq!(RetryStrategy::ExpBackoff.delay(1), Duration::from_secs(2));
        assert_eq!(RetryStrategy::ExpBackoff.delay(4), Duration::from_secs(16));
        // Exponential growth caps at five minutes.
        assert_eq!(RetryStrategy::ExpBackoff.delay(20), Duration::from_secs(300));
        assert_eq!(RetryStrategy::LinearBackoff.delay(2), Duration::from_secs(60));
        assert_eq!(RetryStrategy::Fixed.delay(7), Duration::from_secs(60));
    }

    #[test]
    fn interval_table_clamps_to_its_last_entry() {
        let intervals = [1, 5, 15, 60];
        assert_eq!(table_delay(&intervals, 0), Duration::from_secs(1));
        assert_eq!(table_delay(&intervals, 2), Duration::from_secs(15));
        assert_eq!(table_delay(&intervals, 9), Duration::from_secs(60));
        assert_eq!(table_delay(&[], 1), Duration::from_secs(60));
    }

    #[test]
    fn priorities_order_low_to_urgent() {
        assert!(MessagePriority::Urgent > MessagePriority::High);
        assert!(MessagePriority::High > MessagePriority::Normal);
        assert!(MessagePriority::Normal > MessagePriority::Low);
    }

    #[test]
    fn channel_wire_names() {
        assert_eq!(serde_json::to_string(&Channel::Whatsapp).unwrap(), "\"whatsapp\"");
        assert_eq!(Channel::ALL.len(), 7);
    }
}
