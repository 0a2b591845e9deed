//! Communications module: per-channel message queues with retry scheduling,
//! delivery-attempt history and statistics.
//!
//! Concrete provider clients (SMS gateways, SMTP, chat platform APIs) live
//! behind the [`provider::MessageProvider`] trait; the queue manager only
//! sees the channel tag.

pub mod message;
pub mod provider;
pub mod queue;
pub mod tools;

pub use message::{
    Channel, DeliveryAttempt, Message, MessagePriority, MessageStatus, QueueMessage, RetryStrategy,
};
pub use provider::{LoggingProvider, MessageProvider, ProviderError, ProviderRegistry};
pub use queue::{MessageQueueManager, QueueConfig, QueueError, QueueStatistics, QueueStatus};
