//! Per-channel priority queues with retry scheduling and delivery tracking.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::{
    table_delay, Channel, DeliveryAttempt, Message, MessagePriority, MessageStatus, QueueMessage,
    RetryStrategy,
};
use crate::provider::{ProviderError, ProviderRegistry};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue for channel {0} is full")]
    QueueFull(Channel),
    #[error("queue manager is stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Active,
    Paused,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub default_max_retries: u32,
    pub default_retry_strategy: Option<RetryStrategy>,
    /// Fallback delay table for messages without an explicit strategy.
    pub retry_intervals: Vec<u64>,
    pub batch_size: usize,
    pub processing_interval: Duration,
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            default_max_retries: 3,
            default_retry_strategy: Some(RetryStrategy::ExpBackoff),
            retry_intervals: vec![1, 5, 15, 60],
            batch_size: 10,
            processing_interval: Duration::from_secs(1),
            history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatistics {
    pub total_messages: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    pub pending_messages: u64,
    pub retry_attempts: u64,
    /// Running mean of provider response time in seconds.
    pub average_delivery_time: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for QueueStatistics {
    fn default() -> Self {
        Self {
            total_messages: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            pending_messages: 0,
            retry_attempts: 0,
            average_delivery_time: 0.0,
            last_updated: Utc::now(),
        }
    }
}

type DeliveryObserver = Box<dyn Fn(&Message, bool) + Send + Sync>;
type RetryObserver = Box<dyn Fn(&Message, u32) + Send + Sync>;

pub struct MessageQueueManager {
    config: QueueConfig,
    providers: ProviderRegistry,
    queues: Mutex<HashMap<Channel, VecDeque<QueueMessage>>>,
    attempts: Mutex<HashMap<String, VecDeque<DeliveryAttempt>>>,
    stats: Mutex<QueueStatistics>,
    status: Mutex<QueueStatus>,
    cancel: CancellationToken,
    delivery_observers: Mutex<Vec<DeliveryObserver>>,
    retry_observers: Mutex<Vec<RetryObserver>>,
}

impl MessageQueueManager {
    pub fn new(config: QueueConfig, providers: ProviderRegistry) -> Self {
        let mut queues = HashMap::new();
        for channel in Channel::ALL {
            queues.insert(channel, VecDeque::new());
        }
        Self {
            config,
            providers,
            queues: Mutex::new(queues),
            attempts: Mutex::new(HashMap::new()),
            stats: Mutex::new(QueueStatistics::default()),
            status: Mutex::new(QueueStatus::Active),
            cancel: CancellationToken::new(),
            delivery_observers: Mutex::new(Vec::new()),
            retry_observers: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> QueueStatus {
        *self.status.lock().expect("status lock")
    }

    /// Start the periodic processing loop.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        *self.status.lock().expect("status lock") = QueueStatus::Active;
        let manager = Arc::clone(self);
        info!("message queue manager started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.processing_interval);
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if manager.status() == QueueStatus::Active {
                            manager.process_queues().await;
                        }
                    }
                }
            }
            info!("message queue manager loop stopped");
        })
    }

    /// Stop the loop and reject further enqueues.
    pub fn stop(&self) {
        *self.status.lock().expect("status lock") = QueueStatus::Stopped;
        self.cancel.cancel();
        info!("message queue manager stopped");
    }

    /// Suspend dispatch while still accepting enqueues.
    pub fn pause(&self) {
        let mut status = self.status.lock().expect("status lock");
        if *status == QueueStatus::Active {
            *status = QueueStatus::Paused;
            info!("message queue processing paused");
        }
    }

    pub fn resume(&self) {
        let mut status = self.status.lock().expect("status lock");
        if *status == QueueStatus::Paused {
            *status = QueueStatus::Active;
            info!("message queue processing resumed");
        }
    }

    pub fn on_delivery(&self, observer: DeliveryObserver) {
        self.delivery_observers
            .lock()
            .expect("observer lock")
            .push(observer);
    }

    pub fn on_retry(&self, observer: RetryObserver) {
        self.retry_observers
            .lock()
            .expect("observer lock")
            .push(observer);
    }

    /// Queue a message for delivery. Urgent messages go to the head of the
    /// channel queue, high after the urgent block, everything else to the
    /// tail; within a class order stays first-in-first-out.
    pub fn enqueue(
        &self,
        message: Message,
        max_retries: Option<u32>,
        retry_strategy: Option<RetryStrategy>,
    ) -> Result<String, QueueError> {
        if self.status() == QueueStatus::Stopped {
            return Err(QueueError::Stopped);
        }
        let channel = message.channel;
        let mut queues = self.queues.lock().expect("queues lock");
        let queue = queues.entry(channel).or_default();
        if queue.len() >= self.config.max_queue_size {
            return Err(QueueError::QueueFull(channel));
        }

        let qm = QueueMessage::new(
            message,
            max_retries.unwrap_or(self.config.default_max_retries),
            retry_strategy.or(self.config.default_retry_strategy),
        );
        let id = qm.message.id.clone();
        let insert_at = match qm.message.priority {
            MessagePriority::Urgent => queue
                .iter()
                .position(|m| m.message.priority < MessagePriority::Urgent)
                .unwrap_or(queue.len()),
            MessagePriority::High => queue
                .iter()
                .position(|m| m.message.priority < MessagePriority::High)
                .unwrap_or(queue.len()),
            _ => queue.len(),
        };
        queue.insert(insert_at, qm);

        let mut stats = self.stats.lock().expect("stats lock");
        stats.total_messages += 1;
        stats.pending_messages += 1;
        stats.last_updated = Utc::now();
        debug!(%channel, %id, "message enqueued");
        Ok(id)
    }

    /// Remove and return the next due message for a channel.
    pub fn dequeue(&self, channel: Channel) -> Option<QueueMessage> {
        let now = Utc::now();
        let mut queues = self.queues.lock().expect("queues lock");
        let queue = queues.get_mut(&channel)?;
        let idx = queue.iter().position(|m| m.is_due(now))?;
        queue.remove(idx)
    }

    /// One pass over every channel, dispatching up to `batch_size` due
    /// messages per channel. The periodic loop calls this; tests may drive
    /// it directly for deterministic scheduling.
    pub async fn process_queues(&self) {
        for channel in Channel::ALL {
            for _ in 0..self.config.batch_size {
                let Some(qm) = self.dequeue(channel) else {
                    break;
                };
                self.deliver(qm).await;
            }
        }
    }

    async fn deliver(&self, mut qm: QueueMessage) {
        let channel = qm.message.channel;
        let started = Instant::now();
        let outcome = match self.providers.get(channel) {
            Some(provider) => provider.send(&qm.message).await,
            None => Err(ProviderError::Missing(channel)),
        };
        let response_time = started.elapsed().as_secs_f64();
        let now = Utc::now();
        qm.last_attempt_at = Some(now);

        let attempt = DeliveryAttempt {
            attempt_id: Uuid::new_v4().to_string(),
            message_id: qm.message.id.clone(),
            timestamp: now,
            success: outcome.is_ok(),
            error_message: outcome.as_ref().err().map(ToString::to_string),
            response_time,
        };
        self.record_attempt(attempt);

        match outcome {
            Ok(()) => {
                qm.message.status = MessageStatus::Sent;
                qm.message.sent_at = Some(now);
                {
                    let mut stats = self.stats.lock().expect("stats lock");
                    stats.successful_deliveries += 1;
                    stats.pending_messages = stats.pending_messages.saturating_sub(1);
                    update_mean(&mut stats, response_time);
                    stats.last_updated = now;
                }
                debug!(id = %qm.message.id, "message delivered");
                self.notify_delivery(&qm.message, true);
            }
            Err(err) => {
                qm.message.error_message = Some(err.to_string());
                {
                    let mut stats = self.stats.lock().expect("stats lock");
                    stats.failed_deliveries += 1;
                    update_mean(&mut stats, response_time);
                    stats.last_updated = now;
                }
                self.notify_delivery(&qm.message, false);
                self.handle_failure(qm);
            }
        }
    }

    /// Reschedule a failed message or mark it terminally failed once the
    /// retry budget is spent.
    fn handle_failure(&self, mut qm: QueueMessage) {
        qm.retry_count += 1;
        if qm.retry_count > qm.max_retries {
            qm.message.status = MessageStatus::Failed;
            let mut stats = self.stats.lock().expect("stats lock");
            stats.pending_messages = stats.pending_messages.saturating_sub(1);
            warn!(
                id = %qm.message.id,
                attempts = qm.retry_count,
                "message failed permanently"
            );
            return;
        }

        // Retry index is 0-based: the first retry after the initial attempt
        // uses k = 0.
        let retry_index = qm.retry_count - 1;
        let delay = match qm.retry_strategy {
            Some(strategy) => strategy.delay(retry_index),
            None => table_delay(&self.config.retry_intervals, retry_index),
        };
        qm.next_retry_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
        qm.message.status = MessageStatus::Pending;

        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.retry_attempts += 1;
        }
        self.notify_retry(&qm.message, qm.retry_count);
        debug!(
            id = %qm.message.id,
            retry = qm.retry_count,
            next_retry_at = %qm.next_retry_at,
            "message scheduled for retry"
        );

        let channel = qm.message.channel;
        self.queues
            .lock()
            .expect("queues lock")
            .entry(channel)
            .or_default()
            .push_back(qm);
    }

    fn record_attempt(&self, attempt: DeliveryAttempt) {
        let mut attempts = self.attempts.lock().expect("attempts lock");
        let history = attempts.entry(attempt.message_id.clone()).or_default();
        history.push_back(attempt);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    fn notify_delivery(&self, message: &Message, success: bool) {
        for observer in self.delivery_observers.lock().expect("observer lock").iter() {
            observer(message, success);
        }
    }

    fn notify_retry(&self, message: &Message, retry_count: u32) {
        for observer in self.retry_observers.lock().expect("observer lock").iter() {
            observer(message, retry_count);
        }
    }

    pub fn get_message_history(&self, message_id: &str) -> Vec<DeliveryAttempt> {
        self.attempts
            .lock()
            .expect("attempts lock")
            .get(message_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_queue(&self, channel: Channel) -> usize {
        let mut queues = self.queues.lock().expect("queues lock");
        let cleared = queues.get_mut(&channel).map(|q| {
            let n = q.len();
            q.clear();
            n
        });
        let cleared = cleared.unwrap_or(0);
        if cleared > 0 {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.pending_messages = stats.pending_messages.saturating_sub(cleared as u64);
            info!(%channel, cleared, "queue cleared");
        }
        cleared
    }

    pub fn queue_len(&self, channel: Channel) -> usize {
        self.queues
            .lock()
            .expect("queues lock")
            .get(&channel)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Per-channel depth, due and retrying counts.
    pub fn queue_status(&self, channel: Option<Channel>) -> serde_json::Value {
        let now = Utc::now();
        let queues = self.queues.lock().expect("queues lock");
        let snapshot = |queue: &VecDeque<QueueMessage>| {
            serde_json::json!({
                "queue_size": queue.len(),
                "due_messages": queue.iter().filter(|m| m.is_due(now)).count(),
                "retry_messages": queue.iter().filter(|m| m.retry_count > 0).count(),
            })
        };
        match channel {
            Some(channel) => {
                let empty = VecDeque::new();
                let queue = queues.get(&channel).unwrap_or(&empty);
                let mut out = snapshot(queue);
                out["channel"] = serde_json::json!(channel);
                out
            }
            None => {
                let mut per_channel = serde_json::Map::new();
                for channel in Channel::ALL {
                    if let Some(queue) = queues.get(&channel) {
                        per_channel.insert(channel.as_str().to_string(), snapshot(queue));
                    }
                }
                serde_json::json!({
                    "status": self.status(),
                    "channels": per_channel,
                })
            }
        }
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.stats.lock().expect("stats lock").clone()
    }

    /// Poll a channel's provider for inbound messages. Channels without a
    /// webhook receiver yield the empty sequence.
    pub async fn receive_messages(&self, channel: Channel) -> Result<Vec<Message>, ProviderError> {
        match self.providers.get(channel) {
            Some(provider) => provider.receive_messages().await,
            None => Err(ProviderError::Missing(channel)),
        }
    }
}

fn update_mean(stats: &mut QueueStatistics, response_time: f64) {
    let total = stats.successful_deliveries + stats.failed_deliveries;
    if total == 0 {
        return;
    }
    stats.average_delivery_time =
        (stats.average_delivery_time * (total - 1) as f64 + response_time) / total as f64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessagePriority;

    fn manager(config: QueueConfig) -> MessageQueueManager {
        MessageQueueManager::new(config, ProviderRegistry::new())
    }

    fn msg(priority: MessagePriority) -> Message {
        Message::new(Channel::Sms, "me", "you", "hello").with_priority(priority)
    }

    #[test]
    fn urgent_goes_before_existing_lower_classes() {
        let mgr = manager(QueueConfig::default());
        let normal = mgr.enqueue(msg(MessagePriority::Normal), None, None).unwrap();
        let high = mgr.enqueue(msg(MessagePriority::High), None, None).unwrap();
        let urgent_a = mgr.enqueue(msg(MessagePriority::Urgent), None, None).unwrap();
        let urgent_b = mgr.enqueue(msg(MessagePriority::Urgent), None, None).unwrap();
        let low = mgr.enqueue(msg(MessagePriority::Low), None, None).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| mgr.dequeue(Channel::Sms))
            .map(|qm| qm.message.id)
            .collect();
        assert_eq!(order, vec![urgent_a, urgent_b, high, normal, low]);
    }

    #[test]
    fn overflow_is_rejected_with_queue_full() {
        let mut config = QueueConfig::default();
        config.max_queue_size = 2;
        let mgr = manager(config);
        mgr.enqueue(msg(MessagePriority::Normal), None, None).unwrap();
        mgr.enqueue(msg(MessagePriority::Normal), None, None).unwrap();
        let err = mgr.enqueue(msg(MessagePriority::Normal), None, None).unwrap_err();
        assert!(matches!(err, QueueError::QueueFull(Channel::Sms)));
    }

    #[test]
    fn stopped_manager_rejects_enqueue_but_paused_accepts() {
        let mgr = manager(QueueConfig::default());
        mgr.pause();
        assert!(mgr.enqueue(msg(MessagePriority::Normal), None, None).is_ok());
        mgr.stop();
        assert!(matches!(
            mgr.enqueue(msg(MessagePriority::Normal), None, None),
            Err(QueueError::Stopped)
        ));
    }

    #[test]
    fn statistics_track_enqueues() {
        let mgr = manager(QueueConfig::default());
        mgr.enqueue(msg(MessagePriority::Normal), None, None).unwrap();
        mgr.enqueue(msg(MessagePriority::Normal), None, None).unwrap();
        let stats = mgr.statistics();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.pending_messages, 2);
    }

    #[test]
    fn clear_queue_reports_count() {
        let mgr = manager(QueueConfig::default());
        mgr.enqueue(msg(MessagePriority::Normal), None, None).unwrap();
        mgr.enqueue(msg(MessagePriority::Low), None, None).unwrap();
        assert_eq!(mgr.clear_queue(Channel::Sms), 2);
        assert_eq!(mgr.queue_len(Channel::Sms), 0);
    }
}
