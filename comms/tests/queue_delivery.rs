//! Delivery behaviour driven through scripted providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use servis_comms::{
    Channel, Message, MessagePriority, MessageProvider, MessageQueueManager, ProviderError,
    ProviderRegistry, QueueConfig, RetryStrategy,
};

/// Records delivered message ids; fails the first `fail_first` sends.
struct ScriptedProvider {
    channel: Channel,
    delivered: Mutex<Vec<String>>,
    fail_first: usize,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(channel: Channel, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            channel,
            delivered: Mutex::new(Vec::new()),
            fail_first,
            calls: AtomicUsize::new(0),
        })
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageProvider for ScriptedProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &Message) -> Result<(), ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ProviderError::Send("gateway rejected the message".into()));
        }
        self.delivered.lock().unwrap().push(message.id.clone());
        Ok(())
    }
}

fn manager_with(provider: Arc<ScriptedProvider>, config: QueueConfig) -> Arc<MessageQueueManager> {
    let mut providers = ProviderRegistry::new();
    providers.register(provider);
    Arc::new(MessageQueueManager::new(config, providers))
}

#[tokio::test]
async fn eleventh_message_overflows_and_first_ten_deliver_in_fifo_order() {
    let provider = ScriptedProvider::new(Channel::Sms, 0);
    let mut config = QueueConfig::default();
    config.max_queue_size = 10;
    let manager = manager_with(provider.clone(), config);

    let mut expected = Vec::new();
    for i in 0..10 {
        let id = manager
            .enqueue(
                Message::new(Channel::Sms, "me", "you", format!("msg {i}")),
                None,
                None,
            )
            .unwrap();
        expected.push(id);
    }
    let overflow = manager.enqueue(Message::new(Channel::Sms, "me", "you", "msg 10"), None, None);
    assert!(overflow.is_err(), "11th enqueue must report queue_full");

    manager.process_queues().await;
    assert_eq!(provider.delivered(), expected);
}

#[tokio::test]
async fn max_retries_bounds_the_attempt_count_and_marks_failure() {
    // Provider never succeeds; immediate retries keep the message due.
    let provider = ScriptedProvider::new(Channel::Email, usize::MAX);
    let manager = manager_with(provider, QueueConfig::default());

    let retries_seen = Arc::new(Mutex::new(Vec::new()));
    let seen = retries_seen.clone();
    manager.on_retry(Box::new(move |_msg, count| {
        seen.lock().unwrap().push(count);
    }));

    let id = manager
        .enqueue(
            Message::new(Channel::Email, "me", "you", "flaky"),
            Some(2),
            Some(RetryStrategy::Immediate),
        )
        .unwrap();

    // Drive the loop well past the retry budget.
    for _ in 0..6 {
        manager.process_queues().await;
    }

    // max_retries = 2 yields at most three delivery attempts.
    let history = manager.get_message_history(&id);
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|a| !a.success));
    assert_eq!(*retries_seen.lock().unwrap(), vec![1, 2]);

    let stats = manager.statistics();
    assert_eq!(stats.pending_messages, 0);
    assert_eq!(stats.failed_deliveries, 3);
    assert_eq!(stats.retry_attempts, 2);
    assert_eq!(manager.queue_len(Channel::Email), 0);
}

#[tokio::test]
async fn eventual_success_after_transient_failures() {
    let provider = ScriptedProvider::new(Channel::Telegram, 2);
    let manager = manager_with(provider.clone(), QueueConfig::default());

    let id = manager
        .enqueue(
            Message::new(Channel::Telegram, "me", "you", "retry me"),
            Some(5),
            Some(RetryStrategy::Immediate),
        )
        .unwrap();

    for _ in 0..4 {
        manager.process_queues().await;
    }

    assert_eq!(provider.delivered(), vec![id.clone()]);
    let history = manager.get_message_history(&id);
    assert_eq!(history.len(), 3);
    assert!(history.last().unwrap().success);

    let stats = manager.statistics();
    assert_eq!(stats.successful_deliveries, 1);
    assert_eq!(stats.pending_messages, 0);
}

#[tokio::test]
async fn backoff_keeps_retries_out_of_the_next_pass() {
    // Exponential backoff schedules the first retry one second out, so an
    // immediate second pass must not attempt it again.
    let provider = ScriptedProvider::new(Channel::Sms, usize::MAX);
    let manager = manager_with(provider, QueueConfig::default());

    let id = manager
        .enqueue(
            Message::new(Channel::Sms, "me", "you", "later"),
            Some(3),
            Some(RetryStrategy::ExpBackoff),
        )
        .unwrap();

    manager.process_queues().await;
    manager.process_queues().await;
    assert_eq!(manager.get_message_history(&id).len(), 1);
    assert_eq!(manager.queue_len(Channel::Sms), 1);
}

#[tokio::test]
async fn delivery_observers_fire_once_per_attempt() {
    let provider = ScriptedProvider::new(Channel::Sms, 0);
    let manager = manager_with(provider, QueueConfig::default());
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    manager.on_delivery(Box::new(move |_msg, success| {
        sink.lock().unwrap().push(success);
    }));

    manager
        .enqueue(
            Message::new(Channel::Sms, "me", "you", "observe me")
                .with_priority(MessagePriority::High),
            None,
            None,
        )
        .unwrap();
    manager.process_queues().await;
    assert_eq!(*outcomes.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn paused_manager_holds_messages_until_resume() {
    let provider = ScriptedProvider::new(Channel::Sms, 0);
    let manager = manager_with(provider.clone(), QueueConfig::default());
    let handle = manager.start();

    manager.pause();
    manager
        .enqueue(Message::new(Channel::Sms, "me", "you", "held"), None, None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(provider.delivered().is_empty());

    manager.resume();
    manager.process_queues().await;
    assert_eq!(provider.delivered().len(), 1);

    manager.stop();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}
