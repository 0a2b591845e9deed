//! Provider seam between the queue manager and concrete messaging backends.
//!
//! One adapter per channel tag. Channels without an inbound webhook
//! receiver (signal, facebook) keep the default `receive_messages`, which
//! returns nothing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::message::{Channel, Message};

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("no provider registered for channel {0}")]
    Missing(Channel),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait MessageProvider: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, message: &Message) -> Result<(), ProviderError>;

    async fn receive_messages(&self) -> Result<Vec<Message>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Per-channel adapter map. Registering a channel twice replaces the
/// previous adapter.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn MessageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn MessageProvider>) {
        self.providers.insert(provider.channel(), provider);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn MessageProvider>> {
        self.providers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.providers.keys().copied().collect()
    }
}

/// Development adapter that records the send in the log and reports
/// success. Useful until a real gateway client is wired in.
pub struct LoggingProvider {
    channel: Channel,
}

impl LoggingProvider {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl MessageProvider for LoggingProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &Message) -> Result<(), ProviderError> {
        info!(
            channel = %self.channel,
            to = %message.to,
            id = %message.id,
            "delivering message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_resolves_by_channel_and_last_registration_wins() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(LoggingProvider::new(Channel::Sms)));
        registry.register(Arc::new(LoggingProvider::new(Channel::Sms)));
        registry.register(Arc::new(LoggingProvider::new(Channel::Email)));
        assert!(registry.get(Channel::Sms).is_some());
        assert!(registry.get(Channel::Telegram).is_none());
        assert_eq!(registry.channels().len(), 2);
    }

    #[tokio::test]
    async fn default_receive_is_empty() {
        let provider = LoggingProvider::new(Channel::Signal);
        assert!(provider.receive_messages().await.unwrap().is_empty());
    }
}
