//! In-process publish/subscribe broker.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::{ChannelTransport, Subscription};
use crate::entities::Message;
use crate::types::{ChannelEvent, ChatError, ChatResult, Topic};

const DEFAULT_CAPACITY: usize = 100;

/// Broadcast-backed [`ChannelTransport`] living in the same process.
///
/// Topics can be made to refuse new subscriptions or be cut off to
/// exercise failure isolation.
#[derive(Debug, Clone)]
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Debug)]
struct BrokerInner {
    capacity: usize,
    topics: RwLock<HashMap<Topic, broadcast::Sender<ChannelEvent>>>,
    refused: RwLock<HashMap<Topic, String>>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                capacity: capacity.max(1),
                topics: RwLock::new(HashMap::new()),
                refused: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get or create the sender for a topic
    fn sender(&self, topic: &Topic) -> broadcast::Sender<ChannelEvent> {
        let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }

    /// Publish an event; returns how many subscribers received it
    pub fn publish(&self, topic: &Topic, event: ChannelEvent) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(PoisonError::into_inner);
        match topics.get(topic) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Publish a `new-message` event for a persisted message on the given topics
    pub fn publish_message(&self, topics: &[Topic], message: &Message) -> ChatResult<usize> {
        let payload = serde_json::to_value(message)?;
        Ok(topics
            .iter()
            .map(|topic| self.publish(topic, ChannelEvent::new_message(payload.clone())))
            .sum())
    }

    /// Make new subscriptions to `topic` fail
    pub fn refuse_topic(&self, topic: &Topic, reason: impl Into<String>) {
        self.inner
            .refused
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.clone(), reason.into());
    }

    pub fn accept_topic(&self, topic: &Topic) {
        self.inner
            .refused
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
    }

    /// Cut off every live subscription to `topic`
    pub fn disconnect_topic(&self, topic: &Topic) {
        let removed = self
            .inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        if removed.is_some() {
            debug!(topic = %topic, "topic disconnected");
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, |sender| sender.receiver_count())
    }
}

#[async_trait]
impl ChannelTransport for LocalBroker {
    async fn subscribe(&self, topic: &Topic) -> ChatResult<Subscription> {
        let refused = self
            .inner
            .refused
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned();
        if let Some(reason) = refused {
            return Err(ChatError::subscription(topic.as_str(), reason));
        }

        let mut receiver = self.sender(topic).subscribe();
        let (sender, subscription) = Subscription::channel(self.inner.capacity);
        let topic = topic.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if sender.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "subscriber lagged behind");
                    }
                    Err(RecvError::Closed) => {
                        let _ = sender
                            .send(Err(ChatError::subscription(topic.as_str(), "topic closed")))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(subscription.with_reader(forwarder.abort_handle()))
    }
}
