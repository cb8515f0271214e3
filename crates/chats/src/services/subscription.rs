//! Channel subscription manager.
//!
//! Lifecycle: `uninitialized → initializing → active → torn_down`. One
//! handler task per topic feeds inbound events into the store. A failing
//! topic is logged and recorded; every other topic keeps running.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use casa_config::ChannelMode;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ChannelTransport, ChatBackend, Subscription};
use crate::store::SharedStore;
use crate::types::{ChannelEvent, ChatError, ChatResult, LifecycleState, Topic, UserId};
use crate::utils::wire;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the inbound-event subscriptions of one session
pub struct SubscriptionManager {
    user_id: UserId,
    mode: ChannelMode,
    store: SharedStore,
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn ChannelTransport>,
    handlers: Mutex<HashMap<Topic, JoinHandle<()>>>,
    failed: Mutex<HashSet<Topic>>,
}

impl SubscriptionManager {
    pub fn new(
        user_id: impl Into<UserId>,
        mode: ChannelMode,
        store: SharedStore,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.into(),
            mode,
            store,
            backend,
            transport,
            handlers: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashSet::new()),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.store.read(|s| s.lifecycle())
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn is_live(&self) -> bool {
        self.store.read(|s| s.is_live())
    }

    /// Fetch the directory once and open the subscriptions.
    ///
    /// A no-op while initializing or active. A failed fetch returns the
    /// manager to `uninitialized` so the caller may try again.
    pub async fn initialize(self: &Arc<Self>) -> ChatResult<()> {
        let proceed = self.store.mutate(|s| match s.lifecycle() {
            LifecycleState::Uninitialized => {
                s.set_lifecycle(LifecycleState::Initializing);
                Ok(true)
            }
            LifecycleState::Initializing | LifecycleState::Active => Ok(false),
            LifecycleState::TornDown => Err(ChatError::SessionClosed),
        })?;

        if !proceed {
            debug!(user_id = %self.user_id, "subscriptions already initialized");
            return Ok(());
        }

        info!(user_id = %self.user_id, mode = ?self.mode, "initializing chat subscriptions");

        let conversations = match self.backend.fetch_conversations(&self.user_id).await {
            Ok(conversations) => conversations,
            Err(error) => {
                warn!(user_id = %self.user_id, %error, "directory fetch failed");
                self.store.mutate(|s| {
                    if s.lifecycle() == LifecycleState::Initializing {
                        s.set_lifecycle(LifecycleState::Uninitialized);
                    }
                });
                return Err(error);
            }
        };

        let ids = self.store.mutate_live(|s| Ok(s.replace_directory(conversations)))?;

        let topics: Vec<Topic> = match self.mode {
            ChannelMode::PerConversation => ids.iter().map(|id| Topic::conversation(id)).collect(),
            ChannelMode::Multiplexed => vec![Topic::user(&self.user_id)],
        };

        for topic in topics {
            match self.subscribe_topic(topic).await {
                Err(ChatError::SessionClosed) => return Err(ChatError::SessionClosed),
                // Logged and recorded by subscribe_topic.
                Ok(()) | Err(_) => {}
            }
        }

        self.store.mutate_live(|s| {
            s.set_lifecycle(LifecycleState::Active);
            Ok(())
        })?;

        info!(
            user_id = %self.user_id,
            conversations = ids.len(),
            topics = locked(&self.handlers).len(),
            failed = locked(&self.failed).len(),
            "chat subscriptions active"
        );
        Ok(())
    }

    /// Subscribe to a conversation that appeared after initialization
    pub async fn ensure_subscribed(self: &Arc<Self>, conversation_id: &str) -> ChatResult<()> {
        match self.state() {
            LifecycleState::TornDown => return Err(ChatError::SessionClosed),
            // initialize covers every conversation in the directory
            LifecycleState::Uninitialized => return Ok(()),
            LifecycleState::Initializing | LifecycleState::Active => {}
        }

        match self.mode {
            ChannelMode::PerConversation => self.subscribe_topic(Topic::conversation(conversation_id)).await,
            ChannelMode::Multiplexed => Ok(()),
        }
    }

    /// Re-fetch the directory and subscribe to conversations new to it
    pub async fn refresh_directory(self: &Arc<Self>) -> ChatResult<()> {
        let conversations = self.backend.fetch_conversations(&self.user_id).await?;
        let ids = self.store.mutate_live(|s| Ok(s.replace_directory(conversations)))?;
        debug!(user_id = %self.user_id, count = ids.len(), "directory refreshed");

        if self.mode == ChannelMode::PerConversation && self.state() == LifecycleState::Active {
            for id in ids {
                let _ = self.subscribe_topic(Topic::conversation(&id)).await;
            }
        }
        Ok(())
    }

    /// Close every subscription; stale handlers never mutate state afterwards
    pub fn teardown(&self) {
        let already = self.store.mutate(|s| {
            let torn_down = !s.is_live();
            if !torn_down {
                s.end_session();
            }
            torn_down
        });

        let handlers: Vec<_> = locked(&self.handlers).drain().collect();
        let closed = handlers.len();
        for (_, handler) in handlers {
            handler.abort();
        }

        if !already {
            info!(user_id = %self.user_id, closed, "chat subscriptions torn down");
        }
    }

    pub fn subscribed_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = locked(&self.handlers).keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn failed_subscriptions(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = locked(&self.failed).iter().cloned().collect();
        topics.sort();
        topics
    }

    async fn subscribe_topic(self: &Arc<Self>, topic: Topic) -> ChatResult<()> {
        if !self.is_live() {
            return Err(ChatError::SessionClosed);
        }
        if locked(&self.handlers).contains_key(&topic) {
            return Ok(());
        }

        let subscription = match self.transport.subscribe(&topic).await {
            Ok(subscription) => subscription,
            Err(error) => {
                warn!(topic = %topic, %error, "subscription failed; realtime updates lost for this topic");
                locked(&self.failed).insert(topic);
                return Err(error);
            }
        };

        let mut handlers = locked(&self.handlers);
        // Checked under the handler lock so teardown cannot miss this handler.
        if !self.is_live() {
            return Err(ChatError::SessionClosed);
        }
        if handlers.contains_key(&topic) {
            return Ok(());
        }

        locked(&self.failed).remove(&topic);
        let handler = tokio::spawn(Arc::clone(self).run_handler(topic.clone(), subscription));
        debug!(topic = %topic, "subscribed");
        handlers.insert(topic, handler);
        Ok(())
    }

    async fn run_handler(self: Arc<Self>, topic: Topic, mut subscription: Subscription) {
        while let Some(item) = subscription.next().await {
            if !self.is_live() {
                return;
            }

            match item {
                Ok(event) => self.handle_event(&topic, event).await,
                Err(error) => {
                    warn!(topic = %topic, %error, "subscription broke; realtime updates lost for this topic");
                    locked(&self.failed).insert(topic.clone());
                    break;
                }
            }
        }

        // Allow a later ensure_subscribed or refresh to reopen the topic.
        locked(&self.handlers).remove(&topic);
    }

    // Boxed: resolving an unknown conversation re-enters subscribe_topic,
    // which spawns handlers running this future.
    fn handle_event<'a>(self: &'a Arc<Self>, topic: &'a Topic, event: ChannelEvent) -> BoxFuture<'a, ()> {
        async move { self.apply_event(topic, event).await }.boxed()
    }

    async fn apply_event(self: &Arc<Self>, topic: &Topic, event: ChannelEvent) {
        if !event.is_new_message() {
            debug!(topic = %topic, event = %event.event, "ignoring event");
            return;
        }

        let message = match wire::message_from_value(event.payload, topic.conversation_id()) {
            Ok(message) => message,
            Err(error) => {
                warn!(topic = %topic, %error, "dropping malformed event");
                return;
            }
        };

        match self.store.mutate_live(|s| s.apply_inbound(message.clone())) {
            Ok(outcome) => {
                debug!(topic = %topic, message_id = %message.id, ?outcome, "inbound message applied");
            }
            Err(ChatError::ConversationNotFound { id }) => {
                info!(conversation_id = %id, "inbound message for unknown conversation; refreshing directory");
                if let Err(error) = self.refresh_directory().await {
                    warn!(conversation_id = %id, %error, "directory refresh failed");
                }

                let result = self.store.mutate_live(|s| {
                    if s.directory().contains(&id) {
                        // The refreshed unread count already includes this message.
                        return s.apply_fetched(message);
                    }
                    // Listed under the sender until a later refresh names the participant.
                    s.ensure_conversation(&id, &message.sender_id);
                    s.apply_inbound(message)
                });

                match result {
                    Ok(outcome) => debug!(conversation_id = %id, ?outcome, "inbound message applied after refresh"),
                    Err(ChatError::SessionClosed) => {}
                    Err(error) => warn!(conversation_id = %id, %error, "failed to apply inbound message"),
                }
            }
            Err(ChatError::SessionClosed) => {}
            Err(error) => {
                warn!(topic = %topic, %error, "failed to apply inbound message");
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("user_id", &self.user_id)
            .field("mode", &self.mode)
            .field("topics", &self.subscribed_topics())
            .field("failed", &self.failed_subscriptions())
            .finish()
    }
}
