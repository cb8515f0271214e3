//! Session-scoped chat container.
//!
//! A [`ChatSession`] is built on login, owns every store and subscription
//! of that user and is torn down on logout. Nothing survives between
//! sessions; background completions arriving after teardown are dropped.

use std::sync::Arc;

use casa_config::{ChannelMode, ChatConfig, RealtimeConfig};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::navigation::{NavigationEffect, View};
use super::send_pipeline::{PendingSend, SendPipeline};
use super::subscription::SubscriptionManager;
use super::BackgroundTasks;
use crate::api::{AttachmentUploader, ChannelTransport, ChatBackend};
use crate::entities::{Conversation, Message, MessageDraft};
use crate::store::{ChatSnapshot, ChatStore, SharedStore};
use crate::types::{
    ChatError, ChatResult, ConversationId, CreateConversationRequest, LifecycleState, MarkReadRequest,
    StoreUpdate, Topic, UserId,
};
use crate::utils::Validator;

/// Configures a [`ChatSession`] before login
pub struct ChatSessionBuilder {
    user_id: UserId,
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn ChannelTransport>,
    uploader: Option<Arc<dyn AttachmentUploader>>,
    mode: ChannelMode,
    chat: ChatConfig,
    update_capacity: usize,
}

impl ChatSessionBuilder {
    pub fn new(
        user_id: impl Into<UserId>,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            backend,
            transport,
            uploader: None,
            mode: ChannelMode::default(),
            chat: ChatConfig::default(),
            update_capacity: RealtimeConfig::default().channel_capacity,
        }
    }

    pub fn uploader(mut self, uploader: Arc<dyn AttachmentUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn mode(mut self, mode: ChannelMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn chat_config(mut self, chat: ChatConfig) -> Self {
        self.chat = chat;
        self
    }

    /// Take the channel mode and buffer size from the realtime settings
    pub fn realtime_config(mut self, realtime: &RealtimeConfig) -> Self {
        self.mode = realtime.mode;
        self.update_capacity = realtime.channel_capacity;
        self
    }

    pub fn update_capacity(mut self, capacity: usize) -> Self {
        self.update_capacity = capacity;
        self
    }

    /// Build the session without touching the network
    pub fn build(self) -> ChatResult<ChatSession> {
        Validator::identifier("User id", &self.user_id)?;

        let store = SharedStore::new(
            ChatStore::new(self.user_id.clone(), self.chat.reconcile_window_ms),
            self.update_capacity,
        );
        let tasks = Arc::new(BackgroundTasks::default());
        let subscriptions = SubscriptionManager::new(
            self.user_id.clone(),
            self.mode,
            store.clone(),
            Arc::clone(&self.backend),
            self.transport,
        );
        let pipeline = SendPipeline::new(
            store.clone(),
            Arc::clone(&self.backend),
            self.uploader,
            Arc::clone(&tasks),
        );

        Ok(ChatSession {
            inner: Arc::new(SessionInner {
                user_id: self.user_id,
                store,
                backend: self.backend,
                subscriptions,
                pipeline,
                tasks,
                history_page_size: self.chat.history_page_size as usize,
            }),
        })
    }

    /// Build the session and initialize its subscriptions
    pub async fn connect(self) -> ChatResult<ChatSession> {
        let session = self.build()?;
        session.initialize().await?;
        Ok(session)
    }
}

struct SessionInner {
    user_id: UserId,
    store: SharedStore,
    backend: Arc<dyn ChatBackend>,
    subscriptions: Arc<SubscriptionManager>,
    pipeline: SendPipeline,
    tasks: Arc<BackgroundTasks>,
    history_page_size: usize,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.subscriptions.teardown();
        self.tasks.abort_all();
    }
}

/// Chat state and operations of one logged-in user.
///
/// Cheap to clone; all clones share the same session. User actions apply
/// their local effects before returning and hand network work to
/// background tasks.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn builder(
        user_id: impl Into<UserId>,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn ChannelTransport>,
    ) -> ChatSessionBuilder {
        ChatSessionBuilder::new(user_id, backend, transport)
    }

    /// Log in with default settings
    pub async fn connect(
        user_id: impl Into<UserId>,
        backend: Arc<dyn ChatBackend>,
        transport: Arc<dyn ChannelTransport>,
    ) -> ChatResult<Self> {
        Self::builder(user_id, backend, transport).connect().await
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Fetch the directory and subscribe; repeated calls are no-ops
    pub async fn initialize(&self) -> ChatResult<()> {
        self.inner.subscriptions.initialize().await
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.store.snapshot()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.inner.store.subscribe()
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.store.read(|s| s.directory().list().to_vec())
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.inner.store.read(|s| s.logs().messages(conversation_id).to_vec())
    }

    pub fn total_unread(&self) -> u32 {
        self.inner.store.read(|s| s.total_unread())
    }

    pub fn view(&self) -> View {
        self.inner.store.read(|s| s.navigator().view().clone())
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.store.read(|s| s.lifecycle())
    }

    /// `list → search`
    pub fn start_new_conversation(&self) -> ChatResult<()> {
        self.inner.store.mutate_live(|s| s.start_search())
    }

    /// `search → list`
    pub fn cancel_search(&self) -> ChatResult<()> {
        self.inner.store.mutate_live(|s| s.cancel_search())
    }

    /// Create or get the conversation with `target_user_id` and enter it
    pub async fn select_contact(&self, target_user_id: &str) -> ChatResult<ConversationId> {
        Validator::identifier("Target user id", target_user_id)?;

        let view = self.view();
        if view != View::Search {
            return Err(ChatError::invalid_transition(view.name(), "select a contact"));
        }

        let response = self
            .inner
            .backend
            .create_conversation(CreateConversationRequest {
                user_id: self.inner.user_id.clone(),
                target_user_id: target_user_id.to_string(),
            })
            .await?;
        let conversation_id = response.conversation_id;

        let inserted = self
            .inner
            .store
            .mutate_live(|s| Ok(s.ensure_conversation(&conversation_id, target_user_id)))?;

        if inserted {
            debug!(
                conversation_id = %conversation_id,
                created = response.created,
                "conversation added to directory"
            );
            // Fills in the other user's profile.
            let subscriptions = Arc::clone(&self.inner.subscriptions);
            self.inner.tasks.spawn(async move {
                if let Err(error) = subscriptions.refresh_directory().await {
                    warn!(%error, "directory refresh after create failed");
                }
            });
        }

        if let Err(error) = self.inner.subscriptions.ensure_subscribed(&conversation_id).await {
            if error == ChatError::SessionClosed {
                return Err(error);
            }
            warn!(conversation_id = %conversation_id, %error, "could not subscribe to new conversation");
        }

        let effects = self
            .inner
            .store
            .mutate_live(|s| s.enter_from_search(&conversation_id))?;
        self.run_effects(effects);
        Ok(conversation_id)
    }

    /// `list → chat`; unread is zeroed before this returns
    pub fn open_conversation(&self, conversation_id: &str) -> ChatResult<()> {
        let effects = self
            .inner
            .store
            .mutate_live(|s| s.open_conversation(conversation_id))?;
        self.run_effects(effects);
        Ok(())
    }

    /// `chat → list`
    pub fn back(&self) -> ChatResult<()> {
        self.inner.store.mutate_live(|s| s.back())
    }

    /// Zero unread locally and acknowledge in the background
    pub fn mark_read(&self, conversation_id: &str) -> ChatResult<u32> {
        let previous = self.inner.store.mutate_live(|s| s.mark_read(conversation_id))?;
        self.spawn_read_ack(conversation_id.to_string());
        Ok(previous)
    }

    pub fn send_message(&self, conversation_id: &str, draft: MessageDraft) -> ChatResult<PendingSend> {
        self.inner.pipeline.submit(conversation_id, draft)
    }

    pub fn set_composer(&self, text: impl Into<String>) -> ChatResult<()> {
        let text = text.into();
        self.inner.store.mutate_live(|s| {
            s.set_composer(text);
            Ok(())
        })
    }

    /// Send what is in the composer of the open conversation
    pub fn send_composer(&self) -> ChatResult<PendingSend> {
        self.inner.pipeline.submit_composer()
    }

    pub fn retry(&self, conversation_id: &str, message_id: &str) -> ChatResult<PendingSend> {
        self.inner.pipeline.retry(conversation_id, message_id)
    }

    pub async fn send_attachment(
        &self,
        conversation_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        caption: Option<String>,
    ) -> ChatResult<PendingSend> {
        self.inner
            .pipeline
            .submit_attachment(conversation_id, file_name, bytes, caption)
            .await
    }

    pub async fn refresh_directory(&self) -> ChatResult<()> {
        self.inner.subscriptions.refresh_directory().await
    }

    /// Wait for every background task started so far to finish
    pub async fn settle(&self) {
        self.inner.tasks.settle().await;
    }

    /// Tear the session down; later calls fail with `SessionClosed`
    pub fn logout(&self) {
        self.inner.subscriptions.teardown();
        self.inner.tasks.abort_all();
        info!(user_id = %self.inner.user_id, "logged out");
    }

    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.inner.subscriptions.subscribed_topics()
    }

    pub fn failed_subscriptions(&self) -> Vec<Topic> {
        self.inner.subscriptions.failed_subscriptions()
    }

    pub fn mode(&self) -> ChannelMode {
        self.inner.subscriptions.mode()
    }

    fn run_effects(&self, effects: Vec<NavigationEffect>) {
        for effect in effects {
            match effect {
                NavigationEffect::MarkRead(conversation_id) => self.spawn_read_ack(conversation_id),
                NavigationEffect::FetchHistory(conversation_id) => self.spawn_history_fetch(conversation_id),
            }
        }
    }

    fn spawn_read_ack(&self, conversation_id: ConversationId) {
        let backend = Arc::clone(&self.inner.backend);
        let store = self.inner.store.clone();
        let request = MarkReadRequest {
            conversation_id,
            user_id: self.inner.user_id.clone(),
        };

        self.inner.tasks.spawn(async move {
            let conversation_id = request.conversation_id.clone();
            match backend.mark_read(request).await {
                Ok(()) => {
                    store.mutate(|s| s.acknowledge_read(&conversation_id));
                    debug!(conversation_id = %conversation_id, "read acknowledged");
                }
                Err(error) => {
                    warn!(conversation_id = %conversation_id, %error, "read acknowledgement failed")
                }
            }
        });
    }

    fn spawn_history_fetch(&self, conversation_id: ConversationId) {
        let backend = Arc::clone(&self.inner.backend);
        let store = self.inner.store.clone();
        let page_size = self.inner.history_page_size;

        self.inner.tasks.spawn(async move {
            let mut messages = match backend.fetch_messages(&conversation_id).await {
                Ok(messages) => messages,
                Err(error) => {
                    warn!(conversation_id = %conversation_id, %error, "history fetch failed");
                    return;
                }
            };

            if page_size > 0 && messages.len() > page_size {
                messages.drain(..messages.len() - page_size);
            }

            match store.mutate_live(|s| Ok(s.load_history(&conversation_id, messages))) {
                Ok(len) => debug!(conversation_id = %conversation_id, len, "history loaded"),
                Err(error) => debug!(conversation_id = %conversation_id, %error, "history dropped"),
            }
        });
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("user_id", &self.inner.user_id)
            .field("lifecycle", &self.lifecycle())
            .field("subscriptions", &self.inner.subscriptions)
            .finish()
    }
}
