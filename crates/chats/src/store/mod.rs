//! Session-scoped state container.
//!
//! [`ChatStore`] is plain synchronous state: message logs, the conversation
//! directory, the navigator and the subscription lifecycle. [`SharedStore`]
//! serializes every mutation behind one lock and publishes a
//! [`StoreUpdate`] for each change once the lock is released.

pub mod directory;
pub mod message_log;

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

pub use directory::ConversationDirectory;
pub use message_log::{MessageLogStore, ReconcileOutcome, DEFAULT_RECONCILE_WINDOW_MS};

use crate::entities::{Conversation, Message, MessageDraft, MessageStatus, Profile};
use crate::services::navigation::{NavigationEffect, Navigator, View};
use crate::types::{
    ChatError, ChatResult, ConversationId, LifecycleState, StoreUpdate, UserId,
};
use crate::utils::Validator;

/// Point-in-time copy of everything a UI renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSnapshot {
    pub user_id: UserId,
    pub view: View,
    pub composer: String,
    pub conversations: Vec<Conversation>,
    pub total_unread: u32,
    /// Log of the active conversation, empty outside the chat view
    pub active_messages: Vec<Message>,
    pub lifecycle: LifecycleState,
}

/// All chat state of one logged-in user
#[derive(Debug)]
pub struct ChatStore {
    local_user_id: UserId,
    logs: MessageLogStore,
    directory: ConversationDirectory,
    navigator: Navigator,
    lifecycle: LifecycleState,
    pending_updates: Vec<StoreUpdate>,
}

impl ChatStore {
    pub fn new(local_user_id: impl Into<UserId>, reconcile_window_ms: u64) -> Self {
        let local_user_id = local_user_id.into();
        Self {
            directory: ConversationDirectory::new(local_user_id.clone()),
            local_user_id,
            logs: MessageLogStore::new(reconcile_window_ms),
            navigator: Navigator::new(),
            lifecycle: LifecycleState::Uninitialized,
            pending_updates: Vec::new(),
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    pub fn logs(&self) -> &MessageLogStore {
        &self.logs
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    /// Background completions are dropped once the session is torn down
    pub fn is_live(&self) -> bool {
        self.lifecycle != LifecycleState::TornDown
    }

    pub fn total_unread(&self) -> u32 {
        self.directory.recompute_total_unread()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let active_messages = self
            .navigator
            .active_conversation()
            .map(|id| self.logs.messages(id).to_vec())
            .unwrap_or_default();

        ChatSnapshot {
            user_id: self.local_user_id.clone(),
            view: self.navigator.view().clone(),
            composer: self.navigator.composer().to_string(),
            conversations: self.directory.list().to_vec(),
            total_unread: self.total_unread(),
            active_messages,
            lifecycle: self.lifecycle,
        }
    }

    pub fn set_lifecycle(&mut self, state: LifecycleState) {
        if self.lifecycle != state {
            self.lifecycle = state;
            self.pending_updates.push(StoreUpdate::Lifecycle(state));
        }
    }

    /// Merge a fresh fetch into the directory; returns the known ids
    pub fn replace_directory(&mut self, conversations: Vec<Conversation>) -> Vec<ConversationId> {
        let active = self.navigator.active_conversation().map(str::to_string);
        self.directory.replace_all(conversations, active.as_deref());
        self.directory_changed();
        self.directory.ids()
    }

    /// Make sure a conversation resolved by create-or-get is listed
    pub fn ensure_conversation(&mut self, conversation_id: &str, other_user_id: &str) -> bool {
        if self.directory.contains(conversation_id) {
            return false;
        }

        self.directory.insert_or_update(Conversation::new(
            conversation_id,
            self.local_user_id.clone(),
            Profile::placeholder(other_user_id),
            Utc::now(),
        ));
        self.directory_changed();
        true
    }

    /// Place an inbound channel message
    pub fn apply_inbound(&mut self, message: Message) -> ChatResult<ReconcileOutcome> {
        let conversation_id = message.conversation_id.clone();
        let is_active = self.navigator.is_active(&conversation_id);

        let outcome = self.directory.upsert_from_inbound_message(
            &conversation_id,
            message,
            is_active,
            &mut self.logs,
        )?;

        self.log_changed(&conversation_id);
        self.directory_changed();
        Ok(outcome)
    }

    /// Place a message whose unread effect a fresh directory fetch already
    /// carries
    pub fn apply_fetched(&mut self, message: Message) -> ChatResult<ReconcileOutcome> {
        let conversation_id = message.conversation_id.clone();
        if !self.directory.contains(&conversation_id) {
            return Err(ChatError::conversation_not_found(&conversation_id));
        }

        let outcome = self.logs.reconcile(&conversation_id, message);
        let placed = self.logs.messages(&conversation_id)[outcome.index()].clone();
        self.directory.record_activity(&conversation_id, &placed)?;

        self.log_changed(&conversation_id);
        self.directory_changed();
        Ok(outcome)
    }

    /// Append a provisional entry for a local send
    pub fn append_optimistic(&mut self, conversation_id: &str, draft: MessageDraft) -> ChatResult<Message> {
        if !self.directory.contains(conversation_id) {
            return Err(ChatError::conversation_not_found(conversation_id));
        }

        let message = self.logs.append_optimistic(
            conversation_id,
            &self.local_user_id,
            draft,
            Utc::now(),
        )?;
        self.directory.record_activity(conversation_id, &message)?;

        self.log_changed(conversation_id);
        self.directory_changed();
        Ok(message)
    }

    /// Take the composer text of the active conversation as a provisional
    /// entry. The composer is only cleared once the draft is accepted.
    pub fn append_from_composer(&mut self) -> ChatResult<Message> {
        let conversation_id = self
            .navigator
            .active_conversation()
            .map(str::to_string)
            .ok_or_else(|| {
                ChatError::invalid_transition(self.navigator.view().name(), "send a message")
            })?;

        let draft = MessageDraft::text(self.navigator.composer());
        Validator::draft(&draft)?;

        let message = self.append_optimistic(&conversation_id, draft)?;
        self.navigator.take_composer();
        self.view_changed();
        Ok(message)
    }

    /// Apply the server's confirmation of a local send
    pub fn confirm_send(&mut self, conversation_id: &str, confirmed: Message) -> ReconcileOutcome {
        let outcome = self.logs.reconcile(conversation_id, confirmed);
        let placed = self.logs.messages(conversation_id)[outcome.index()].clone();
        // The conversation may have been created after the send started.
        let _ = self.directory.record_activity(conversation_id, &placed);

        self.log_changed(conversation_id);
        self.directory_changed();
        outcome
    }

    /// Mark a local send as failed
    pub fn fail_send(&mut self, conversation_id: &str, message_id: &str) -> ChatResult<Message> {
        let message = self
            .logs
            .mark_status(conversation_id, message_id, MessageStatus::Error, Utc::now())?;
        self.log_changed(conversation_id);
        Ok(message)
    }

    /// Move a failed entry back to pending for an explicit retry
    pub fn retry_send(&mut self, conversation_id: &str, message_id: &str) -> ChatResult<Message> {
        let current = self
            .logs
            .get(conversation_id, message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;

        if !current.is_failed() {
            return Err(ChatError::validation(format!(
                "Only failed messages can be retried; {} is {}",
                message_id,
                current.status.as_str()
            )));
        }

        let message = self
            .logs
            .mark_status(conversation_id, message_id, MessageStatus::Pending, Utc::now())?;
        self.log_changed(conversation_id);
        Ok(message)
    }

    /// Merge a fetched history
    pub fn load_history(&mut self, conversation_id: &str, messages: Vec<Message>) -> usize {
        let len = self.logs.load_history(conversation_id, messages);
        if let Some(last) = self.logs.messages(conversation_id).last().cloned() {
            let _ = self.directory.record_activity(conversation_id, &last);
            self.directory_changed();
        }
        self.log_changed(conversation_id);
        len
    }

    /// Zero the unread counter of a conversation
    pub fn mark_read(&mut self, conversation_id: &str) -> ChatResult<u32> {
        let previous = self.directory.mark_read(conversation_id)?;
        if previous > 0 {
            self.directory_changed();
        }
        Ok(previous)
    }

    /// Record that the server accepted a read acknowledgement
    pub fn acknowledge_read(&mut self, conversation_id: &str) {
        self.directory.acknowledge_read(conversation_id);
    }

    pub fn start_search(&mut self) -> ChatResult<()> {
        self.navigator.start_search()?;
        self.view_changed();
        Ok(())
    }

    pub fn cancel_search(&mut self) -> ChatResult<()> {
        self.navigator.cancel_search()?;
        self.view_changed();
        Ok(())
    }

    /// `list → chat`; read state is applied before this returns
    pub fn open_conversation(&mut self, conversation_id: &str) -> ChatResult<Vec<NavigationEffect>> {
        if !self.directory.contains(conversation_id) {
            return Err(ChatError::conversation_not_found(conversation_id));
        }

        let loaded = self.logs.is_loaded(conversation_id);
        let effects = self.navigator.open_conversation(conversation_id, loaded)?;
        self.after_entering(effects)
    }

    /// `search → chat`
    pub fn enter_from_search(&mut self, conversation_id: &str) -> ChatResult<Vec<NavigationEffect>> {
        if !self.directory.contains(conversation_id) {
            return Err(ChatError::conversation_not_found(conversation_id));
        }

        let loaded = self.logs.is_loaded(conversation_id);
        let effects = self.navigator.enter_from_search(conversation_id, loaded)?;
        self.after_entering(effects)
    }

    pub fn back(&mut self) -> ChatResult<()> {
        self.navigator.back()?;
        self.view_changed();
        Ok(())
    }

    pub fn set_composer(&mut self, text: impl Into<String>) {
        self.navigator.set_composer(text);
        self.view_changed();
    }

    /// Drain notifications collected during the last mutation
    pub(crate) fn take_updates(&mut self) -> Vec<StoreUpdate> {
        std::mem::take(&mut self.pending_updates)
    }

    pub(crate) fn end_session(&mut self) {
        self.set_lifecycle(LifecycleState::TornDown);
        self.pending_updates.push(StoreUpdate::SessionEnded {
            user_id: self.local_user_id.clone(),
        });
    }

    fn after_entering(&mut self, effects: Vec<NavigationEffect>) -> ChatResult<Vec<NavigationEffect>> {
        for effect in &effects {
            if let NavigationEffect::MarkRead(conversation_id) = effect {
                self.mark_read(conversation_id)?;
            }
        }
        self.view_changed();
        Ok(effects)
    }

    fn directory_changed(&mut self) {
        let total_unread = self.total_unread();
        self.pending_updates.push(StoreUpdate::DirectoryChanged { total_unread });
    }

    fn log_changed(&mut self, conversation_id: &str) {
        self.pending_updates.push(StoreUpdate::LogChanged {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn view_changed(&mut self) {
        self.pending_updates.push(StoreUpdate::ViewChanged);
    }
}

/// Cloneable handle serializing access to a [`ChatStore`].
///
/// The lock is never held across an `.await`; callers pass a synchronous
/// closure that runs to completion.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<ChatStore>>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl SharedStore {
    pub fn new(store: ChatStore, update_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(update_capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(store)),
            updates,
        }
    }

    /// Read state without publishing anything
    pub fn read<R>(&self, f: impl FnOnce(&ChatStore) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    /// Run one mutation and publish its notifications
    pub fn mutate<R>(&self, f: impl FnOnce(&mut ChatStore) -> R) -> R {
        let (result, updates) = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut *guard);
            (result, guard.take_updates())
        };

        for update in updates {
            // No receivers is fine; nobody is rendering.
            let _ = self.updates.send(update);
        }
        result
    }

    /// Like [`SharedStore::mutate`], but refuses once the session is torn down
    pub fn mutate_live<R>(&self, f: impl FnOnce(&mut ChatStore) -> ChatResult<R>) -> ChatResult<R> {
        self.mutate(|store| {
            if store.is_live() {
                f(store)
            } else {
                Err(ChatError::SessionClosed)
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.read(ChatStore::snapshot)
    }
}
