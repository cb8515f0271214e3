//! Conversation directory: ordering, snippets and unread bookkeeping.

use std::collections::HashSet;

use tracing::debug;

use super::message_log::{MessageLogStore, ReconcileOutcome};
use crate::entities::{Conversation, Message};
use crate::types::{ChatError, ChatResult, ConversationId, UserId};

/// Conversations of the local user, sorted descending by `updated_at`
#[derive(Debug, Clone)]
pub struct ConversationDirectory {
    local_user_id: UserId,
    conversations: Vec<Conversation>,
    /// Zeroed locally; the server has not acknowledged the read yet
    unacknowledged_reads: HashSet<ConversationId>,
}

impl ConversationDirectory {
    pub fn new(local_user_id: impl Into<UserId>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            conversations: Vec::new(),
            unacknowledged_reads: HashSet::new(),
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Merge a fresh fetch into the directory.
    ///
    /// Conversations are never removed: known entries missing from the fetch
    /// are kept. Known entries are merged so local reads and newer local
    /// activity survive a stale server view. The active conversation stays
    /// read.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>, active: Option<&str>) {
        for fetched in conversations {
            let read_locally = self.unacknowledged_reads.contains(&fetched.id);
            match self.find_mut(&fetched.id) {
                Some(known) => known.merge_fetched(fetched, read_locally),
                None => self.conversations.push(fetched),
            }
        }
        if let Some(active) = active {
            if let Some(conversation) = self.find_mut(active) {
                conversation.unread_count = 0;
            }
        }
        self.sort();
        debug!(count = self.conversations.len(), "directory replaced");
    }

    /// Insert a conversation or merge it into the known entry
    pub fn insert_or_update(&mut self, conversation: Conversation) {
        match self.find_mut(&conversation.id) {
            Some(existing) => {
                existing.other_user = conversation.other_user;
                existing.participant_ids = conversation.participant_ids;
                if conversation.updated_at > existing.updated_at {
                    existing.updated_at = conversation.updated_at;
                    existing.last_message = conversation.last_message.or(existing.last_message.take());
                }
            }
            None => self.conversations.push(conversation),
        }
        self.sort();
    }

    /// Place an inbound message and update the conversation's metadata.
    ///
    /// The message is always routed into its log. Unread only grows for
    /// messages from the other participant that the log did not hold yet,
    /// and only while the conversation is not on screen.
    pub fn upsert_from_inbound_message(
        &mut self,
        conversation_id: &str,
        message: Message,
        is_active: bool,
        logs: &mut MessageLogStore,
    ) -> ChatResult<ReconcileOutcome> {
        if !self.contains(conversation_id) {
            return Err(ChatError::conversation_not_found(conversation_id));
        }

        let own_message = message.sender_id == self.local_user_id;
        let outcome = logs.reconcile(conversation_id, message);
        let placed = logs.messages(conversation_id)[outcome.index()].clone();

        let conversation = self
            .find_mut(conversation_id)
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;

        if !is_active && !own_message && outcome.is_new() {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        conversation.record_activity(&placed);

        debug!(
            conversation_id = %conversation_id,
            unread = conversation.unread_count,
            outcome = ?outcome,
            "inbound message placed"
        );
        self.sort();
        Ok(outcome)
    }

    /// Move the conversation up for a message that does not count as unread
    pub fn record_activity(&mut self, conversation_id: &str, message: &Message) -> ChatResult<()> {
        let conversation = self
            .find_mut(conversation_id)
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;
        conversation.record_activity(message);
        self.sort();
        Ok(())
    }

    /// Zero the unread counter; returns the previous value.
    ///
    /// The zero holds against later fetches until [`Self::acknowledge_read`].
    pub fn mark_read(&mut self, conversation_id: &str) -> ChatResult<u32> {
        let conversation = self
            .find_mut(conversation_id)
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;
        let previous = std::mem::take(&mut conversation.unread_count);
        self.unacknowledged_reads.insert(conversation_id.to_string());
        Ok(previous)
    }

    /// The server has recorded the read; fetched counts apply again
    pub fn acknowledge_read(&mut self, conversation_id: &str) {
        self.unacknowledged_reads.remove(conversation_id);
    }

    /// Sum of unread counters; derived, never cached
    pub fn recompute_total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.unread_count))
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn ids(&self) -> Vec<ConversationId> {
        self.conversations.iter().map(|c| c.id.clone()).collect()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.get(conversation_id).is_some()
    }

    /// Conversation shared with a given user, if any
    pub fn find_with(&self, user_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.other_user.id == user_id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn find_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }

    // Stable, so ties keep their previous relative order.
    fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
}
