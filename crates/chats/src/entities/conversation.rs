use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::types::{ConversationId, UserId};

/// Read-only profile projection of the other participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Profile {
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Profile for a user we only know by id
    pub fn placeholder(id: impl Into<UserId>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            avatar_url: None,
        }
    }
}

/// Snippet of the most recent message shown in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Unknown when the directory only reports a plain snippet
    #[serde(default)]
    pub sender_id: Option<UserId>,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            content: message.snippet(),
            created_at: message.created_at,
            sender_id: Some(message.sender_id.clone()),
        }
    }
}

/// A two-party thread with its directory-level metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Both participants; order carries no meaning
    pub participant_ids: [UserId; 2],
    pub other_user: Profile,
    pub last_message: Option<LastMessage>,
    /// Unread messages from the local user's perspective
    pub unread_count: u32,
    /// Directory sort key
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation entry between the local user and `other_user`
    pub fn new(
        id: impl Into<ConversationId>,
        local_user_id: impl Into<UserId>,
        other_user: Profile,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            participant_ids: [local_user_id.into(), other_user.id.clone()],
            other_user,
            last_message: None,
            unread_count: 0,
            updated_at,
        }
    }

    pub fn with_unread(mut self, unread_count: u32) -> Self {
        self.unread_count = unread_count;
        self
    }

    /// Check if a user takes part in this conversation
    pub fn includes(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }

    /// Record a message as the latest activity.
    ///
    /// The sort key only moves forward, so a late confirmation for an older
    /// message cannot push the conversation down the list.
    pub(crate) fn record_activity(&mut self, message: &Message) {
        let newer_snippet = self
            .last_message
            .as_ref()
            .map_or(true, |last| message.created_at >= last.created_at);

        if newer_snippet {
            self.last_message = Some(LastMessage::from(message));
        }

        if message.created_at > self.updated_at {
            self.updated_at = message.created_at;
        }
    }

    /// Merge a fetched copy of this conversation into the local entry.
    ///
    /// Whichever side saw the later activity keeps its unread count, and a
    /// locally read conversation keeps its count until the server has
    /// acknowledged the read. The sort key and snippet never move back.
    pub(crate) fn merge_fetched(&mut self, fetched: Conversation, read_locally: bool) {
        let local_is_newer = self.updated_at > fetched.updated_at;
        if !read_locally && !local_is_newer {
            self.unread_count = fetched.unread_count;
        }

        let fetched_snippet_is_newer = match (&self.last_message, &fetched.last_message) {
            (Some(local), Some(remote)) => remote.created_at > local.created_at,
            (None, Some(_)) => true,
            (_, None) => false,
        };
        if fetched_snippet_is_newer {
            self.last_message = fetched.last_message;
        }

        self.updated_at = self.updated_at.max(fetched.updated_at);
        self.participant_ids = fetched.participant_ids;
        self.other_user = fetched.other_user;
    }
}
