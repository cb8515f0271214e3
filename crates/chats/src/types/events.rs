//! Event types for the publish/subscribe boundary and store notifications.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ConversationId, UserId};

/// The only event type carried on a conversation topic.
pub const NEW_MESSAGE_EVENT: &str = "new-message";

/// Name of a publish/subscribe endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    const CONVERSATION_PREFIX: &'static str = "conversation:";
    const USER_PREFIX: &'static str = "user:";

    /// Topic delivering events for a single conversation
    pub fn conversation(conversation_id: &str) -> Self {
        Self(format!("{}{}", Self::CONVERSATION_PREFIX, conversation_id))
    }

    /// Multiplexed per-user topic
    pub fn user(user_id: &str) -> Self {
        Self(format!("{}{}", Self::USER_PREFIX, user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Conversation id encoded in a per-conversation topic
    pub fn conversation_id(&self) -> Option<&str> {
        self.0.strip_prefix(Self::CONVERSATION_PREFIX)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level event as delivered on a topic.
///
/// The payload is left untyped here; it is validated into a canonical
/// message at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

impl ChannelEvent {
    /// Build a `new-message` event
    pub fn new_message(payload: serde_json::Value) -> Self {
        Self {
            event: NEW_MESSAGE_EVENT.to_string(),
            payload,
        }
    }

    pub fn is_new_message(&self) -> bool {
        self.event == NEW_MESSAGE_EVENT
    }
}

/// Lifecycle of the channel subscription manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Active,
    TornDown,
}

/// Notification published after every store mutation so a UI layer can
/// recompute derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUpdate {
    /// Directory order, snippets or unread counters changed
    DirectoryChanged { total_unread: u32 },
    /// A conversation's message log changed
    LogChanged { conversation_id: ConversationId },
    /// The navigation state or composer changed
    ViewChanged,
    /// The subscription manager moved to a new lifecycle state
    Lifecycle(LifecycleState),
    /// The session identity was torn down
    SessionEnded { user_id: UserId },
}

impl StoreUpdate {
    /// Get event type name for logging
    pub fn event_type_name(&self) -> &'static str {
        match self {
            StoreUpdate::DirectoryChanged { .. } => "directory_changed",
            StoreUpdate::LogChanged { .. } => "log_changed",
            StoreUpdate::ViewChanged => "view_changed",
            StoreUpdate::Lifecycle(_) => "lifecycle",
            StoreUpdate::SessionEnded { .. } => "session_ended",
        }
    }
}
