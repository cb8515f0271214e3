//! Error types for the chat synchronization core.

use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Main error type for the chat synchronization core.
///
/// Every variant is contained to the smallest affected unit: one message,
/// one conversation or one subscription. Nothing here is fatal to a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// The request never completed (connect, timeout, broken body).
    #[error("Network failure: {message}")]
    NetworkFailure { message: String },

    /// The server answered with a non-success status.
    #[error("Server rejected request with status {status}: {message}")]
    ServerRejection { status: u16, message: String },

    /// A channel for one topic could not be opened or broke down.
    #[error("Subscription to {topic} failed: {reason}")]
    SubscriptionFailure { topic: String, reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Message not found: {id}")]
    MessageNotFound { id: String },

    #[error("Cannot {action} while in the {from} view")]
    InvalidTransition { from: String, action: String },

    #[error("Chat session has been torn down")]
    SessionClosed,

    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    #[error("Background task failed: {message}")]
    TaskFailed { message: String },
}

impl ChatError {
    /// Create a network failure error
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure { message: message.into() }
    }

    /// Create a server rejection error
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::ServerRejection {
            status,
            message: message.into(),
        }
    }

    /// Create a subscription failure for a topic
    pub fn subscription(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscriptionFailure {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create a not found error for conversations
    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::ConversationNotFound { id: id.into() }
    }

    /// Create a not found error for messages
    pub fn message_not_found(id: impl Into<String>) -> Self {
        Self::MessageNotFound { id: id.into() }
    }

    /// Create an invalid navigation transition error
    pub fn invalid_transition(from: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            action: action.into(),
        }
    }

    /// Create a malformed payload error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload { message: message.into() }
    }

    /// Whether this failure means a send never reached a confirmed state.
    ///
    /// Network failures and server rejections are handled identically by the
    /// send pipeline; telling them apart is a presentation concern.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure { .. } | Self::ServerRejection { .. } | Self::MalformedPayload { .. }
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::rejected(status.as_u16(), err.to_string()),
            None if err.is_decode() => Self::malformed(err.to_string()),
            None => Self::network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed {
            message: err.to_string(),
        }
    }
}
