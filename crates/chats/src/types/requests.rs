//! Request types for the request/response boundary.

use serde::{Deserialize, Serialize};

use crate::entities::{Attachment, Message};

/// Payload of `POST message`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Correlation id the confirmation is expected to echo back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl SendMessageRequest {
    /// Build the request for a locally held (pending or errored) entry
    pub fn for_entry(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            attachment: message.attachment.clone(),
            client_ref: message.client_ref.clone(),
        }
    }
}

/// Payload of `PATCH read`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub conversation_id: String,
    pub user_id: String,
}

/// Payload of `POST conversation` (create-or-get)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub user_id: String,
    pub target_user_id: String,
}

impl CreateConversationRequest {
    /// Validate the create request
    pub fn validate(&self) -> Result<(), String> {
        if self.target_user_id.trim().is_empty() {
            return Err("Target user cannot be empty".to_string());
        }

        if self.user_id == self.target_user_id {
            return Err("Cannot start a conversation with yourself".to_string());
        }

        Ok(())
    }
}
