//! Response types for the request/response boundary.

use serde::{Deserialize, Serialize};

/// Response of the create-or-get conversation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    #[serde(alias = "conversationId", alias = "id")]
    pub conversation_id: String,
    /// False when an existing conversation was returned
    #[serde(default)]
    pub created: bool,
}
