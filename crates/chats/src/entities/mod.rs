//! Domain entities for the chat core.
//!
//! Canonical message and conversation shapes. Everything arriving from the
//! request/response or publish/subscribe boundary is coerced into these
//! types before it reaches the stores.

pub mod conversation;
pub mod message;

// Re-export all entity types
pub use conversation::{Conversation, LastMessage, Profile};
pub use message::{
    Attachment, AttachmentKind, Message, MessageBody, MessageDraft, MessageStatus, TEMP_ID_PREFIX,
};
