//! Internal utilities for the chat core.
//!
//! This module contains the boundary normalization layer and validation
//! helpers used across multiple modules in the crate.

pub mod validation;
pub mod wire;

// Re-export utilities
pub use validation::*;
pub use wire::{
    conversations_from_value, decode_attachment_content, encode_attachment_content,
    message_from_value, messages_from_value, RawConversation, RawMessage,
};
