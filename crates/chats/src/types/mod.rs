//! Shared types and interfaces for the chat core.
//!
//! This module contains common types, error definitions, and boundary
//! payloads that are used across multiple modules in the crate.

pub mod errors;
pub mod events;
pub mod requests;
pub mod responses;

// Re-export common types
pub use errors::{ChatError, ChatResult};
pub use events::*;
pub use requests::*;
pub use responses::*;

// Common type aliases
pub type ConversationId = String;
pub type MessageId = String;
pub type UserId = String;
