//! # Casa Chats Crate
//!
//! This crate provides the client-side chat synchronization core of the Casa
//! property marketplace. It keeps per-conversation message logs, the
//! conversation directory with unread counters, optimistic sends and the
//! realtime subscriptions consistent while network responses and channel
//! events arrive in any order.
//!
//! ## Architecture
//!
//! - **Entities**: Domain models (Message, Conversation, Attachment, etc.)
//! - **Store**: Message logs, directory and the shared state container
//! - **Services**: Send pipeline, subscriptions, navigation and the session
//! - **Api**: Request/response, publish/subscribe and upload boundaries
//! - **Types**: Shared types and interfaces
//! - **Utils**: Validation and wire-format coercion
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use casa_chats::{ChatSession, HttpChatBackend, MessageDraft, WebSocketTransport};
//!
//! # async fn run() -> casa_chats::ChatResult<()> {
//! let backend = Arc::new(HttpChatBackend::new("http://127.0.0.1:7070/api", std::time::Duration::from_secs(15))?);
//! let transport = Arc::new(WebSocketTransport::new("ws://127.0.0.1:7070/realtime", 256));
//!
//! let session = ChatSession::connect("u-1", backend, transport).await?;
//! session.open_conversation("c-1")?;
//! let pending = session.send_message("c-1", MessageDraft::text("Olá"))?;
//! pending.wait().await?;
//! session.logout();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod entities;
pub mod services;
pub mod store;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use api::{
    AttachmentUploader, ChannelTransport, ChatBackend, HttpChatBackend, InMemoryBackend, LocalBroker,
    Subscription, WebSocketTransport,
};
pub use casa_config::ChannelMode;
pub use entities::{
    Attachment, AttachmentKind, Conversation, LastMessage, Message, MessageBody, MessageDraft,
    MessageStatus, Profile,
};
pub use services::{
    ChatSession, ChatSessionBuilder, NavigationEffect, Navigator, PendingSend, SendPipeline,
    SubscriptionManager, View,
};
pub use store::{
    ChatSnapshot, ChatStore, ConversationDirectory, MessageLogStore, ReconcileOutcome, SharedStore,
};
pub use types::{
    ChannelEvent, ChatError, ChatResult, ConversationId, LifecycleState, MessageId, StoreUpdate, Topic,
    UserId,
};
