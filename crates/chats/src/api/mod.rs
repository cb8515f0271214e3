//! Boundaries to the outside world.
//!
//! The core talks to a request/response backend ([`ChatBackend`]), a
//! publish/subscribe channel ([`ChannelTransport`]) and an upload service
//! ([`AttachmentUploader`]). Each trait has a network implementation and an
//! in-process one used by tests and the console demo.

pub mod broker;
pub mod http;
pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::entities::{Attachment, Conversation, Message};
use crate::types::{
    ChannelEvent, ChatResult, CreateConversationRequest, CreateConversationResponse,
    MarkReadRequest, SendMessageRequest, Topic,
};

pub use broker::LocalBroker;
pub use http::HttpChatBackend;
pub use memory::InMemoryBackend;
pub use websocket::WebSocketTransport;

/// Request/response boundary to the chat backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Directory of the user, most recent first
    async fn fetch_conversations(&self, user_id: &str) -> ChatResult<Vec<Conversation>>;

    /// Full ordered history of a conversation
    async fn fetch_messages(&self, conversation_id: &str) -> ChatResult<Vec<Message>>;

    /// Persist a message; returns it with its permanent id
    async fn send_message(&self, request: SendMessageRequest) -> ChatResult<Message>;

    /// Best-effort read acknowledgement
    async fn mark_read(&self, request: MarkReadRequest) -> ChatResult<()>;

    /// Create-or-get the conversation between two users
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> ChatResult<CreateConversationResponse>;
}

/// Publish/subscribe boundary delivering `new-message` events
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> ChatResult<Subscription>;
}

/// Upload collaborator turning a file into an attachment reference
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ChatResult<Attachment>;
}

/// Stream of events for one topic.
///
/// Dropping the subscription stops the transport task feeding it, which
/// closes the underlying connection.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<ChatResult<ChannelEvent>>,
    reader: Option<AbortHandle>,
}

impl Subscription {
    /// Create a subscription and the sender a transport feeds it through
    pub fn channel(capacity: usize) -> (mpsc::Sender<ChatResult<ChannelEvent>>, Self) {
        let (sender, events) = mpsc::channel(capacity.max(1));
        (
            sender,
            Self {
                events,
                reader: None,
            },
        )
    }

    /// Tie the lifetime of the transport task to this subscription
    pub fn with_reader(mut self, reader: AbortHandle) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Next event, an error if the channel broke, `None` once it ended
    pub async fn next(&mut self) -> Option<ChatResult<ChannelEvent>> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
