//! In-memory chat server used by tests and the console demo.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{AttachmentUploader, ChatBackend, LocalBroker};
use crate::entities::{Attachment, AttachmentKind, Conversation, LastMessage, Message, Profile};
use crate::types::{
    ChatError, ChatResult, ConversationId, CreateConversationRequest, CreateConversationResponse,
    MarkReadRequest, SendMessageRequest, Topic, UserId,
};
use crate::utils::Validator;

#[derive(Debug)]
struct StoredConversation {
    id: ConversationId,
    participants: [UserId; 2],
    unread: HashMap<UserId, u32>,
    last_message: Option<LastMessage>,
    updated_at: chrono::DateTime<Utc>,
}

impl StoredConversation {
    fn other(&self, user_id: &str) -> Option<&UserId> {
        self.participants.iter().find(|p| p.as_str() != user_id)
    }
}

#[derive(Debug, Default)]
struct ServerState {
    next_message: u64,
    next_conversation: u64,
    next_upload: u64,
    profiles: HashMap<UserId, Profile>,
    conversations: Vec<StoredConversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    failures: VecDeque<ChatError>,
}

/// Authoritative chat state kept in process.
///
/// Persisted messages get ids `m-{n}` and are published on the
/// conversation topic and on both participants' user topics when a broker
/// is attached.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<ServerState>,
    broker: Option<LocalBroker>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broker(broker: LocalBroker) -> Self {
        Self {
            state: Mutex::new(ServerState::default()),
            broker: Some(broker),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, profile: Profile) {
        self.lock().profiles.insert(profile.id.clone(), profile);
    }

    /// Create (or get) a conversation between two users
    pub fn seed_conversation(&self, user_id: &str, other_user_id: &str) -> ConversationId {
        let mut state = self.lock();
        Self::create_or_get(&mut state, user_id, other_user_id).0
    }

    /// Make the next `count` sends fail with `error`
    pub fn fail_next_sends(&self, count: usize, error: ChatError) {
        let mut state = self.lock();
        state.failures.extend(std::iter::repeat(error).take(count));
    }

    /// Persist a message from another user, as if sent from their device
    pub fn post_as(&self, sender_id: &str, conversation_id: &str, content: &str) -> ChatResult<Message> {
        self.persist(SendMessageRequest {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            attachment: None,
            client_ref: None,
        })
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.lock()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn unread_for(&self, user_id: &str, conversation_id: &str) -> u32 {
        let state = self.lock();
        state
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.unread.get(user_id).copied())
            .unwrap_or(0)
    }

    fn create_or_get(state: &mut ServerState, user_id: &str, other_user_id: &str) -> (ConversationId, bool) {
        if let Some(existing) = state.conversations.iter().find(|c| {
            c.participants.iter().any(|p| p == user_id) && c.participants.iter().any(|p| p == other_user_id)
        }) {
            return (existing.id.clone(), false);
        }

        state.next_conversation += 1;
        let id = format!("c-{}", state.next_conversation);
        state.conversations.push(StoredConversation {
            id: id.clone(),
            participants: [user_id.to_string(), other_user_id.to_string()],
            unread: HashMap::new(),
            last_message: None,
            updated_at: Utc::now(),
        });
        state.messages.insert(id.clone(), Vec::new());
        (id, true)
    }

    fn persist(&self, request: SendMessageRequest) -> ChatResult<Message> {
        let (message, topics) = {
            let mut state = self.lock();

            if let Some(error) = state.failures.pop_front() {
                return Err(error);
            }

            state.next_message += 1;
            let id = format!("m-{}", state.next_message);

            let conversation = state
                .conversations
                .iter_mut()
                .find(|c| c.id == request.conversation_id)
                .ok_or_else(|| ChatError::conversation_not_found(&request.conversation_id))?;

            if !conversation.participants.contains(&request.sender_id) {
                return Err(ChatError::rejected(403, "sender is not a participant"));
            }

            let mut message = Message::confirmed(
                id,
                request.conversation_id.clone(),
                request.sender_id.clone(),
                request.content,
                Utc::now(),
            );
            message.attachment = request.attachment;
            message.client_ref = request.client_ref;

            if let Some(recipient) = conversation.other(&request.sender_id).cloned() {
                *conversation.unread.entry(recipient).or_insert(0) += 1;
            }
            conversation.last_message = Some(LastMessage::from(&message));
            conversation.updated_at = message.created_at;

            let topics: Vec<Topic> = std::iter::once(Topic::conversation(&conversation.id))
                .chain(conversation.participants.iter().map(|p| Topic::user(p)))
                .collect();

            state
                .messages
                .entry(request.conversation_id)
                .or_default()
                .push(message.clone());
            (message, topics)
        };

        if let Some(broker) = &self.broker {
            let delivered = broker.publish_message(&topics, &message)?;
            debug!(message_id = %message.id, delivered, "message published");
        }
        Ok(message)
    }
}

#[async_trait]
impl ChatBackend for InMemoryBackend {
    async fn fetch_conversations(&self, user_id: &str) -> ChatResult<Vec<Conversation>> {
        let state = self.lock();
        let mut conversations: Vec<Conversation> = state
            .conversations
            .iter()
            .filter(|c| c.participants.iter().any(|p| p == user_id))
            .filter_map(|stored| {
                let other = stored.other(user_id)?;
                let profile = state
                    .profiles
                    .get(other)
                    .cloned()
                    .unwrap_or_else(|| Profile::placeholder(other.clone()));

                let mut conversation = Conversation::new(stored.id.clone(), user_id, profile, stored.updated_at)
                    .with_unread(stored.unread.get(user_id).copied().unwrap_or(0));
                conversation.last_message = stored.last_message.clone();
                Some(conversation)
            })
            .collect();

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn fetch_messages(&self, conversation_id: &str) -> ChatResult<Vec<Message>> {
        self.lock()
            .messages
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))
    }

    async fn send_message(&self, request: SendMessageRequest) -> ChatResult<Message> {
        self.persist(request)
    }

    async fn mark_read(&self, request: MarkReadRequest) -> ChatResult<()> {
        let mut state = self.lock();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == request.conversation_id)
            .ok_or_else(|| ChatError::conversation_not_found(&request.conversation_id))?;
        conversation.unread.insert(request.user_id, 0);
        Ok(())
    }

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> ChatResult<CreateConversationResponse> {
        request.validate().map_err(ChatError::validation)?;

        let mut state = self.lock();
        let (conversation_id, created) =
            Self::create_or_get(&mut state, &request.user_id, &request.target_user_id);
        Ok(CreateConversationResponse {
            conversation_id,
            created,
        })
    }
}

#[async_trait]
impl AttachmentUploader for InMemoryBackend {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ChatResult<Attachment> {
        Validator::file_name(file_name)?;
        Validator::file_size(bytes.len(), 25 * 1024 * 1024)?;

        let mut state = self.lock();
        state.next_upload += 1;
        Ok(Attachment::new(
            format!(
                "https://files.casa.local/{}/{}",
                state.next_upload,
                urlencoding::encode(file_name)
            ),
            AttachmentKind::from_file_name(file_name),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_or_get_returns_the_existing_conversation() {
        let backend = InMemoryBackend::new();
        let request = CreateConversationRequest {
            user_id: "u1".into(),
            target_user_id: "u2".into(),
        };

        let first = backend.create_conversation(request.clone()).await.unwrap();
        let second = backend
            .create_conversation(CreateConversationRequest {
                user_id: "u2".into(),
                target_user_id: "u1".into(),
            })
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.conversation_id, second.conversation_id);
    }

    #[tokio::test]
    async fn sends_assign_ids_and_count_unread_for_the_recipient() {
        let backend = InMemoryBackend::new();
        let conversation = backend.seed_conversation("u1", "u2");

        let message = backend
            .send_message(SendMessageRequest {
                conversation_id: conversation.clone(),
                sender_id: "u1".into(),
                content: "Olá".into(),
                attachment: None,
                client_ref: Some("tmp-1".into()),
            })
            .await
            .unwrap();

        assert_eq!(message.id, "m-1");
        assert_eq!(message.client_ref.as_deref(), Some("tmp-1"));
        assert_eq!(backend.unread_for("u2", &conversation), 1);
        assert_eq!(backend.unread_for("u1", &conversation), 0);

        let listed = backend.fetch_conversations("u2").await.unwrap();
        assert_eq!(listed[0].unread_count, 1);
        assert_eq!(listed[0].other_user.id, "u1");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let backend = InMemoryBackend::new();
        let conversation = backend.seed_conversation("u1", "u2");
        backend.fail_next_sends(1, ChatError::network("offline"));

        assert!(backend.post_as("u1", &conversation, "a").is_err());
        assert!(backend.post_as("u1", &conversation, "a").is_ok());
        assert!(matches!(
            backend.post_as("u3", &conversation, "intruder"),
            Err(ChatError::ServerRejection { status: 403, .. })
        ));
    }
}
