//! Boundary normalization for loosely typed payloads.
//!
//! The backend and the realtime channel disagree on field names, send ids as
//! strings or numbers and timestamps as RFC 3339 strings or epoch millis.
//! Everything is coerced here into the canonical entities; the stores never
//! see a raw payload.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::entities::{Attachment, AttachmentKind, Conversation, LastMessage, Message, MessageStatus, Profile};
use crate::types::{ChatError, ChatResult};

/// Separator between kind and URL in text-encoded attachment references.
pub const ATTACHMENT_SEPARATOR: char = '|';

/// Message payload as it may arrive from either boundary
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, alias = "_id", alias = "messageId", alias = "message_id")]
    pub id: Option<Value>,
    #[serde(default, alias = "conversationId", alias = "chat_id", alias = "chatId")]
    pub conversation_id: Option<Value>,
    #[serde(default, alias = "senderId", alias = "user_id", alias = "userId", alias = "from")]
    pub sender_id: Option<Value>,
    #[serde(default, alias = "text", alias = "body")]
    pub content: Option<String>,
    #[serde(default, alias = "createdAt", alias = "timestamp", alias = "sent_at")]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "clientRef", alias = "temp_id", alias = "tempId")]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub attachment: Option<RawAttachment>,
    #[serde(default, alias = "attachmentUrl", alias = "file_url", alias = "fileUrl")]
    pub attachment_url: Option<String>,
    #[serde(default, alias = "attachmentType", alias = "file_type", alias = "fileType")]
    pub attachment_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAttachment {
    #[serde(alias = "href", alias = "link")]
    pub url: String,
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
}

/// Profile projection as embedded in a conversation payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProfile {
    #[serde(default, alias = "_id", alias = "user_id", alias = "userId")]
    pub id: Option<Value>,
    #[serde(
        default,
        alias = "displayName",
        alias = "name",
        alias = "full_name",
        alias = "fullName",
        alias = "username"
    )]
    pub display_name: Option<String>,
    #[serde(default, alias = "avatarUrl", alias = "avatar", alias = "photo_url")]
    pub avatar_url: Option<String>,
}

/// Conversation payload as returned by the directory fetch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConversation {
    #[serde(default, alias = "_id", alias = "conversationId", alias = "conversation_id")]
    pub id: Option<Value>,
    #[serde(default, alias = "participantIds", alias = "participants")]
    pub participant_ids: Option<Vec<Value>>,
    #[serde(default, alias = "user1Id")]
    pub user1_id: Option<Value>,
    #[serde(default, alias = "user2Id")]
    pub user2_id: Option<Value>,
    #[serde(default, alias = "otherUser", alias = "other_participant", alias = "contact")]
    pub other_user: Option<RawProfile>,
    #[serde(default, alias = "lastMessage")]
    pub last_message: Option<Value>,
    #[serde(default, alias = "lastMessageAt")]
    pub last_message_at: Option<Value>,
    #[serde(default, alias = "unreadCount", alias = "unread")]
    pub unread_count: Option<Value>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<Value>,
}

impl RawMessage {
    /// Coerce into a canonical, confirmed message.
    ///
    /// `fallback_conversation` is used when the payload omits its
    /// conversation id (per-conversation topics and history fetches).
    pub fn into_message(self, fallback_conversation: Option<&str>) -> ChatResult<Message> {
        let id = coerce_id(self.id).ok_or_else(|| ChatError::malformed("message payload has no id"))?;

        let conversation_id = coerce_id(self.conversation_id)
            .or_else(|| fallback_conversation.map(str::to_string))
            .ok_or_else(|| ChatError::malformed(format!("message {} has no conversation id", id)))?;

        let sender_id = coerce_id(self.sender_id)
            .ok_or_else(|| ChatError::malformed(format!("message {} has no sender", id)))?;

        let mut content = self.content.unwrap_or_default();

        let mut attachment = match (self.attachment, self.attachment_url) {
            (Some(raw), _) => Some(Attachment::new(
                raw.url,
                raw.kind.as_deref().map(AttachmentKind::from).unwrap_or(AttachmentKind::Document),
            )),
            (None, Some(url)) => Some(Attachment::new(
                url,
                self.attachment_type
                    .as_deref()
                    .map(AttachmentKind::from)
                    .unwrap_or(AttachmentKind::Document),
            )),
            (None, None) => None,
        };

        if attachment.is_none() {
            if let Some(decoded) = decode_attachment_content(&content) {
                attachment = Some(decoded);
                content.clear();
            }
        }

        if content.trim().is_empty() && attachment.is_none() {
            return Err(ChatError::malformed(format!(
                "message {} has neither content nor attachment",
                id
            )));
        }

        // Anything the server hands us has been persisted.
        let status = self
            .status
            .as_deref()
            .map(MessageStatus::from)
            .unwrap_or(MessageStatus::Sent)
            .furthest(MessageStatus::Sent);

        let mut message = Message::confirmed(
            id,
            conversation_id,
            sender_id,
            content,
            coerce_timestamp(self.created_at).unwrap_or_else(Utc::now),
        );
        message.status = status;
        message.attachment = attachment;
        message.client_ref = self.client_ref.filter(|r| !r.trim().is_empty());

        Ok(message)
    }
}

impl RawConversation {
    /// Coerce into a canonical conversation seen from `local_user_id`
    pub fn into_conversation(self, local_user_id: &str) -> ChatResult<Conversation> {
        let id = coerce_id(self.id)
            .ok_or_else(|| ChatError::malformed("conversation payload has no id"))?;

        let participants: Vec<String> = match self.participant_ids {
            Some(values) => values.into_iter().filter_map(coerce_participant).collect(),
            None => [self.user1_id, self.user2_id]
                .into_iter()
                .filter_map(coerce_id)
                .collect(),
        };
        let other_participant = participants.into_iter().find(|p| p != local_user_id);

        let other_user = match self.other_user {
            Some(raw) => {
                let profile_id = coerce_id(raw.id).or(other_participant).ok_or_else(|| {
                    ChatError::malformed(format!("conversation {} has no other participant", id))
                })?;
                Profile {
                    display_name: raw
                        .display_name
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| profile_id.clone()),
                    id: profile_id,
                    avatar_url: raw.avatar_url,
                }
            }
            None => Profile::placeholder(other_participant.ok_or_else(|| {
                ChatError::malformed(format!("conversation {} has no other participant", id))
            })?),
        };

        let last_message_at = coerce_timestamp(self.last_message_at);
        let last_message = self
            .last_message
            .and_then(|value| coerce_last_message(value, last_message_at));

        let updated_at = coerce_timestamp(self.updated_at)
            .or(last_message_at)
            .or_else(|| last_message.as_ref().map(|m| m.created_at))
            .unwrap_or_else(Utc::now);

        let mut conversation = Conversation::new(id, local_user_id, other_user, updated_at)
            .with_unread(coerce_count(self.unread_count));
        conversation.last_message = last_message;

        Ok(conversation)
    }
}

/// Parse a single message payload, unwrapping `{message: ..}`/`{data: ..}` envelopes
pub fn message_from_value(value: Value, fallback_conversation: Option<&str>) -> ChatResult<Message> {
    let value = unwrap_envelope(value, &["message", "data"]);
    let raw: RawMessage = serde_json::from_value(value)?;
    raw.into_message(fallback_conversation)
}

/// Parse a message list; malformed entries are skipped and logged
pub fn messages_from_value(value: Value, conversation_id: &str) -> ChatResult<Vec<Message>> {
    let items = list_items(value, &["messages", "data"])?;
    let mut messages = Vec::with_capacity(items.len());

    for item in items {
        match message_from_value(item, Some(conversation_id)) {
            Ok(message) => messages.push(message),
            Err(error) => tracing::warn!(conversation_id = %conversation_id, %error, "skipping malformed message"),
        }
    }

    Ok(messages)
}

/// Parse a conversation list; malformed entries are skipped and logged
pub fn conversations_from_value(value: Value, local_user_id: &str) -> ChatResult<Vec<Conversation>> {
    let items = list_items(value, &["conversations", "data"])?;
    let mut conversations = Vec::with_capacity(items.len());

    for item in items {
        let parsed = serde_json::from_value::<RawConversation>(item)
            .map_err(ChatError::from)
            .and_then(|raw| raw.into_conversation(local_user_id));

        match parsed {
            Ok(conversation) => conversations.push(conversation),
            Err(error) => tracing::warn!(user_id = %local_user_id, %error, "skipping malformed conversation"),
        }
    }

    Ok(conversations)
}

/// Encode an attachment reference into message text
pub fn encode_attachment_content(attachment: &Attachment) -> String {
    format!("{}{}{}", attachment.kind.as_str(), ATTACHMENT_SEPARATOR, attachment.url)
}

/// Decode `<kind>|<url>` message text into an attachment reference
pub fn decode_attachment_content(content: &str) -> Option<Attachment> {
    let (kind, url) = content.trim().split_once(ATTACHMENT_SEPARATOR)?;
    let kind = match kind.to_lowercase().as_str() {
        "image" | "img" | "photo" => AttachmentKind::Image,
        "document" | "doc" | "file" | "pdf" => AttachmentKind::Document,
        _ => return None,
    };

    let attachment = Attachment::new(url.trim(), kind);
    attachment.validate().ok()?;
    Some(attachment)
}

pub(crate) fn unwrap_envelope(value: Value, keys: &[&str]) -> Value {
    if let Value::Object(map) = &value {
        if let Some(inner) = keys.iter().find_map(|k| map.get(*k)).filter(|v| v.is_object()) {
            return inner.clone();
        }
    }
    value
}

fn list_items(value: Value, keys: &[&str]) -> ChatResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| ChatError::malformed(format!("expected a list under one of {:?}", keys))),
        other => Err(ChatError::malformed(format!("expected a list, got {}", other))),
    }
}

fn coerce_id(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_participant(value: Value) -> Option<String> {
    match value {
        Value::Object(mut map) => ["id", "user_id", "userId"]
            .iter()
            .find_map(|k| coerce_id(map.remove(*k))),
        other => coerce_id(Some(other)),
    }
}

fn coerce_count(value: Option<Value>) -> u32 {
    let count = match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    };
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn coerce_timestamp(value: Option<Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            })
            .or_else(|| s.trim().parse::<i64>().ok().and_then(from_epoch_millis)),
        Value::Number(n) => n.as_i64().and_then(from_epoch_millis),
        _ => None,
    }
}

fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn coerce_last_message(value: Value, fallback_at: Option<DateTime<Utc>>) -> Option<LastMessage> {
    match value {
        Value::String(content) => Some(LastMessage {
            content: snippet_for(&content),
            created_at: fallback_at.unwrap_or_else(Utc::now),
            sender_id: None,
        }),
        Value::Object(_) => {
            let raw: RawMessage = serde_json::from_value(value).ok()?;
            let created_at = coerce_timestamp(raw.created_at).or(fallback_at).unwrap_or_else(Utc::now);
            Some(LastMessage {
                content: snippet_for(raw.content.as_deref().unwrap_or_default()),
                created_at,
                sender_id: coerce_id(raw.sender_id),
            })
        }
        _ => None,
    }
}

fn snippet_for(content: &str) -> String {
    match decode_attachment_content(content) {
        Some(attachment) => match attachment.kind {
            AttachmentKind::Image => "[image]".to_string(),
            AttachmentKind::Document => "[document]".to_string(),
        },
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_ids_and_epoch_timestamps_are_coerced() {
        let message = message_from_value(
            json!({ "id": 42, "chatId": 7, "userId": 3, "text": "Olá", "createdAt": 1_700_000_000_000i64 }),
            None,
        )
        .unwrap();

        assert_eq!(message.id, "42");
        assert_eq!(message.conversation_id, "7");
        assert_eq!(message.sender_id, "3");
        assert_eq!(message.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(message.status, MessageStatus::Sent);
    }

    #[test]
    fn separator_encoded_content_becomes_an_attachment() {
        let message = message_from_value(
            json!({ "id": "m-1", "sender_id": "u2", "content": "image|https://cdn.example.com/sala.jpg" }),
            Some("c1"),
        )
        .unwrap();

        assert_eq!(message.conversation_id, "c1");
        assert_eq!(message.content, "");
        assert_eq!(
            message.attachment,
            Some(Attachment::image("https://cdn.example.com/sala.jpg"))
        );
    }

    #[test]
    fn plain_text_with_a_pipe_stays_text() {
        assert!(decode_attachment_content("a | b").is_none());
        assert!(decode_attachment_content("image|not a url").is_none());

        let attachment = Attachment::document("https://cdn.example.com/contrato.pdf");
        assert_eq!(
            decode_attachment_content(&encode_attachment_content(&attachment)),
            Some(attachment)
        );
    }

    #[test]
    fn payloads_without_body_are_rejected() {
        let err = message_from_value(json!({ "id": "m-1", "sender_id": "u2" }), Some("c1")).unwrap_err();
        assert!(matches!(err, ChatError::MalformedPayload { .. }));

        let err = message_from_value(json!({ "content": "hi", "sender_id": "u2" }), Some("c1")).unwrap_err();
        assert!(matches!(err, ChatError::MalformedPayload { .. }));
    }

    #[test]
    fn envelopes_are_unwrapped() {
        let message = message_from_value(
            json!({ "data": { "id": "m-9", "conversation_id": "c1", "sender_id": "u1", "content": "ok", "client_ref": "tmp-abc" } }),
            None,
        )
        .unwrap();
        assert_eq!(message.id, "m-9");
        assert_eq!(message.client_ref.as_deref(), Some("tmp-abc"));
    }

    #[test]
    fn conversations_resolve_the_other_participant() {
        let conversations = conversations_from_value(
            json!({ "data": [
                {
                    "id": "c1",
                    "user1_id": "u1",
                    "user2_id": "u2",
                    "last_message": "image|https://cdn.example.com/p.png",
                    "last_message_at": "2024-05-01T10:00:00Z",
                    "unread_count": "3"
                },
                {
                    "conversationId": 2,
                    "participants": [{ "id": "u3" }, { "id": "u1" }],
                    "otherUser": { "name": "Rita" },
                    "updatedAt": "2024-05-01 09:00:00"
                },
                { "unread": 1 }
            ]}),
            "u1",
        )
        .unwrap();

        assert_eq!(conversations.len(), 2);

        let first = &conversations[0];
        assert_eq!(first.other_user.id, "u2");
        assert_eq!(first.participant_ids, ["u1".to_string(), "u2".to_string()]);
        assert_eq!(first.unread_count, 3);
        assert_eq!(first.last_message.as_ref().map(|m| m.content.as_str()), Some("[image]"));
        assert_eq!(first.updated_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let second = &conversations[1];
        assert_eq!(second.id, "2");
        assert_eq!(second.other_user.id, "u3");
        assert_eq!(second.other_user.display_name, "Rita");
    }
}
