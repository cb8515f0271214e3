use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, UserId};

/// Prefix of client-generated ids that have not been confirmed yet.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Represents a single message within a conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Temporary client id until confirmed, then the permanent server id
    pub id: MessageId,
    /// Conversation this message belongs to
    pub conversation_id: ConversationId,
    /// User who sent the message
    pub sender_id: UserId,
    /// Text content; empty for attachment-only messages
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Delivery status
    pub status: MessageStatus,
    /// Number of explicit user retries
    #[serde(default)]
    pub retry_count: u32,
    /// Attachment reference, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Correlation id generated at send time and echoed by confirmations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    /// When the latest send attempt for a local entry started
    #[serde(skip)]
    pub(crate) last_attempt_at: Option<DateTime<Utc>>,
}

/// Message delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Error,
}

impl MessageStatus {
    fn delivery_rank(self) -> u8 {
        match self {
            MessageStatus::Pending | MessageStatus::Error => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
        }
    }

    /// Whether the server has acknowledged the message
    pub fn is_confirmed(self) -> bool {
        self.delivery_rank() > 0
    }

    /// The further along of two statuses; confirmation never regresses
    pub fn furthest(self, other: MessageStatus) -> MessageStatus {
        if other.delivery_rank() > self.delivery_rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Error => "error",
        }
    }
}

impl From<&str> for MessageStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" | "sending" => MessageStatus::Pending,
            "delivered" => MessageStatus::Delivered,
            "read" | "seen" => MessageStatus::Read,
            "error" | "failed" => MessageStatus::Error,
            _ => MessageStatus::Sent,
        }
    }
}

/// Attachment kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Document,
}

impl From<&str> for AttachmentKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" | "img" | "photo" | "picture" => AttachmentKind::Image,
            _ => AttachmentKind::Document,
        }
    }
}

impl AttachmentKind {
    /// Guess the kind from a file name extension
    pub fn from_file_name(file_name: &str) -> Self {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" => AttachmentKind::Image,
            _ => AttachmentKind::Document,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Document => "document",
        }
    }
}

/// Reference to an uploaded file, as returned by the upload collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub kind: AttachmentKind,
}

impl Attachment {
    pub fn new(url: impl Into<String>, kind: AttachmentKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::new(url, AttachmentKind::Image)
    }

    pub fn document(url: impl Into<String>) -> Self {
        Self::new(url, AttachmentKind::Document)
    }

    /// Validate that the reference is an absolute http(s) URL
    pub fn validate(&self) -> Result<(), String> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| format!("Invalid attachment URL: {}", e))?;

        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(format!("Unsupported attachment URL scheme: {}", other)),
        }
    }
}

/// Normalized view of what a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageBody<'a> {
    Text(&'a str),
    Attachment {
        attachment: &'a Attachment,
        caption: Option<&'a str>,
    },
}

/// What the local user typed or picked before it becomes a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
        }
    }

    pub fn attachment(attachment: Attachment) -> Self {
        Self {
            content: String::new(),
            attachment: Some(attachment),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.content = caption.into();
        self
    }

    /// Validate draft data: non-empty content or a valid attachment reference
    pub fn validate(&self) -> Result<(), String> {
        if self.content.chars().count() > 10_000 {
            return Err("Message content too long (max 10,000 characters)".to_string());
        }

        match &self.attachment {
            Some(attachment) => attachment.validate(),
            None if self.content.trim().is_empty() => {
                Err("Message content cannot be empty".to_string())
            }
            None => Ok(()),
        }
    }
}

impl Message {
    /// Create a provisional message for a local send
    pub fn optimistic(
        conversation_id: impl Into<ConversationId>,
        sender_id: impl Into<UserId>,
        draft: MessageDraft,
        now: DateTime<Utc>,
    ) -> Self {
        let id = format!("{}{}", TEMP_ID_PREFIX, cuid2::create_id());
        Self {
            client_ref: Some(id.clone()),
            id,
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            content: draft.content,
            created_at: now,
            status: MessageStatus::Pending,
            retry_count: 0,
            attachment: draft.attachment,
            last_attempt_at: Some(now),
        }
    }

    /// Create a confirmed text message (server side or inbound)
    pub fn confirmed(
        id: impl Into<MessageId>,
        conversation_id: impl Into<ConversationId>,
        sender_id: impl Into<UserId>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            created_at,
            status: MessageStatus::Sent,
            retry_count: 0,
            attachment: None,
            client_ref: None,
            last_attempt_at: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    /// Check if this entry still carries a client-generated id
    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, MessageStatus::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, MessageStatus::Error)
    }

    /// Normalized body; attachment references are never parsed from text here
    pub fn body(&self) -> MessageBody<'_> {
        match &self.attachment {
            Some(attachment) => MessageBody::Attachment {
                attachment,
                caption: Some(self.content.as_str()).filter(|c| !c.trim().is_empty()),
            },
            None => MessageBody::Text(&self.content),
        }
    }

    /// Short text used for directory snippets
    pub fn snippet(&self) -> String {
        match self.body() {
            MessageBody::Text(text) => text.to_string(),
            MessageBody::Attachment { caption: Some(caption), .. } => caption.to_string(),
            MessageBody::Attachment { attachment, .. } => match attachment.kind {
                AttachmentKind::Image => "[image]".to_string(),
                AttachmentKind::Document => "[document]".to_string(),
            },
        }
    }

    /// Whether two entries carry the same content and attachment
    pub fn same_payload(&self, other: &Message) -> bool {
        self.content == other.content
            && self.attachment.as_ref().map(|a| a.url.as_str())
                == other.attachment.as_ref().map(|a| a.url.as_str())
    }

    /// Timestamp the recency heuristic measures against
    pub(crate) fn attempt_reference(&self) -> DateTime<Utc> {
        self.last_attempt_at.unwrap_or(self.created_at)
    }

    /// Draft that reproduces this entry's payload
    pub fn to_draft(&self) -> MessageDraft {
        MessageDraft {
            content: self.content.clone(),
            attachment: self.attachment.clone(),
        }
    }
}
