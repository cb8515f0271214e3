//! JSON-over-HTTP backend client.

use std::time::Duration;

use async_trait::async_trait;
use casa_config::ApiConfig;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::debug;

use super::{AttachmentUploader, ChatBackend};
use crate::entities::{Attachment, AttachmentKind, Conversation, Message};
use crate::types::{
    ChatError, ChatResult, CreateConversationRequest, CreateConversationResponse,
    MarkReadRequest, SendMessageRequest,
};
use crate::utils::wire::{self, RawAttachment};

/// [`ChatBackend`] over the marketplace's REST API
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: Client,
    base_url: String,
}

impl HttpChatBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ChatError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> ChatResult<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn conversation_endpoint(&self, conversation_id: &str, suffix: &str) -> String {
        self.endpoint(&format!(
            "/conversations/{}{}",
            urlencoding::encode(conversation_id),
            suffix
        ))
    }

    /// Turn a response into JSON, mapping non-success statuses to rejections
    async fn read_json(response: Response) -> ChatResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            return Err(ChatError::rejected(status.as_u16(), message));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn fetch_conversations(&self, user_id: &str) -> ChatResult<Vec<Conversation>> {
        let response = self
            .client
            .get(self.endpoint("/conversations"))
            .query(&[("user_id", user_id)])
            .send()
            .await?;

        let conversations = wire::conversations_from_value(Self::read_json(response).await?, user_id)?;
        debug!(user_id = %user_id, count = conversations.len(), "fetched conversations");
        Ok(conversations)
    }

    async fn fetch_messages(&self, conversation_id: &str) -> ChatResult<Vec<Message>> {
        let response = self
            .client
            .get(self.conversation_endpoint(conversation_id, "/messages"))
            .send()
            .await?;

        let messages = wire::messages_from_value(Self::read_json(response).await?, conversation_id)?;
        debug!(conversation_id = %conversation_id, count = messages.len(), "fetched messages");
        Ok(messages)
    }

    async fn send_message(&self, request: SendMessageRequest) -> ChatResult<Message> {
        let conversation_id = request.conversation_id.clone();
        let response = self
            .client
            .post(self.endpoint("/messages"))
            .json(&request)
            .send()
            .await?;

        wire::message_from_value(Self::read_json(response).await?, Some(&conversation_id))
    }

    async fn mark_read(&self, request: MarkReadRequest) -> ChatResult<()> {
        let response = self
            .client
            .patch(self.conversation_endpoint(&request.conversation_id, "/read"))
            .json(&json!({ "user_id": request.user_id }))
            .send()
            .await?;

        Self::read_json(response).await.map(|_| ())
    }

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> ChatResult<CreateConversationResponse> {
        request.validate().map_err(ChatError::validation)?;

        let response = self
            .client
            .post(self.endpoint("/conversations"))
            .json(&request)
            .send()
            .await?;

        let value = wire::unwrap_envelope(Self::read_json(response).await?, &["conversation", "data"]);
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl AttachmentUploader for HttpChatBackend {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ChatResult<Attachment> {
        let response = self
            .client
            .post(self.endpoint("/attachments"))
            .query(&[("file_name", file_name)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        let value = wire::unwrap_envelope(Self::read_json(response).await?, &["attachment", "data"]);
        let raw: RawAttachment = serde_json::from_value(value)?;
        let kind = raw
            .kind
            .as_deref()
            .map(AttachmentKind::from)
            .unwrap_or_else(|| AttachmentKind::from_file_name(file_name));

        let attachment = Attachment::new(raw.url, kind);
        attachment.validate().map_err(ChatError::malformed)?;
        Ok(attachment)
    }
}
