//! Optimistic send pipeline.
//!
//! `pending --2xx--> sent`, `pending --failure--> error`,
//! `error --retry--> pending`. The provisional entry is appended and the
//! input cleared before any network work starts; each send then runs on its
//! own task and reconciles independently of the others.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::BackgroundTasks;
use crate::api::{AttachmentUploader, ChatBackend};
use crate::entities::{Message, MessageDraft};
use crate::store::SharedStore;
use crate::types::{ChatError, ChatResult, SendMessageRequest};
use crate::utils::Validator;

const MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

/// Handle to a send in flight
#[derive(Debug)]
pub struct PendingSend {
    message: Message,
    outcome: oneshot::Receiver<ChatResult<Message>>,
}

impl PendingSend {
    /// The provisional entry as appended
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Temporary id of the provisional entry
    pub fn message_id(&self) -> &str {
        &self.message.id
    }

    /// Wait for the network call; yields the entry as placed in the log
    pub async fn wait(self) -> ChatResult<Message> {
        self.outcome.await.unwrap_or_else(|_| {
            Err(ChatError::TaskFailed {
                message: "send task was cancelled".to_string(),
            })
        })
    }
}

pub struct SendPipeline {
    store: SharedStore,
    backend: Arc<dyn ChatBackend>,
    uploader: Option<Arc<dyn AttachmentUploader>>,
    tasks: Arc<BackgroundTasks>,
}

impl SendPipeline {
    pub(crate) fn new(
        store: SharedStore,
        backend: Arc<dyn ChatBackend>,
        uploader: Option<Arc<dyn AttachmentUploader>>,
        tasks: Arc<BackgroundTasks>,
    ) -> Self {
        Self {
            store,
            backend,
            uploader,
            tasks,
        }
    }

    /// Append a provisional entry and send it
    pub fn submit(&self, conversation_id: &str, draft: MessageDraft) -> ChatResult<PendingSend> {
        let message = self
            .store
            .mutate_live(|s| s.append_optimistic(conversation_id, draft))?;
        Ok(self.dispatch(message))
    }

    /// Send the composer contents of the active conversation
    pub fn submit_composer(&self) -> ChatResult<PendingSend> {
        let message = self.store.mutate_live(|s| s.append_from_composer())?;
        Ok(self.dispatch(message))
    }

    /// Re-issue a failed entry with its original content and correlation id
    pub fn retry(&self, conversation_id: &str, message_id: &str) -> ChatResult<PendingSend> {
        let message = self
            .store
            .mutate_live(|s| s.retry_send(conversation_id, message_id))?;
        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            retry_count = message.retry_count,
            "retrying send"
        );
        Ok(self.dispatch(message))
    }

    /// Upload a file, then send the returned reference
    pub async fn submit_attachment(
        &self,
        conversation_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        caption: Option<String>,
    ) -> ChatResult<PendingSend> {
        let uploader = self
            .uploader
            .as_ref()
            .ok_or_else(|| ChatError::validation("No attachment uploader configured"))?;

        Validator::file_name(file_name)?;
        Validator::file_size(bytes.len(), MAX_ATTACHMENT_BYTES)?;

        let attachment = uploader.upload(file_name, bytes).await?;
        let draft = match caption {
            Some(caption) => MessageDraft::attachment(attachment).with_caption(caption),
            None => MessageDraft::attachment(attachment),
        };
        self.submit(conversation_id, draft)
    }

    fn dispatch(&self, message: Message) -> PendingSend {
        let (sender, outcome) = oneshot::channel();
        let store = self.store.clone();
        let backend = Arc::clone(&self.backend);
        let local = message.clone();

        self.tasks.spawn(async move {
            let result = deliver(&store, backend.as_ref(), local).await;
            let _ = sender.send(result);
        });

        PendingSend { message, outcome }
    }
}

async fn deliver(store: &SharedStore, backend: &dyn ChatBackend, local: Message) -> ChatResult<Message> {
    let conversation_id = local.conversation_id.clone();

    match backend.send_message(SendMessageRequest::for_entry(&local)).await {
        Ok(mut confirmed) => {
            // This response answers this request, echoed or not.
            if confirmed.client_ref.is_none() {
                confirmed.client_ref = local.client_ref.clone();
            }

            let placed = store.mutate_live(|s| {
                let outcome = s.confirm_send(&conversation_id, confirmed);
                Ok(s.logs().messages(&conversation_id)[outcome.index()].clone())
            })?;

            debug!(
                conversation_id = %conversation_id,
                temporary_id = %local.id,
                message_id = %placed.id,
                "send confirmed"
            );
            Ok(placed)
        }
        Err(error) => {
            warn!(
                conversation_id = %conversation_id,
                message_id = %local.id,
                %error,
                "send failed"
            );

            if let Err(mark_error) = store.mutate_live(|s| s.fail_send(&conversation_id, &local.id)) {
                debug!(message_id = %local.id, error = %mark_error, "could not mark send as failed");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryBackend;
    use crate::entities::{MessageStatus, Profile};
    use crate::store::{ChatStore, DEFAULT_RECONCILE_WINDOW_MS};

    fn pipeline() -> (SendPipeline, SharedStore, Arc<InMemoryBackend>, String) {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_user(Profile::new("u2", "Marta"));
        let conversation = backend.seed_conversation("u1", "u2");

        let mut store = ChatStore::new("u1", DEFAULT_RECONCILE_WINDOW_MS);
        store.ensure_conversation(&conversation, "u2");
        let store = SharedStore::new(store, 16);

        let pipeline = SendPipeline::new(
            store.clone(),
            backend.clone(),
            Some(backend.clone()),
            Arc::new(BackgroundTasks::default()),
        );
        (pipeline, store, backend, conversation)
    }

    #[tokio::test]
    async fn provisional_entry_is_replaced_by_the_confirmation() {
        let (pipeline, store, _, conversation) = pipeline();

        let pending = pipeline
            .submit(&conversation, MessageDraft::text("Olá, ainda disponível?"))
            .unwrap();
        assert!(pending.message().is_temporary());
        assert_eq!(pending.message().status, MessageStatus::Pending);

        let confirmed = pending.wait().await.unwrap();
        assert_eq!(confirmed.id, "m-1");
        assert_eq!(confirmed.status, MessageStatus::Sent);

        let log = store.read(|s| s.logs().messages(&conversation).to_vec());
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, "m-1");
    }

    #[tokio::test]
    async fn failed_send_is_marked_and_retry_reuses_the_entry() {
        let (pipeline, store, backend, conversation) = pipeline();
        backend.fail_next_sends(1, ChatError::network("connection reset"));

        let pending = pipeline.submit(&conversation, MessageDraft::text("Olá")).unwrap();
        let temporary_id = pending.message_id().to_string();
        assert!(pending.wait().await.is_err());

        let failed = store.read(|s| s.logs().get(&conversation, &temporary_id).cloned()).unwrap();
        assert!(failed.is_failed());

        let retried = pipeline.retry(&conversation, &temporary_id).unwrap();
        assert_eq!(retried.message().retry_count, 1);
        assert_eq!(retried.message().client_ref, failed.client_ref);

        let confirmed = retried.wait().await.unwrap();
        assert_eq!(confirmed.content, "Olá");
        assert_eq!(store.read(|s| s.logs().len(&conversation)), 1);
        assert_eq!(backend.messages(&conversation).len(), 1);
    }

    #[tokio::test]
    async fn retry_of_a_pending_entry_is_rejected() {
        let (pipeline, _, _, conversation) = pipeline();
        let pending = pipeline.submit(&conversation, MessageDraft::text("x")).unwrap();

        let err = pipeline.retry(&conversation, pending.message_id()).unwrap_err();
        assert!(matches!(err, ChatError::Validation { .. }));
    }

    #[tokio::test]
    async fn attachments_are_uploaded_before_sending() {
        let (pipeline, store, _, conversation) = pipeline();

        let pending = pipeline
            .submit_attachment(&conversation, "planta.pdf", vec![1, 2, 3], None)
            .await
            .unwrap();
        let confirmed = pending.wait().await.unwrap();

        let attachment = confirmed.attachment.clone().unwrap();
        assert_eq!(attachment.kind, crate::entities::AttachmentKind::Document);
        assert!(attachment.url.ends_with("/planta.pdf"));
        assert_eq!(
            store.read(|s| s.directory().get(&conversation).unwrap().last_message.clone().unwrap().content),
            "[document]"
        );
    }

    #[tokio::test]
    async fn empty_uploads_are_rejected() {
        let (pipeline, _, _, conversation) = pipeline();
        assert!(pipeline
            .submit_attachment(&conversation, "empty.png", Vec::new(), None)
            .await
            .is_err());
    }
}
